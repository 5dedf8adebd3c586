//! Embedded broker lifecycle tests
//!
//! A recording backend wraps [`MemoryBackend`] so each test can see which
//! directories the scopes handed to the services and check they are gone
//! afterwards.

use super::super::*;
use std::collections::BTreeSet;
use std::net::TcpListener;
use std::path::PathBuf;
use std::sync::Mutex;
use velostream_kafka::velostream::kafka::BrokerClient;
use velostream_kafka::velostream::test_harness::infra::{DATA_DIR, LOG_DIR, ZOOKEEPER_CONNECT};
use velostream_kafka::velostream::test_harness::{
    EmbeddedBackend, EmbeddedService, MemoryBackend, TestHarnessResult, with_broker,
    with_zookeeper,
};

#[derive(Default)]
struct RecordingBackend {
    inner: MemoryBackend,
    dirs: Mutex<Vec<PathBuf>>,
}

impl RecordingBackend {
    fn dirs(&self) -> Vec<PathBuf> {
        self.dirs.lock().unwrap().clone()
    }

    fn run<T, E, F>(&self, body: F) -> Result<T, E>
    where
        E: From<TestHarnessError>,
        F: FnOnce() -> Result<T, E>,
    {
        with_zookeeper(self, || with_broker(self, &Properties::new(), body))
    }
}

impl EmbeddedBackend for RecordingBackend {
    fn coordination_service(
        &self,
        properties: &Properties,
    ) -> TestHarnessResult<Box<dyn EmbeddedService>> {
        self.dirs
            .lock()
            .unwrap()
            .push(PathBuf::from(&properties[DATA_DIR]));
        self.inner.coordination_service(properties)
    }

    fn broker(&self, properties: &Properties) -> TestHarnessResult<Box<dyn EmbeddedService>> {
        self.dirs
            .lock()
            .unwrap()
            .push(PathBuf::from(&properties[LOG_DIR]));
        self.inner.broker(properties)
    }

    fn client(&self) -> Arc<dyn BrokerClient> {
        self.inner.client()
    }
}

fn port_of(address: &str) -> u16 {
    address.rsplit_once(':').unwrap().1.parse().unwrap()
}

fn assert_released(backend: &RecordingBackend, bootstrap_servers: &str) {
    let dirs = backend.dirs();
    assert_eq!(dirs.len(), 2);
    for dir in dirs {
        assert!(!dir.exists(), "{} was not removed", dir.display());
    }

    let unreachable = ClientSettings::default()
        .bootstrap_servers(bootstrap_servers)
        .client(backend.client());
    config::with_settings(unreachable, || {
        assert!(matches!(
            KafkaProducer::new(),
            Err(KafkaClientError::Connection { .. })
        ));
    });
}

#[test]
fn test_scope_publishes_live_addresses() {
    init_logging();
    let backend = RecordingBackend::default();
    backend
        .run(|| {
            let settings = config::current();
            assert_ne!(port_of(&settings.bootstrap_servers), 0);
            assert_ne!(port_of(settings.zookeeper_connect.as_deref().unwrap()), 0);
            assert!(backend.dirs().iter().all(|d| d.exists()));

            let sent = send_one(ProducerRecord::new("harness-check", Value::from(1)), None, None).get()?;
            assert_eq!(sent.offset, 0);
            Ok::<_, TestHarnessError>(())
        })
        .unwrap();
    assert!(config::current().zookeeper_connect.is_none());
}

#[test]
fn test_cleanup_after_success() {
    let backend = RecordingBackend::default();
    let servers = backend
        .run(|| Ok::<_, TestHarnessError>(config::current().bootstrap_servers))
        .unwrap();

    assert_ne!(config::current().bootstrap_servers, servers);
    assert_released(&backend, &servers);
    assert!(TcpListener::bind(("127.0.0.1", port_of(&servers))).is_ok());
}

#[test]
fn test_cleanup_after_error_keeps_body_error() {
    let backend = RecordingBackend::default();
    let servers = Mutex::new(String::new());

    let err = backend
        .run(|| -> Result<(), TestHarnessError> {
            *servers.lock().unwrap() = config::current().bootstrap_servers;
            Err(KafkaClientError::config("rejected by the test").into())
        })
        .unwrap_err();

    assert!(matches!(
        err,
        TestHarnessError::Client(KafkaClientError::Config { .. })
    ));
    assert_released(&backend, &servers.into_inner().unwrap());
}

#[test]
fn test_cleanup_after_panic() {
    let backend = RecordingBackend::default();
    let servers = Mutex::new(String::new());

    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        backend.run(|| -> Result<(), TestHarnessError> {
            *servers.lock().unwrap() = config::current().bootstrap_servers;
            panic!("body panicked");
        })
    }));

    assert!(outcome.is_err());
    assert_released(&backend, &servers.into_inner().unwrap());
    assert!(config::current().zookeeper_connect.is_none());
}

#[test]
fn test_repeated_cycles_each_get_a_working_broker() {
    for cycle in 0..3 {
        let backend = RecordingBackend::default();
        let servers = backend
            .run(|| {
                let topic = format!("cycle-{}", cycle);
                let sent = send_one(ProducerRecord::new(&topic, Value::Integer(cycle)), None, None)
                    .get()?;
                // A fresh broker starts every topic at offset zero
                assert_eq!(sent.offset, 0);
                Ok::<_, TestHarnessError>(config::current().bootstrap_servers)
            })
            .unwrap();
        assert_released(&backend, &servers);
    }
}

#[test]
fn test_concurrent_harnesses_are_isolated() {
    let handles: Vec<_> = (0..3)
        .map(|_| {
            std::thread::spawn(|| {
                with_test_broker(|| {
                    let settings = config::current();
                    send_one(ProducerRecord::new("shared-name", Value::Null), None, None)
                        .get()?;
                    let stream = topics_to_records("shared-name", StreamOptions::new())?;
                    let seen = stream.consumer().poll_once(Duration::from_millis(200))?.len();
                    Ok::<_, TestHarnessError>((settings.bootstrap_servers, seen))
                })
                .unwrap()
            })
        })
        .collect();

    let results: Vec<(String, usize)> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let ports: BTreeSet<u16> = results.iter().map(|(s, _)| port_of(s)).collect();
    assert_eq!(ports.len(), 3);
    assert!(results.iter().all(|(_, seen)| *seen == 1));
}

#[test]
fn test_scoped_addresses_invisible_to_other_threads() {
    with_test_broker(|| {
        let here = config::current().bootstrap_servers;
        let there = std::thread::spawn(|| config::current().bootstrap_servers)
            .join()
            .unwrap();
        assert_ne!(here, there);
        Ok::<_, TestHarnessError>(())
    })
    .unwrap();
}

#[test]
fn test_broker_without_coordinator_fails_at_entry() {
    let backend = RecordingBackend::default();
    let overlay = Properties::from([(ZOOKEEPER_CONNECT.to_string(), "localhost:1".to_string())]);
    let mut ran = false;

    let err = with_broker(&backend, &overlay, || {
        ran = true;
        Ok::<_, TestHarnessError>(())
    })
    .unwrap_err();

    assert!(!ran);
    assert!(matches!(err, TestHarnessError::Connection { .. }));
    assert!(backend.dirs().iter().all(|d| !d.exists()));
}

#[test]
fn test_caller_owned_log_dir_is_kept() {
    let backend = MemoryBackend::new();
    let log_dir = tempfile::tempdir().unwrap();
    let overlay = Properties::from([
        (LOG_DIR.to_string(), log_dir.path().display().to_string()),
        ("num.partitions".to_string(), "2".to_string()),
    ]);

    with_zookeeper(&backend, || {
        with_broker(&backend, &overlay, || {
            send_one(ProducerRecord::new("kept", Value::from("x")), None, None).get()?;
            Ok::<_, TestHarnessError>(())
        })
    })
    .unwrap();

    assert!(log_dir.path().join("meta.properties").exists());
    assert!(log_dir.path().join("kept-0").is_dir());
    assert!(log_dir.path().join("kept-1").is_dir());
}
