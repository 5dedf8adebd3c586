//! Embedded broker lifecycle
//!
//! Stands up an isolated coordination service and broker for the duration of
//! a closure:
//! - every service gets a fresh temp directory and an OS-assigned port
//! - the bound port is read back from the running service
//! - connection strings are published through scoped
//!   [`ClientSettings`](crate::velostream::config::ClientSettings), visible
//!   only to the current thread
//! - services are stopped and owned directories removed on every exit path,
//!   including `Err` returns and panics
//!
//! ```rust
//! use velostream_kafka::velostream::test_harness::with_test_broker;
//! use velostream_kafka::{KafkaConsumer, KafkaProducer, ProducerRecord, Value};
//! use std::time::Duration;
//!
//! with_test_broker(|| {
//!     let producer = KafkaProducer::new()?;
//!     producer.send(ProducerRecord::new("greetings", Value::from("hi"))).get()?;
//!
//!     let consumer = KafkaConsumer::new("doc-group")?;
//!     consumer.subscribe("greetings")?;
//!     let records = consumer.poll_once(Duration::from_secs(1))?.into_records()?;
//!     assert_eq!(records[0].value(), &Value::from("hi"));
//!     Ok::<_, velostream_kafka::TestHarnessError>(())
//! })
//! .unwrap();
//! ```

use super::error::{TestHarnessError, TestHarnessResult};
use super::memory::MemoryBackend;
use crate::velostream::config;
use crate::velostream::kafka::client::{BrokerClient, Properties};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

pub const LOG_DIR: &str = "log.dir";
pub const LOG_DIRS: &str = "log.dirs";
pub const PORT: &str = "port";
pub const ZOOKEEPER_CONNECT: &str = "zookeeper.connect";
pub const DATA_DIR: &str = "dataDir";
pub const CLIENT_PORT: &str = "clientPort";

/// A service the harness can start, locate and stop
pub trait EmbeddedService: Send {
    fn start(&mut self) -> TestHarnessResult<()>;

    /// Port the running service actually listens on
    fn bound_port(&self) -> Option<u16>;

    /// Begin shutting down; safe to call on a service that never started
    fn shutdown(&mut self) -> TestHarnessResult<()>;

    /// Wait until shutdown has completed
    fn await_shutdown(&mut self) -> TestHarnessResult<()>;
}

/// Builds coordination services and brokers, and the client that reaches
/// the brokers it builds
pub trait EmbeddedBackend {
    fn coordination_service(
        &self,
        properties: &Properties,
    ) -> TestHarnessResult<Box<dyn EmbeddedService>>;

    fn broker(&self, properties: &Properties) -> TestHarnessResult<Box<dyn EmbeddedService>>;

    fn client(&self) -> Arc<dyn BrokerClient>;
}

/// Stops the wrapped service when dropped
///
/// The normal path calls [`stop`](Self::stop) to see shutdown errors; the
/// drop path only logs them.
pub struct ServiceGuard {
    name: &'static str,
    service: Option<Box<dyn EmbeddedService>>,
}

impl ServiceGuard {
    pub fn new(name: &'static str, service: Box<dyn EmbeddedService>) -> Self {
        Self {
            name,
            service: Some(service),
        }
    }

    pub fn start(&mut self) -> TestHarnessResult<()> {
        match self.service.as_mut() {
            Some(service) => service.start(),
            None => Err(TestHarnessError::infra(format!(
                "{} already stopped",
                self.name
            ))),
        }
    }

    pub fn port(&self) -> TestHarnessResult<u16> {
        self.service
            .as_ref()
            .and_then(|s| s.bound_port())
            .ok_or_else(|| TestHarnessError::infra(format!("{} is not listening", self.name)))
    }

    /// Shut down and wait for completion
    pub fn stop(mut self) -> TestHarnessResult<()> {
        self.stop_inner()
    }

    fn stop_inner(&mut self) -> TestHarnessResult<()> {
        let Some(mut service) = self.service.take() else {
            return Ok(());
        };
        log::debug!("Stopping {}", self.name);
        service
            .shutdown()
            .and_then(|_| service.await_shutdown())
            .map_err(|e| TestHarnessError::Shutdown {
                message: format!("{}: {}", self.name, e),
            })
    }
}

impl Drop for ServiceGuard {
    fn drop(&mut self) {
        if self.service.is_some() {
            if let Err(e) = self.stop_inner() {
                log::warn!("Failed to stop {}: {}", self.name, e);
            }
        }
    }
}

fn create_temp_dir(prefix: &str) -> TestHarnessResult<TempDir> {
    let dir = tempfile::Builder::new()
        .prefix(&format!("velostream-{}-", prefix))
        .tempdir()
        .map_err(|e| TestHarnessError::IoError {
            message: format!("Failed to create temp directory: {}", e),
            path: std::env::temp_dir().display().to_string(),
        })?;
    log::debug!("Created temp directory: {}", dir.path().display());
    Ok(dir)
}

fn remove_temp_dir(dir: TempDir) {
    let path = dir.path().to_path_buf();
    if let Err(e) = dir.close() {
        log::warn!("Failed to remove temp directory {}: {}", path.display(), e);
    }
}

fn path_value(path: &Path) -> String {
    path.display().to_string()
}

/// Combine the body's outcome with the service shutdown
///
/// A shutdown failure is reported but never hides an error the body
/// already returned.
fn finish<T, E>(result: Result<T, E>, guard: ServiceGuard) -> Result<T, E>
where
    E: From<TestHarnessError>,
{
    let name = guard.name;
    match (result, guard.stop()) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(e)) => {
            log::error!("{}", e);
            Err(e.into())
        }
        (Err(body), Ok(())) => Err(body),
        (Err(body), Err(e)) => {
            log::error!("{} shutdown failed while unwinding an error: {}", name, e);
            Err(body)
        }
    }
}

/// Run `body` with a coordination service up
///
/// The service gets its own temp data directory and an OS-assigned client
/// port; `localhost:<port>` is published as the scoped `zookeeper_connect`.
pub fn with_zookeeper<B, T, E, F>(backend: &B, body: F) -> Result<T, E>
where
    B: EmbeddedBackend + ?Sized,
    E: From<TestHarnessError>,
    F: FnOnce() -> Result<T, E>,
{
    let data_dir = create_temp_dir("zookeeper")?;
    let properties = Properties::from([
        (DATA_DIR.to_string(), path_value(data_dir.path())),
        (CLIENT_PORT.to_string(), "0".to_string()),
    ]);

    let mut guard = ServiceGuard::new("coordination service", backend.coordination_service(&properties)?);
    guard.start()?;
    let connect = format!("localhost:{}", guard.port()?);
    log::info!("Coordination service listening on {}", connect);

    let result = config::scoped(|s| s.zookeeper_connect = Some(connect), body);
    let result = finish(result, guard);
    remove_temp_dir(data_dir);
    result
}

/// Run `body` with a broker up
///
/// Defaults `{log.dir: <fresh temp dir>, port: 0, zookeeper.connect: <scoped
/// value>}` are overridden by `overlay`. When the overlay names `log.dir` or
/// `log.dirs` the caller owns that directory and it is left in place.
/// `localhost:<port>` becomes the scoped bootstrap servers and the backend's
/// client becomes the scoped broker client.
pub fn with_broker<B, T, E, F>(backend: &B, overlay: &Properties, body: F) -> Result<T, E>
where
    B: EmbeddedBackend + ?Sized,
    E: From<TestHarnessError>,
    F: FnOnce() -> Result<T, E>,
{
    let owned_dir = if overlay.contains_key(LOG_DIR) || overlay.contains_key(LOG_DIRS) {
        None
    } else {
        Some(create_temp_dir("kafka")?)
    };

    let mut properties = Properties::new();
    if let Some(dir) = &owned_dir {
        properties.insert(LOG_DIR.to_string(), path_value(dir.path()));
    }
    properties.insert(PORT.to_string(), "0".to_string());
    if let Some(connect) = config::current().zookeeper_connect {
        properties.insert(ZOOKEEPER_CONNECT.to_string(), connect);
    }
    properties.extend(overlay.iter().map(|(k, v)| (k.clone(), v.clone())));

    let mut guard = ServiceGuard::new("broker", backend.broker(&properties)?);
    guard.start()?;
    let bootstrap_servers = format!("localhost:{}", guard.port()?);
    log::info!("Broker listening on {}", bootstrap_servers);

    let client = backend.client();
    let result = config::scoped(
        |s| {
            s.bootstrap_servers = bootstrap_servers;
            s.client = client;
        },
        body,
    );
    let result = finish(result, guard);
    if let Some(dir) = owned_dir {
        remove_temp_dir(dir);
    }
    result
}

/// Run `body` against a fresh in-process coordination service and broker
pub fn with_test_broker<T, E, F>(body: F) -> Result<T, E>
where
    E: From<TestHarnessError>,
    F: FnOnce() -> Result<T, E>,
{
    let backend = MemoryBackend::new();
    with_zookeeper(&backend, || with_broker(&backend, &Properties::new(), body))
}
