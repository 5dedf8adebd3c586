//! In-process coordination service, broker and broker client
//!
//! Each service binds a real `127.0.0.1:0` listener so it owns a unique
//! OS-assigned port for as long as it runs, and registers itself in a
//! process-wide table under that port. [`MemoryClient`] resolves
//! `bootstrap.servers` against the table, so consumers and producers reach
//! a broker by address exactly as they would a remote one.
//!
//! Broker behavior:
//! - topics are created on first use with `num.partitions` partitions
//! - records go to the explicit partition, else the key's hash, else round
//!   robin
//! - consumer groups keep committed positions, committed on every poll when
//!   `enable.auto.commit` is on; `auto.offset.reset` and `max.poll.records`
//!   are honored
//! - every member of a group reads all partitions of its subscription;
//!   there is no rebalancing

use super::error::{TestHarnessError, TestHarnessResult};
use super::infra::{
    CLIENT_PORT, DATA_DIR, EmbeddedBackend, EmbeddedService, LOG_DIR, LOG_DIRS, PORT,
    ZOOKEEPER_CONNECT,
};
use crate::velostream::kafka::client::{
    BrokerClient, ConsumerSession, DeliveryFuture, ProducerSession, Properties,
};
use crate::velostream::kafka::common_config::{
    AUTO_OFFSET_RESET, BOOTSTRAP_SERVERS, ENABLE_AUTO_COMMIT, GROUP_ID, MAX_POLL_RECORDS,
};
use crate::velostream::kafka::kafka_error::KafkaClientError;
use crate::velostream::kafka::message::{ConsumerRecord, EncodedRecord, RawRecord, RecordMetadata};
use crate::velostream::kafka::utils::{now_millis, record_checksum, split_brokers};
use futures::FutureExt;
use std::collections::{BTreeSet, HashMap};
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, LazyLock, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

const NUM_PARTITIONS: &str = "num.partitions";
const BROKER_ID: &str = "broker.id";
const DEFAULT_MAX_POLL_RECORDS: usize = 500;

static COORDINATORS: LazyLock<Mutex<HashMap<u16, Arc<CoordinatorState>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

static BROKERS: LazyLock<Mutex<HashMap<u16, Arc<BrokerState>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn parse_port(address: &str) -> Option<u16> {
    address.rsplit_once(':').and_then(|(_, p)| p.trim().parse().ok())
}

fn bind(port: u16) -> TestHarnessResult<TcpListener> {
    TcpListener::bind(("127.0.0.1", port)).map_err(|e| TestHarnessError::InfraError {
        message: format!("Failed to bind 127.0.0.1:{}", port),
        source: Some(e.to_string()),
    })
}

fn parse_property<T: std::str::FromStr>(
    properties: &Properties,
    key: &str,
    default: T,
) -> TestHarnessResult<T>
where
    T::Err: std::fmt::Display,
{
    match properties.get(key) {
        None => Ok(default),
        Some(v) => v.trim().parse().map_err(|e| TestHarnessError::ConfigError {
            message: format!("invalid {} '{}': {}", key, v, e),
        }),
    }
}

fn create_dir(path: &Path) -> TestHarnessResult<()> {
    std::fs::create_dir_all(path).map_err(|e| TestHarnessError::IoError {
        message: e.to_string(),
        path: path.display().to_string(),
    })
}

/// The in-process [`EmbeddedBackend`]
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    client: Arc<MemoryClient>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EmbeddedBackend for MemoryBackend {
    fn coordination_service(
        &self,
        properties: &Properties,
    ) -> TestHarnessResult<Box<dyn EmbeddedService>> {
        Ok(Box::new(MemoryCoordinator::new(properties)?))
    }

    fn broker(&self, properties: &Properties) -> TestHarnessResult<Box<dyn EmbeddedService>> {
        Ok(Box::new(MemoryBroker::new(properties)?))
    }

    fn client(&self) -> Arc<dyn BrokerClient> {
        self.client.clone()
    }
}

struct CoordinatorState {
    brokers: Mutex<BTreeSet<u16>>,
}

/// Coordination service: tracks which brokers registered with it
pub struct MemoryCoordinator {
    data_dir: PathBuf,
    requested_port: u16,
    listener: Option<TcpListener>,
    state: Arc<CoordinatorState>,
}

impl MemoryCoordinator {
    pub fn new(properties: &Properties) -> TestHarnessResult<Self> {
        let data_dir = properties
            .get(DATA_DIR)
            .map(PathBuf::from)
            .ok_or_else(|| TestHarnessError::ConfigError {
                message: format!("{} is required", DATA_DIR),
            })?;
        Ok(Self {
            data_dir,
            requested_port: parse_property(properties, CLIENT_PORT, 0)?,
            listener: None,
            state: Arc::new(CoordinatorState {
                brokers: Mutex::new(BTreeSet::new()),
            }),
        })
    }

    /// Ports of the brokers currently registered
    pub fn brokers(&self) -> BTreeSet<u16> {
        lock(&self.state.brokers).clone()
    }
}

impl EmbeddedService for MemoryCoordinator {
    fn start(&mut self) -> TestHarnessResult<()> {
        if self.listener.is_some() {
            return Ok(());
        }
        create_dir(&self.data_dir.join("version-2"))?;
        let listener = bind(self.requested_port)?;
        let port = listener.local_addr()?.port();
        lock(&COORDINATORS).insert(port, Arc::clone(&self.state));
        self.listener = Some(listener);
        log::debug!("Memory coordination service started on port {}", port);
        Ok(())
    }

    fn bound_port(&self) -> Option<u16> {
        self.listener
            .as_ref()
            .and_then(|l| l.local_addr().ok())
            .map(|a| a.port())
    }

    fn shutdown(&mut self) -> TestHarnessResult<()> {
        if let Some(port) = self.bound_port() {
            lock(&COORDINATORS).remove(&port);
            log::debug!("Memory coordination service on port {} stopped", port);
        }
        self.listener = None;
        Ok(())
    }

    fn await_shutdown(&mut self) -> TestHarnessResult<()> {
        if self.listener.is_some() {
            return Err(TestHarnessError::Shutdown {
                message: "coordination service still listening".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Clone)]
struct StoredRecord {
    key: Option<Vec<u8>>,
    value: Option<Vec<u8>>,
    timestamp: i64,
    checksum: i64,
}

#[derive(Default)]
struct BrokerData {
    topics: HashMap<String, Vec<Vec<StoredRecord>>>,
    committed: HashMap<(String, String, i32), i64>,
    next_partition: HashMap<String, usize>,
}

struct BrokerState {
    port: u16,
    num_partitions: usize,
    log_dir: PathBuf,
    running: AtomicBool,
    data: Mutex<BrokerData>,
    arrivals: Condvar,
}

impl BrokerState {
    fn address(&self) -> String {
        format!("localhost:{}", self.port)
    }

    fn ensure_topic<'a>(&self, data: &'a mut BrokerData, topic: &str) -> &'a mut Vec<Vec<StoredRecord>> {
        data.topics.entry(topic.to_string()).or_insert_with(|| {
            for partition in 0..self.num_partitions {
                let dir = self.log_dir.join(format!("{}-{}", topic, partition));
                if let Err(e) = std::fs::create_dir_all(&dir) {
                    log::warn!("Failed to create partition directory {}: {}", dir.display(), e);
                }
            }
            log::debug!(
                "Created topic '{}' with {} partitions on {}",
                topic,
                self.num_partitions,
                self.address()
            );
            vec![Vec::new(); self.num_partitions]
        })
    }

    fn append(&self, record: EncodedRecord) -> Result<RecordMetadata, KafkaClientError> {
        if !self.running.load(Ordering::Acquire) {
            return Err(KafkaClientError::send(
                record.topic(),
                format!("broker {} is not running", self.address()),
            ));
        }
        let mut data = lock(&self.data);
        let partition_count = self.ensure_topic(&mut data, record.topic()).len();

        let partition = match (record.partition(), record.key()) {
            (Some(p), _) if p >= 0 && (p as usize) < partition_count => p as usize,
            (Some(p), _) => {
                return Err(KafkaClientError::send(
                    record.topic(),
                    format!("unknown partition {}", p),
                ));
            }
            (None, Some(key)) => crc32fast::hash(key) as usize % partition_count,
            (None, None) => {
                let next = data.next_partition.entry(record.topic().to_string()).or_insert(0);
                let p = *next % partition_count;
                *next = next.wrapping_add(1);
                p
            }
        };

        let stored = StoredRecord {
            checksum: record_checksum(record.key().map(Vec::as_slice), Some(record.value())),
            timestamp: record.timestamp().unwrap_or_else(now_millis),
            key: record.key().cloned(),
            value: Some(record.value().clone()),
        };
        let metadata_timestamp = stored.timestamp;
        let checksum = stored.checksum;

        let partition_log = &mut self.ensure_topic(&mut data, record.topic())[partition];
        let offset = partition_log.len() as i64;
        partition_log.push(stored);
        drop(data);
        self.arrivals.notify_all();

        Ok(RecordMetadata {
            topic: record.topic().to_string(),
            partition: partition as i32,
            offset,
            timestamp: metadata_timestamp,
            checksum,
        })
    }
}

/// Broker holding topic partitions in memory
pub struct MemoryBroker {
    broker_id: i32,
    requested_port: u16,
    log_dir: PathBuf,
    zookeeper_connect: String,
    num_partitions: usize,
    listener: Option<TcpListener>,
    state: Option<Arc<BrokerState>>,
    coordinator: Option<Arc<CoordinatorState>>,
}

impl MemoryBroker {
    pub fn new(properties: &Properties) -> TestHarnessResult<Self> {
        let log_dir = properties
            .get(LOG_DIR)
            .cloned()
            .or_else(|| {
                properties
                    .get(LOG_DIRS)
                    .and_then(|dirs| dirs.split(',').next().map(|d| d.trim().to_string()))
            })
            .map(PathBuf::from)
            .ok_or_else(|| TestHarnessError::ConfigError {
                message: format!("{} or {} is required", LOG_DIR, LOG_DIRS),
            })?;
        let zookeeper_connect = properties
            .get(ZOOKEEPER_CONNECT)
            .cloned()
            .ok_or_else(|| TestHarnessError::ConfigError {
                message: format!("{} is required", ZOOKEEPER_CONNECT),
            })?;
        let num_partitions: usize = parse_property(properties, NUM_PARTITIONS, 1)?;
        if num_partitions == 0 {
            return Err(TestHarnessError::ConfigError {
                message: format!("{} must be at least 1", NUM_PARTITIONS),
            });
        }

        Ok(Self {
            broker_id: parse_property(properties, BROKER_ID, 0)?,
            requested_port: parse_property(properties, PORT, 0)?,
            log_dir,
            zookeeper_connect,
            num_partitions,
            listener: None,
            state: None,
            coordinator: None,
        })
    }

    fn find_coordinator(&self) -> TestHarnessResult<Arc<CoordinatorState>> {
        let coordinators = lock(&COORDINATORS);
        split_brokers(&self.zookeeper_connect)
            .iter()
            .filter_map(|address| parse_port(address))
            .find_map(|port| coordinators.get(&port).cloned())
            .ok_or_else(|| TestHarnessError::Connection {
                address: self.zookeeper_connect.clone(),
            })
    }
}

impl EmbeddedService for MemoryBroker {
    fn start(&mut self) -> TestHarnessResult<()> {
        if self.listener.is_some() {
            return Ok(());
        }
        let coordinator = self.find_coordinator()?;
        create_dir(&self.log_dir)?;
        let meta = self.log_dir.join("meta.properties");
        std::fs::write(&meta, format!("version=0\nbroker.id={}\n", self.broker_id)).map_err(
            |e| TestHarnessError::IoError {
                message: e.to_string(),
                path: meta.display().to_string(),
            },
        )?;

        let listener = bind(self.requested_port)?;
        let port = listener.local_addr()?.port();
        let state = Arc::new(BrokerState {
            port,
            num_partitions: self.num_partitions,
            log_dir: self.log_dir.clone(),
            running: AtomicBool::new(true),
            data: Mutex::new(BrokerData::default()),
            arrivals: Condvar::new(),
        });

        lock(&BROKERS).insert(port, Arc::clone(&state));
        lock(&coordinator.brokers).insert(port);
        self.listener = Some(listener);
        self.state = Some(state);
        self.coordinator = Some(coordinator);
        log::debug!(
            "Memory broker {} started on port {} (log dir {})",
            self.broker_id,
            port,
            self.log_dir.display()
        );
        Ok(())
    }

    fn bound_port(&self) -> Option<u16> {
        self.state.as_ref().map(|s| s.port)
    }

    fn shutdown(&mut self) -> TestHarnessResult<()> {
        if let Some(state) = self.state.take() {
            state.running.store(false, Ordering::Release);
            lock(&BROKERS).remove(&state.port);
            if let Some(coordinator) = self.coordinator.take() {
                lock(&coordinator.brokers).remove(&state.port);
            }
            // Wake consumers blocked in poll so they observe the shutdown
            drop(lock(&state.data));
            state.arrivals.notify_all();
            log::debug!("Memory broker on port {} stopped", state.port);
        }
        self.listener = None;
        Ok(())
    }

    fn await_shutdown(&mut self) -> TestHarnessResult<()> {
        if self.listener.is_some() || self.state.is_some() {
            return Err(TestHarnessError::Shutdown {
                message: "broker still running".to_string(),
            });
        }
        Ok(())
    }
}

/// [`BrokerClient`] that reaches in-process brokers by address
#[derive(Debug, Clone, Default)]
pub struct MemoryClient;

impl MemoryClient {
    pub fn new() -> Self {
        MemoryClient
    }

    fn resolve(&self, config: &Properties) -> Result<Arc<BrokerState>, KafkaClientError> {
        let servers = config.get(BOOTSTRAP_SERVERS).cloned().unwrap_or_default();
        let brokers = lock(&BROKERS);
        split_brokers(&servers)
            .iter()
            .filter_map(|address| parse_port(address))
            .find_map(|port| brokers.get(&port).cloned())
            .ok_or_else(|| {
                KafkaClientError::connection(&servers, "no in-process broker listening")
            })
    }
}

impl BrokerClient for MemoryClient {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn open_consumer(
        &self,
        config: &Properties,
    ) -> Result<Box<dyn ConsumerSession>, KafkaClientError> {
        let group_id = config
            .get(GROUP_ID)
            .cloned()
            .ok_or_else(|| KafkaClientError::config(format!("{} is required", GROUP_ID)))?;
        let reset = match config.get(AUTO_OFFSET_RESET).map(|v| v.to_lowercase()) {
            None => OffsetReset::Latest,
            Some(v) => match v.as_str() {
                "earliest" | "smallest" | "beginning" => OffsetReset::Earliest,
                "latest" | "largest" | "end" => OffsetReset::Latest,
                "none" | "error" => OffsetReset::None,
                other => {
                    return Err(KafkaClientError::config(format!(
                        "invalid {} '{}'",
                        AUTO_OFFSET_RESET, other
                    )));
                }
            },
        };
        let auto_commit = match config.get(ENABLE_AUTO_COMMIT) {
            None => true,
            Some(v) => v.parse::<bool>().map_err(|e| {
                KafkaClientError::config(format!("invalid {} '{}': {}", ENABLE_AUTO_COMMIT, v, e))
            })?,
        };
        let max_poll_records = match config.get(MAX_POLL_RECORDS) {
            None => DEFAULT_MAX_POLL_RECORDS,
            Some(v) => v.parse::<usize>().map_err(|e| {
                KafkaClientError::config(format!("invalid {} '{}': {}", MAX_POLL_RECORDS, v, e))
            })?,
        };

        let broker = self.resolve(config)?;
        Ok(Box::new(MemoryConsumerSession {
            broker,
            group_id,
            reset,
            auto_commit,
            max_poll_records: max_poll_records.max(1),
            closed: AtomicBool::new(false),
            state: Mutex::new(ConsumerState::default()),
        }))
    }

    fn open_producer(
        &self,
        config: &Properties,
    ) -> Result<Box<dyn ProducerSession>, KafkaClientError> {
        let broker = self.resolve(config)?;
        Ok(Box::new(MemoryProducerSession {
            broker,
            closed: AtomicBool::new(false),
        }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OffsetReset {
    Earliest,
    Latest,
    None,
}

#[derive(Default)]
struct ConsumerState {
    topics: BTreeSet<String>,
    positions: HashMap<(String, i32), i64>,
}

struct MemoryConsumerSession {
    broker: Arc<BrokerState>,
    group_id: String,
    reset: OffsetReset,
    auto_commit: bool,
    max_poll_records: usize,
    closed: AtomicBool,
    state: Mutex<ConsumerState>,
}

impl MemoryConsumerSession {
    fn check(&self) -> Result<(), KafkaClientError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(KafkaClientError::Closed);
        }
        if !self.broker.running.load(Ordering::Acquire) {
            return Err(KafkaClientError::connection(
                self.broker.address(),
                "broker is not running",
            ));
        }
        Ok(())
    }

    /// Take up to `max_poll_records` records past this member's positions
    fn fetch(&self, data: &mut BrokerData) -> Result<Vec<RawRecord>, KafkaClientError> {
        let mut state = lock(&self.state);
        let topics: Vec<String> = state.topics.iter().cloned().collect();
        let mut batch = Vec::new();

        for topic in topics {
            let partition_count = self.broker.ensure_topic(data, &topic).len();
            for partition in 0..partition_count {
                if batch.len() >= self.max_poll_records {
                    return Ok(batch);
                }
                let coordinates = (topic.clone(), partition as i32);
                let committed_key = (self.group_id.clone(), topic.clone(), partition as i32);
                let partition_log = &data.topics[&topic][partition];
                let position = match state.positions.get(&coordinates) {
                    Some(p) => *p,
                    None => match (data.committed.get(&committed_key), self.reset) {
                        (Some(p), _) => *p,
                        (None, OffsetReset::Earliest) => 0,
                        (None, OffsetReset::Latest) => partition_log.len() as i64,
                        (None, OffsetReset::None) => {
                            return Err(KafkaClientError::broker(format!(
                                "no committed offset for group '{}' on {}[{}]",
                                self.group_id, topic, partition
                            )));
                        }
                    },
                };

                let start = (position.max(0) as usize).min(partition_log.len());
                let take = (partition_log.len() - start).min(self.max_poll_records - batch.len());
                for (i, stored) in partition_log[start..start + take]
                    .iter()
                    .enumerate()
                {
                    batch.push(ConsumerRecord::new(
                        topic.as_str(),
                        partition as i32,
                        position + i as i64,
                        stored.timestamp,
                        stored.checksum,
                        stored.key.clone(),
                        stored.value.clone(),
                    ));
                }

                let next = position + take as i64;
                state.positions.insert(coordinates, next);
                if self.auto_commit && take > 0 {
                    data.committed.insert(committed_key, next);
                }
            }
        }
        Ok(batch)
    }
}

impl ConsumerSession for MemoryConsumerSession {
    fn subscribe(&self, topics: &[String]) -> Result<(), KafkaClientError> {
        self.check()?;
        {
            let mut data = lock(&self.broker.data);
            for topic in topics {
                self.broker.ensure_topic(&mut data, topic);
            }
        }
        let mut state = lock(&self.state);
        state.topics = topics.iter().cloned().collect();
        let ConsumerState { topics, positions } = &mut *state;
        positions.retain(|(topic, _), _| topics.contains(topic));
        Ok(())
    }

    fn subscription(&self) -> Result<BTreeSet<String>, KafkaClientError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(KafkaClientError::Closed);
        }
        Ok(lock(&self.state).topics.clone())
    }

    fn poll(&self, timeout: Duration) -> Result<Vec<RawRecord>, KafkaClientError> {
        let deadline = Instant::now().checked_add(timeout);
        let mut data = lock(&self.broker.data);
        loop {
            self.check()?;
            let batch = self.fetch(&mut data)?;
            if !batch.is_empty() {
                return Ok(batch);
            }
            data = match deadline {
                None => self
                    .broker
                    .arrivals
                    .wait(data)
                    .unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(batch);
                    }
                    self.broker
                        .arrivals
                        .wait_timeout(data, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
    }

    fn close(&self) -> Result<(), KafkaClientError> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            // Wake a poll blocked on this session
            drop(lock(&self.broker.data));
            self.broker.arrivals.notify_all();
            log::debug!("Memory consumer in group '{}' closed", self.group_id);
        }
        Ok(())
    }
}

impl Drop for MemoryConsumerSession {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::Release);
    }
}

struct MemoryProducerSession {
    broker: Arc<BrokerState>,
    closed: AtomicBool,
}

impl ProducerSession for MemoryProducerSession {
    fn send(&self, record: EncodedRecord) -> DeliveryFuture {
        let result = if self.closed.load(Ordering::Acquire) {
            Err(KafkaClientError::Closed)
        } else {
            self.broker.append(record)
        };
        futures::future::ready(result).boxed()
    }

    fn flush(&self, _timeout: Duration) -> Result<(), KafkaClientError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(KafkaClientError::Closed);
        }
        Ok(())
    }

    fn close(&self) -> Result<(), KafkaClientError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
