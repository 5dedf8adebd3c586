//! librdkafka-backed broker client
//!
//! Consumers wrap a `BaseConsumer` polled on the caller's thread; producers
//! wrap a `FutureProducer`, whose background thread resolves deliveries.
//! librdkafka log lines are forwarded to the `log` facade.

use super::client::{
    BrokerClient, ConsumerSession, DeliveryFuture, Properties, ProducerSession,
};
use super::common_config::{BrokerAddressFamily, MAX_POLL_RECORDS};
use super::kafka_error::KafkaClientError;
use super::message::{ConsumerRecord, EncodedRecord, RawRecord, RecordMetadata};
use super::utils::{convert_kafka_log_level, record_checksum};
use futures::FutureExt;
use log::error;
use rdkafka::config::{ClientConfig, RDKafkaLogLevel};
use rdkafka::consumer::{BaseConsumer, Consumer, ConsumerContext};
use rdkafka::error::KafkaError;
use rdkafka::message::{BorrowedMessage, Message, Timestamp};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use rdkafka::ClientContext;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

const BROKER_ADDRESS_FAMILY: &str = "broker.address.family";
const DEFAULT_MAX_POLL_RECORDS: usize = 500;
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Client context forwarding librdkafka logs and errors to `log`
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingClientContext;

impl ClientContext for LoggingClientContext {
    fn log(&self, level: RDKafkaLogLevel, fac: &str, message: &str) {
        // `fac` names the librdkafka subsystem, e.g. "BROKER" or "TOPIC"
        log::log!(
            convert_kafka_log_level(level),
            "Kafka log ({}): {}",
            fac,
            message
        );
    }

    fn error(&self, error: KafkaError, reason: &str) {
        error!("Kafka client error: {:?}, reason: {}", error, reason);
    }
}

impl ConsumerContext for LoggingClientContext {}

/// Broker client backed by librdkafka
#[derive(Debug, Clone)]
pub struct RdKafkaClient {
    connect_timeout: Duration,
}

impl RdKafkaClient {
    pub fn new() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// How long session creation waits for cluster metadata before giving
    /// up with a connection error
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

impl Default for RdKafkaClient {
    fn default() -> Self {
        Self::new()
    }
}

impl BrokerClient for RdKafkaClient {
    fn name(&self) -> &'static str {
        "rdkafka"
    }

    fn open_consumer(
        &self,
        config: &Properties,
    ) -> Result<Box<dyn ConsumerSession>, KafkaClientError> {
        let mut config = config.clone();
        // librdkafka rejects unknown keys; this one only bounds our batches
        let max_poll_records = match config.remove(MAX_POLL_RECORDS) {
            Some(v) => v.parse::<usize>().map_err(|e| {
                KafkaClientError::config(format!("invalid {} '{}': {}", MAX_POLL_RECORDS, v, e))
            })?,
            None => DEFAULT_MAX_POLL_RECORDS,
        };
        let brokers = config.get("bootstrap.servers").cloned().unwrap_or_default();

        let consumer: BaseConsumer<LoggingClientContext> =
            to_client_config(&config).create_with_context(LoggingClientContext)?;
        consumer
            .fetch_metadata(None, self.connect_timeout)
            .map_err(|e| KafkaClientError::connection(&brokers, e.to_string()))?;

        log::info!("Kafka consumer connected to {}", brokers);
        Ok(Box::new(RdKafkaConsumerSession {
            consumer,
            max_poll_records: max_poll_records.max(1),
            closed: AtomicBool::new(false),
        }))
    }

    fn open_producer(
        &self,
        config: &Properties,
    ) -> Result<Box<dyn ProducerSession>, KafkaClientError> {
        let brokers = config.get("bootstrap.servers").cloned().unwrap_or_default();

        let producer: FutureProducer<LoggingClientContext> =
            to_client_config(config).create_with_context(LoggingClientContext)?;
        producer
            .client()
            .fetch_metadata(None, self.connect_timeout)
            .map_err(|e| KafkaClientError::connection(&brokers, e.to_string()))?;

        log::info!("Kafka producer connected to {}", brokers);
        Ok(Box::new(RdKafkaProducerSession {
            producer,
            closed: AtomicBool::new(false),
        }))
    }
}

fn to_client_config(properties: &Properties) -> ClientConfig {
    let mut config = ClientConfig::new();
    for (key, value) in properties {
        config.set(key, value);
    }
    if !properties.contains_key(BROKER_ADDRESS_FAMILY) {
        if let Some(family) = BrokerAddressFamily::from_env().config_value() {
            config.set(BROKER_ADDRESS_FAMILY, family);
        }
    }
    config
}

/// Durations librdkafka cannot represent in milliseconds mean "forever"
fn to_timeout(timeout: Duration) -> Timeout {
    if timeout.as_millis() >= i32::MAX as u128 {
        Timeout::Never
    } else {
        Timeout::After(timeout)
    }
}

fn to_raw_record(msg: &BorrowedMessage<'_>) -> RawRecord {
    ConsumerRecord::new(
        msg.topic(),
        msg.partition(),
        msg.offset(),
        msg.timestamp().to_millis().unwrap_or(-1),
        record_checksum(msg.key(), msg.payload()),
        msg.key().map(<[u8]>::to_vec),
        msg.payload().map(<[u8]>::to_vec),
    )
}

struct RdKafkaConsumerSession {
    consumer: BaseConsumer<LoggingClientContext>,
    max_poll_records: usize,
    closed: AtomicBool,
}

impl RdKafkaConsumerSession {
    fn ensure_open(&self) -> Result<(), KafkaClientError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(KafkaClientError::Closed);
        }
        Ok(())
    }
}

impl ConsumerSession for RdKafkaConsumerSession {
    fn subscribe(&self, topics: &[String]) -> Result<(), KafkaClientError> {
        self.ensure_open()?;
        if topics.is_empty() {
            self.consumer.unsubscribe();
            return Ok(());
        }
        let topics: Vec<&str> = topics.iter().map(String::as_str).collect();
        self.consumer.subscribe(&topics)?;
        Ok(())
    }

    fn subscription(&self) -> Result<BTreeSet<String>, KafkaClientError> {
        self.ensure_open()?;
        Ok(self
            .consumer
            .subscription()?
            .elements()
            .iter()
            .map(|e| e.topic().to_string())
            .collect())
    }

    fn poll(&self, timeout: Duration) -> Result<Vec<RawRecord>, KafkaClientError> {
        self.ensure_open()?;
        let mut batch = Vec::new();
        // Wait once for the first record, then drain what is already fetched
        let mut wait = to_timeout(timeout);
        while batch.len() < self.max_poll_records {
            match self.consumer.poll(wait) {
                None => break,
                Some(Ok(msg)) => batch.push(to_raw_record(&msg)),
                Some(Err(e)) if batch.is_empty() => return Err(e.into()),
                Some(Err(e)) => {
                    log::warn!("Kafka poll error after {} records: {}", batch.len(), e);
                    break;
                }
            }
            wait = Timeout::After(Duration::ZERO);
        }
        Ok(batch)
    }

    fn close(&self) -> Result<(), KafkaClientError> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.consumer.unsubscribe();
            log::debug!("Kafka consumer closed");
        }
        Ok(())
    }
}

/// The broker's timestamp for a delivered record, else the one the record
/// asked for, else -1
fn delivery_timestamp(broker: Timestamp, requested: Option<i64>) -> i64 {
    broker.to_millis().or(requested).unwrap_or(-1)
}

struct RdKafkaProducerSession {
    producer: FutureProducer<LoggingClientContext>,
    closed: AtomicBool,
}

impl ProducerSession for RdKafkaProducerSession {
    fn send(&self, record: EncodedRecord) -> DeliveryFuture {
        let topic = record.topic().to_string();
        if self.closed.load(Ordering::Acquire) {
            return futures::future::ready(Err(KafkaClientError::Closed)).boxed();
        }

        let checksum = record_checksum(record.key().map(Vec::as_slice), Some(record.value()));
        let mut future_record: FutureRecord<'_, Vec<u8>, Vec<u8>> =
            FutureRecord::to(record.topic()).payload(record.value());
        if let Some(key) = record.key() {
            future_record = future_record.key(key);
        }
        if let Some(partition) = record.partition() {
            future_record = future_record.partition(partition);
        }
        if let Some(timestamp) = record.timestamp() {
            future_record = future_record.timestamp(timestamp);
        }

        // send_result enqueues now; only the acknowledgment is deferred
        match self.producer.send_result(future_record) {
            Ok(delivery) => {
                let timestamp = record.timestamp();
                async move {
                    match delivery.await {
                        Ok(Ok(delivery)) => Ok(RecordMetadata {
                            topic,
                            partition: delivery.partition,
                            offset: delivery.offset,
                            timestamp: delivery_timestamp(delivery.timestamp, timestamp),
                            checksum,
                        }),
                        Ok(Err((e, _))) => {
                            error!("Failed to send record to topic '{}': {}", topic, e);
                            Err(KafkaClientError::send(topic, e.to_string()))
                        }
                        Err(_) => Err(KafkaClientError::send(
                            topic,
                            "delivery canceled, producer dropped",
                        )),
                    }
                }
                .boxed()
            }
            Err((e, _)) => {
                error!("Failed to enqueue record for topic '{}': {}", topic, e);
                futures::future::ready(Err(KafkaClientError::send(topic, e.to_string()))).boxed()
            }
        }
    }

    fn flush(&self, timeout: Duration) -> Result<(), KafkaClientError> {
        self.producer.flush(to_timeout(timeout))?;
        Ok(())
    }

    fn close(&self) -> Result<(), KafkaClientError> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.producer.flush(to_timeout(DEFAULT_CONNECT_TIMEOUT))?;
            log::debug!("Kafka producer closed");
        }
        Ok(())
    }
}
