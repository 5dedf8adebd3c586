use crate::velostream::config;
use crate::velostream::kafka::client::{ConsumerSession, POLL_FOREVER, Properties};
use crate::velostream::kafka::client_config_builder::ClientConfigBuilder;
use crate::velostream::kafka::common_config::{GROUP_ID, consumer_defaults, generate_group_id};
use crate::velostream::kafka::kafka_error::{ConsumerError, KafkaClientError};
use crate::velostream::kafka::message::{ConsumerRecord, RawRecord};
use crate::velostream::serialization::{Deserializer, Value};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// A Kafka consumer that decodes keys and values through the active
/// [`Deserializer`]
///
/// Cloning is cheap; clones share the same broker session, so closing one
/// closes them all.
///
/// # Examples
///
/// ## Polling
/// ```rust,no_run
/// use velostream_kafka::KafkaConsumer;
/// use std::time::Duration;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let consumer = KafkaConsumer::new("my-group")?;
///     consumer.subscribe("orders")?;
///
///     for record in consumer.poll_once(Duration::from_secs(1))? {
///         let record = record?;
///         println!("{}[{}]@{}: {}", record.topic(), record.partition(), record.offset(), record.value());
///     }
///     Ok(())
/// }
/// ```
///
/// ## Lazy consumption
/// ```rust,no_run
/// use velostream_kafka::KafkaConsumer;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let consumer = KafkaConsumer::new("my-group")?;
///     consumer.subscribe(["orders", "payments"])?;
///
///     // Polls only when the next element is requested
///     for value in consumer.consume().values().take(10) {
///         println!("{}", value?);
///     }
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct KafkaConsumer {
    session: Arc<dyn ConsumerSession>,
    group_id: String,
    config: Properties,
}

impl KafkaConsumer {
    /// Creates a consumer in `group_id` using the active settings
    pub fn new(group_id: &str) -> Result<Self, ConsumerError> {
        Self::with_config(group_id, &Properties::new())
    }

    /// Creates a consumer with call-site properties
    ///
    /// Properties are merged with increasing precedence: library defaults,
    /// then the active consumer overlay, then `overlay`. Fails with
    /// [`KafkaClientError::Connection`] when no broker is reachable.
    pub fn with_config(group_id: &str, overlay: &Properties) -> Result<Self, ConsumerError> {
        let settings = config::current();
        let config = ClientConfigBuilder::new()
            .properties(&consumer_defaults(&settings.bootstrap_servers, group_id))
            .properties(&settings.consumer_config)
            .properties(overlay)
            .build();
        let group_id = config
            .get(GROUP_ID)
            .cloned()
            .unwrap_or_else(|| group_id.to_string());

        let session = settings.client.open_consumer(&config)?;
        log::debug!(
            "Created {} consumer in group '{}' for {}",
            settings.client.name(),
            group_id,
            settings.bootstrap_servers
        );

        Ok(KafkaConsumer {
            session: Arc::from(session),
            group_id,
            config,
        })
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    /// The merged properties the session was opened with
    pub fn config(&self) -> &Properties {
        &self.config
    }

    /// Subscribe to topics, replacing every previous subscription
    pub fn subscribe(&self, topics: impl Topics) -> Result<&Self, ConsumerError> {
        let mut seen = BTreeSet::new();
        let topics: Vec<String> = topics
            .into_topics()
            .into_iter()
            .filter(|t| seen.insert(t.clone()))
            .collect();
        self.session.subscribe(&topics)?;
        log::debug!("Consumer '{}' subscribed to {:?}", self.group_id, topics);
        Ok(self)
    }

    /// Current subscriptions, `None` when nothing is subscribed
    pub fn subscription(&self) -> Result<Option<BTreeSet<String>>, ConsumerError> {
        let topics = self.session.subscription()?;
        Ok(if topics.is_empty() { None } else { Some(topics) })
    }

    /// One poll of at most `timeout`, decoded with the active deserializer
    pub fn poll_once(&self, timeout: Duration) -> Result<PollBatch, ConsumerError> {
        self.poll_once_with(timeout, config::current().deserializer)
    }

    /// One poll of at most `timeout`, decoded with `deserializer`
    ///
    /// Returns whatever the broker client had available, possibly nothing.
    /// Pass [`POLL_FOREVER`] to wait until records arrive.
    pub fn poll_once_with(
        &self,
        timeout: Duration,
        deserializer: Arc<dyn Deserializer>,
    ) -> Result<PollBatch, ConsumerError> {
        let records = self.session.poll(timeout)?;
        if !records.is_empty() {
            log::debug!(
                "Consumer '{}' polled {} records",
                self.group_id,
                records.len()
            );
        }
        Ok(PollBatch::new(records, deserializer))
    }

    /// Unbounded lazy stream of records, decoded with the deserializer
    /// active right now
    pub fn consume(&self) -> RecordStream {
        self.consume_with(config::current().deserializer)
    }

    /// Unbounded lazy stream of records decoded with `deserializer`
    pub fn consume_with(&self, deserializer: Arc<dyn Deserializer>) -> RecordStream {
        RecordStream {
            consumer: self.clone(),
            buffer: PollBatch::new(Vec::new(), Arc::clone(&deserializer)),
            deserializer,
            finished: false,
        }
    }

    /// Release the broker session; later polls fail with
    /// [`KafkaClientError::Closed`]
    pub fn close(&self) -> Result<(), ConsumerError> {
        self.session.close()?;
        log::debug!("Consumer '{}' closed", self.group_id);
        Ok(())
    }
}

impl fmt::Debug for KafkaConsumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KafkaConsumer")
            .field("group_id", &self.group_id)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Anything that names one or more topics
pub trait Topics {
    fn into_topics(self) -> Vec<String>;
}

impl Topics for &str {
    fn into_topics(self) -> Vec<String> {
        vec![self.to_string()]
    }
}

impl Topics for String {
    fn into_topics(self) -> Vec<String> {
        vec![self]
    }
}

impl Topics for &String {
    fn into_topics(self) -> Vec<String> {
        vec![self.clone()]
    }
}

impl<S: AsRef<str>> Topics for &[S] {
    fn into_topics(self) -> Vec<String> {
        self.iter().map(|t| t.as_ref().to_string()).collect()
    }
}

impl<S: AsRef<str>, const N: usize> Topics for [S; N] {
    fn into_topics(self) -> Vec<String> {
        self.iter().map(|t| t.as_ref().to_string()).collect()
    }
}

impl<S: AsRef<str>, const N: usize> Topics for &[S; N] {
    fn into_topics(self) -> Vec<String> {
        self.iter().map(|t| t.as_ref().to_string()).collect()
    }
}

impl<S: AsRef<str>> Topics for Vec<S> {
    fn into_topics(self) -> Vec<String> {
        self.iter().map(|t| t.as_ref().to_string()).collect()
    }
}

impl<S: AsRef<str>> Topics for &Vec<S> {
    fn into_topics(self) -> Vec<String> {
        self.iter().map(|t| t.as_ref().to_string()).collect()
    }
}

impl Topics for BTreeSet<String> {
    fn into_topics(self) -> Vec<String> {
        self.into_iter().collect()
    }
}

/// Decode a broker record's key and value
///
/// Failures carry the record's coordinates and the bytes that did not
/// decode; the record is never replaced by a default.
pub fn decode_record(
    raw: RawRecord,
    deserializer: &dyn Deserializer,
) -> Result<ConsumerRecord, ConsumerError> {
    let topic = raw.topic().to_string();
    let (partition, offset) = (raw.partition(), raw.offset());
    let decode = |field: &'static str, bytes: Option<Vec<u8>>| -> Result<Value, ConsumerError> {
        match deserializer.deserialize(bytes.as_deref()) {
            Ok(value) => Ok(value),
            Err(source) => {
                log::error!(
                    target: "kafka_consumer",
                    "Failed to deserialize record {}: topic={} partition={} offset={} size={} error={}",
                    field,
                    topic,
                    partition,
                    offset,
                    bytes.as_ref().map_or(0, Vec::len),
                    source
                );
                Err(KafkaClientError::Decode {
                    topic: topic.clone(),
                    partition,
                    offset,
                    field,
                    bytes,
                    source,
                })
            }
        }
    };
    raw.try_map(|k| decode("key", k), |v| decode("value", v))
}

/// Records returned by one poll
///
/// Decoding happens as elements are read, so a record that fails to decode
/// is reported at its own position and the rest of the batch stays readable.
pub struct PollBatch {
    records: std::vec::IntoIter<RawRecord>,
    deserializer: Arc<dyn Deserializer>,
}

impl PollBatch {
    fn new(records: Vec<RawRecord>, deserializer: Arc<dyn Deserializer>) -> Self {
        Self {
            records: records.into_iter(),
            deserializer,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.records.len() == 0
    }

    /// Decode every record, failing on the first one that does not decode
    pub fn into_records(self) -> Result<Vec<ConsumerRecord>, ConsumerError> {
        self.collect()
    }
}

impl Iterator for PollBatch {
    type Item = Result<ConsumerRecord, ConsumerError>;

    fn next(&mut self) -> Option<Self::Item> {
        let raw = self.records.next()?;
        Some(decode_record(raw, self.deserializer.as_ref()))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.records.size_hint()
    }
}

impl ExactSizeIterator for PollBatch {}

impl fmt::Debug for PollBatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PollBatch")
            .field("remaining", &self.records.len())
            .finish()
    }
}

/// Unbounded, pull-driven record sequence
///
/// Each call to `next` returns a buffered record if there is one; only when
/// the buffer is empty does it block on a single poll. Nothing is fetched
/// ahead of demand and no background thread is involved. A poll failure is
/// yielded as an `Err` element. Once the consumer is closed or its broker
/// connection is gone, that error is yielded one last time and the stream
/// ends.
pub struct RecordStream {
    consumer: KafkaConsumer,
    deserializer: Arc<dyn Deserializer>,
    buffer: PollBatch,
    finished: bool,
}

impl RecordStream {
    /// Lazy projection onto record values
    pub fn values(self) -> impl Iterator<Item = Result<Value, ConsumerError>> {
        values(self)
    }

    pub fn consumer(&self) -> &KafkaConsumer {
        &self.consumer
    }
}

impl Iterator for RecordStream {
    type Item = Result<ConsumerRecord, ConsumerError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(record) = self.buffer.next() {
                return Some(record);
            }
            if self.finished {
                return None;
            }
            match self
                .consumer
                .poll_once_with(POLL_FOREVER, Arc::clone(&self.deserializer))
            {
                Ok(batch) => self.buffer = batch,
                Err(e @ (KafkaClientError::Closed | KafkaClientError::Connection { .. })) => {
                    self.finished = true;
                    return Some(Err(e));
                }
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

impl fmt::Debug for RecordStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordStream")
            .field("consumer", &self.consumer)
            .field("buffered", &self.buffer.len())
            .field("finished", &self.finished)
            .finish()
    }
}

/// Project a record sequence onto its values, keeping order and laziness
pub fn values<I, K, V>(records: I) -> impl Iterator<Item = Result<V, ConsumerError>>
where
    I: IntoIterator<Item = Result<ConsumerRecord<K, V>, ConsumerError>>,
{
    records
        .into_iter()
        .map(|record| record.map(ConsumerRecord::into_value))
}

/// Options for [`topics_to_records`]
#[derive(Clone, Default)]
pub struct StreamOptions {
    /// Consumer group; a unique one is generated when absent
    pub group_id: Option<String>,
    /// Call-site consumer properties
    pub config: Properties,
    /// Overrides the active deserializer for this stream
    pub deserializer: Option<Arc<dyn Deserializer>>,
}

impl StreamOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn group_id(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    pub fn property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    pub fn deserializer(mut self, deserializer: Arc<dyn Deserializer>) -> Self {
        self.deserializer = Some(deserializer);
        self
    }
}

impl fmt::Debug for StreamOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamOptions")
            .field("group_id", &self.group_id)
            .field("config", &self.config)
            .field("deserializer", &self.deserializer.is_some())
            .finish()
    }
}

/// Create a consumer, subscribe it to `topics` and return its lazy stream
///
/// Without an explicit group id every call joins a fresh group, so it reads
/// each topic from the start (given the default `auto.offset.reset`).
pub fn topics_to_records(
    topics: impl Topics,
    options: StreamOptions,
) -> Result<RecordStream, ConsumerError> {
    let group_id = options.group_id.unwrap_or_else(generate_group_id);
    let consumer = KafkaConsumer::with_config(&group_id, &options.config)?;
    consumer.subscribe(topics)?;
    Ok(match options.deserializer {
        Some(deserializer) => consumer.consume_with(deserializer),
        None => consumer.consume(),
    })
}
