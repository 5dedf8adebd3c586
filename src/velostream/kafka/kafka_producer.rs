use crate::velostream::config;
use crate::velostream::kafka::client::{DeliveryFuture, ProducerSession, Properties};
use crate::velostream::kafka::client_config_builder::ClientConfigBuilder;
use crate::velostream::kafka::common_config::producer_defaults;
use crate::velostream::kafka::kafka_error::{KafkaClientError, ProducerError};
use crate::velostream::kafka::message::{EncodedRecord, ProducerRecord, SendResult};
use crate::velostream::serialization::Serializer;
use std::fmt;
use std::ops::Deref;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;

/// How long a producer opened on the caller's behalf waits for its
/// outstanding sends before the session is released
pub const IMPLICIT_PRODUCER_FLUSH_TIMEOUT: Duration = Duration::from_secs(30);

/// A Kafka producer that encodes records through the active [`Serializer`]
///
/// Sends are dispatched immediately and acknowledged asynchronously by the
/// broker client; each send returns a [`DeliveryHandle`] that blocks only
/// when its result is asked for. Cloning is cheap and shares the session.
///
/// ```rust,no_run
/// use velostream_kafka::{KafkaProducer, ProducerRecord, Value};
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let producer = KafkaProducer::new()?;
///     let handle = producer.send(ProducerRecord::new("orders", Value::from("hello")));
///     let sent = handle.get()?;
///     println!("written to {}[{}]@{}", sent.topic, sent.partition, sent.offset);
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct KafkaProducer {
    session: Arc<dyn ProducerSession>,
    config: Properties,
}

impl KafkaProducer {
    /// Creates a producer from the active settings
    pub fn new() -> Result<Self, ProducerError> {
        Self::with_config(&Properties::new())
    }

    /// Creates a producer with call-site properties layered over the
    /// library defaults and the active producer overlay
    pub fn with_config(overlay: &Properties) -> Result<Self, ProducerError> {
        let settings = config::current();
        let config = ClientConfigBuilder::new()
            .properties(&producer_defaults(&settings.bootstrap_servers))
            .properties(&settings.producer_config)
            .properties(overlay)
            .build();

        let session = settings.client.open_producer(&config)?;
        log::info!(
            "Created {} producer connected to {}",
            settings.client.name(),
            settings.bootstrap_servers
        );

        Ok(KafkaProducer {
            session: Arc::from(session),
            config,
        })
    }

    /// The merged properties the session was opened with
    pub fn config(&self) -> &Properties {
        &self.config
    }

    /// Encode and dispatch with the active serializer
    pub fn send(&self, record: ProducerRecord) -> DeliveryHandle {
        self.send_with(record, config::current().serializer.as_ref())
    }

    /// Encode and dispatch with `serializer`
    pub fn send_with(&self, record: ProducerRecord, serializer: &dyn Serializer) -> DeliveryHandle {
        let pending = self.dispatch(&record, serializer);
        DeliveryHandle::pending(record, pending, None)
    }

    /// Dispatch every record, then resolve each one as it is read
    ///
    /// All records are handed to the broker client before any
    /// acknowledgment is awaited. Every handle is retained until read, so
    /// this is not meant for unbounded input; use [`send_all`](Self::send_all).
    pub fn send_many<I>(&self, records: I, serializer: Option<&dyn Serializer>) -> SendResults
    where
        I: IntoIterator<Item = ProducerRecord>,
    {
        let active = config::current().serializer;
        let serializer = serializer.unwrap_or(active.as_ref());
        let handles: Vec<DeliveryHandle> = records
            .into_iter()
            .map(|record| self.send_with(record, serializer))
            .collect();
        log::debug!("Dispatched {} records", handles.len());
        SendResults {
            handles: handles.into_iter(),
            producer: None,
        }
    }

    /// Dispatch records as the input is drained, discarding acknowledgments
    ///
    /// Works with infinite iterators. A record that fails to encode or
    /// dispatch is logged and skipped; later records are still sent.
    /// Returns the number of records handed to the broker client.
    pub fn send_all<I>(&self, records: I, serializer: Option<&dyn Serializer>) -> usize
    where
        I: IntoIterator<Item = ProducerRecord>,
    {
        let active = config::current().serializer;
        let serializer = serializer.unwrap_or(active.as_ref());
        let mut dispatched = 0;
        for record in records {
            match self.dispatch(&record, serializer) {
                Ok(_delivery) => dispatched += 1,
                Err(e) => log::warn!(
                    "Skipping record for topic '{}': {}",
                    record.topic(),
                    e
                ),
            }
        }
        log::debug!("Dispatched {} records without awaiting delivery", dispatched);
        dispatched
    }

    /// Wait for every outstanding send
    pub fn flush(&self, timeout: Duration) -> Result<(), ProducerError> {
        self.session.flush(timeout)
    }

    /// Flush and release the session; later sends fail with
    /// [`KafkaClientError::Closed`]
    pub fn close(&self) -> Result<(), ProducerError> {
        self.session.close()
    }

    fn dispatch(
        &self,
        record: &ProducerRecord,
        serializer: &dyn Serializer,
    ) -> Result<DeliveryFuture, ProducerError> {
        match encode(record, serializer) {
            Ok(encoded) => Ok(self.session.send(encoded)),
            Err(e) => {
                log::error!(
                    "Failed to encode record for topic '{}': {}",
                    record.topic(),
                    e
                );
                Err(e)
            }
        }
    }
}

impl fmt::Debug for KafkaProducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KafkaProducer")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Apply `serializer` to the key (when present) and value, leaving topic,
/// partition and timestamp untouched
pub fn encode(
    record: &ProducerRecord,
    serializer: &dyn Serializer,
) -> Result<EncodedRecord, ProducerError> {
    record
        .clone()
        .try_map(|key| serializer.serialize(&key), |value| serializer.serialize(&value))
        .map_err(ProducerError::from)
}

/// [`encode`] with the active serializer
pub fn encode_record(record: &ProducerRecord) -> Result<EncodedRecord, ProducerError> {
    encode(record, config::current().serializer.as_ref())
}

/// Producer opened by the free send functions when the caller gave none
///
/// The broker client may purge queued sends when its session goes away, so
/// the session is flushed before it is released.
struct ImplicitProducer(KafkaProducer);

impl ImplicitProducer {
    fn open() -> Result<Self, ProducerError> {
        KafkaProducer::new().map(ImplicitProducer)
    }
}

impl Deref for ImplicitProducer {
    type Target = KafkaProducer;

    fn deref(&self) -> &KafkaProducer {
        &self.0
    }
}

impl Drop for ImplicitProducer {
    fn drop(&mut self) {
        if let Err(e) = self.0.flush(IMPLICIT_PRODUCER_FLUSH_TIMEOUT) {
            log::warn!("Outstanding sends may be lost: flush failed: {}", e);
        }
    }
}

/// Send one record, creating a producer when none is given
///
/// Without a producer every call opens a new broker session. The handle
/// owns that session; dropping the handle flushes it, so fire-and-forget
/// sends are still delivered. Failures to create the producer are
/// delivered through the handle like any other.
pub fn send_one(
    record: ProducerRecord,
    producer: Option<&KafkaProducer>,
    serializer: Option<&dyn Serializer>,
) -> DeliveryHandle {
    let active = config::current().serializer;
    let serializer = serializer.unwrap_or(active.as_ref());
    match producer {
        Some(producer) => producer.send_with(record, serializer),
        None => match ImplicitProducer::open() {
            Ok(producer) => {
                let pending = producer.dispatch(&record, serializer);
                DeliveryHandle::pending(record, pending, Some(Arc::new(producer)))
            }
            Err(e) => DeliveryHandle::pending(record, Err(e), None),
        },
    }
}

/// [`KafkaProducer::send_many`], creating one producer when none is given
///
/// An implicit producer lives as long as the returned [`SendResults`].
pub fn send_many<I>(
    records: I,
    producer: Option<&KafkaProducer>,
    serializer: Option<&dyn Serializer>,
) -> Result<SendResults, ProducerError>
where
    I: IntoIterator<Item = ProducerRecord>,
{
    match producer {
        Some(producer) => Ok(producer.send_many(records, serializer)),
        None => {
            let producer = ImplicitProducer::open()?;
            let mut results = producer.send_many(records, serializer);
            results.producer = Some(Arc::new(producer));
            Ok(results)
        }
    }
}

/// [`KafkaProducer::send_all`], creating one producer when none is given
///
/// An implicit producer is flushed before this returns.
pub fn send_all<I>(
    records: I,
    producer: Option<&KafkaProducer>,
    serializer: Option<&dyn Serializer>,
) -> Result<usize, ProducerError>
where
    I: IntoIterator<Item = ProducerRecord>,
{
    match producer {
        Some(producer) => Ok(producer.send_all(records, serializer)),
        None => {
            let producer = ImplicitProducer::open()?;
            let dispatched = producer.send_all(records, serializer);
            producer.flush(IMPLICIT_PRODUCER_FLUSH_TIMEOUT)?;
            Ok(dispatched)
        }
    }
}

type Pending = (ProducerRecord, Result<DeliveryFuture, ProducerError>);

/// Deferred result of one send
///
/// [`get`](Self::get) blocks until the broker acknowledges the record and
/// returns the original key and value overlaid with the broker's metadata.
/// The outcome is computed once and cached; every later call returns it
/// again. Dropping the handle abandons the acknowledgment, not the send.
pub struct DeliveryHandle {
    result: OnceLock<Result<SendResult, ProducerError>>,
    pending: Mutex<Option<Pending>>,
    _producer: Option<Arc<ImplicitProducer>>,
}

impl DeliveryHandle {
    fn pending(
        record: ProducerRecord,
        delivery: Result<DeliveryFuture, ProducerError>,
        producer: Option<Arc<ImplicitProducer>>,
    ) -> Self {
        Self {
            result: OnceLock::new(),
            pending: Mutex::new(Some((record, delivery))),
            _producer: producer,
        }
    }

    /// Block until the send resolves
    pub fn get(&self) -> Result<SendResult, ProducerError> {
        self.resolve().clone()
    }

    /// The cached outcome, if the handle has been resolved
    pub fn try_get(&self) -> Option<&Result<SendResult, ProducerError>> {
        self.result.get()
    }

    pub fn is_resolved(&self) -> bool {
        self.result.get().is_some()
    }

    fn resolve(&self) -> &Result<SendResult, ProducerError> {
        self.result.get_or_init(|| {
            let pending = self
                .pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            match pending {
                Some((record, Ok(delivery))) => futures::executor::block_on(delivery)
                    .map(|metadata| SendResult::merge(record, metadata)),
                Some((_, Err(e))) => Err(e),
                // get_or_init runs this closure at most once
                None => Err(KafkaClientError::broker("delivery already consumed")),
            }
        })
    }
}

impl fmt::Debug for DeliveryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeliveryHandle")
            .field("result", &self.result.get())
            .finish_non_exhaustive()
    }
}

/// Results of [`KafkaProducer::send_many`], resolved one element at a time
pub struct SendResults {
    // Dropped before the producer that owns their sends
    handles: std::vec::IntoIter<DeliveryHandle>,
    producer: Option<Arc<ImplicitProducer>>,
}

impl fmt::Debug for SendResults {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SendResults")
            .field("handles", &self.handles)
            .finish_non_exhaustive()
    }
}

impl SendResults {
    /// Take the unresolved handles instead of iterating
    ///
    /// Each handle shares ownership of an implicit producer.
    pub fn into_handles(self) -> Vec<DeliveryHandle> {
        let producer = self.producer;
        self.handles
            .map(|mut handle| {
                handle._producer = producer.clone();
                handle
            })
            .collect()
    }
}

impl Iterator for SendResults {
    type Item = Result<SendResult, ProducerError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.handles.next().map(|handle| handle.get())
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.handles.size_hint()
    }
}

impl ExactSizeIterator for SendResults {}
