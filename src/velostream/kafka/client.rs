//! Broker client capability
//!
//! Everything that actually talks to a broker sits behind these traits:
//! connection management, partition assignment, retries and acknowledgments
//! are the implementation's business. The consumer and producer cores only
//! open sessions and move records through them.
//!
//! Implementations shipped with the crate:
//!
//! - `RdKafkaClient` (feature `kafka`): librdkafka through `rdkafka`
//! - [`MemoryClient`](crate::velostream::test_harness::memory::MemoryClient):
//!   in-process brokers started by the test harness

use super::kafka_error::KafkaClientError;
use super::message::{EncodedRecord, RawRecord, RecordMetadata};
use futures::future::BoxFuture;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

/// Flat string configuration, the same shape librdkafka takes
pub type Properties = BTreeMap<String, String>;

/// Poll timeout that blocks until records arrive
pub const POLL_FOREVER: Duration = Duration::MAX;

/// Future resolving to the broker's acknowledgment of one send
pub type DeliveryFuture = BoxFuture<'static, Result<RecordMetadata, KafkaClientError>>;

/// Factory for broker sessions
pub trait BrokerClient: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Open a consumer session; fails with `Connection` when no broker at
    /// `bootstrap.servers` answers.
    fn open_consumer(
        &self,
        config: &Properties,
    ) -> Result<Box<dyn ConsumerSession>, KafkaClientError>;

    /// Open a producer session; same connection contract as consumers
    fn open_producer(
        &self,
        config: &Properties,
    ) -> Result<Box<dyn ProducerSession>, KafkaClientError>;
}

/// One consumer group member
pub trait ConsumerSession: Send + Sync {
    /// Replace the current subscription with `topics`
    fn subscribe(&self, topics: &[String]) -> Result<(), KafkaClientError>;

    /// Topics currently subscribed, empty when none
    fn subscription(&self) -> Result<BTreeSet<String>, KafkaClientError>;

    /// Wait at most `timeout` for records and return what is available,
    /// possibly nothing.
    fn poll(&self, timeout: Duration) -> Result<Vec<RawRecord>, KafkaClientError>;

    fn close(&self) -> Result<(), KafkaClientError>;
}

/// One producer connection
pub trait ProducerSession: Send + Sync {
    /// Hand the record to the client; the returned future resolves once the
    /// broker acknowledges or rejects it.
    fn send(&self, record: EncodedRecord) -> DeliveryFuture;

    /// Wait for every outstanding send
    fn flush(&self, timeout: Duration) -> Result<(), KafkaClientError>;

    fn close(&self) -> Result<(), KafkaClientError>;
}
