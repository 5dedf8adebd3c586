use crate::velostream::serialization::SerializationError;

/// Unified error type for Kafka producer and consumer operations
///
/// Cloneable so that a resolved [`DeliveryHandle`](super::DeliveryHandle) can
/// hand the same failure to every caller of `get()`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum KafkaClientError {
    /// No broker reachable at the configured bootstrap servers
    #[error("Unable to connect to brokers '{brokers}': {message}")]
    Connection { brokers: String, message: String },

    /// Record bytes could not be decoded; carries the offending bytes
    #[error(
        "Failed to decode {field} of record {topic}[{partition}]@{offset} ({} bytes): {source}",
        .bytes.as_ref().map_or(0, Vec::len)
    )]
    Decode {
        topic: String,
        partition: i32,
        offset: i64,
        /// `"key"` or `"value"`
        field: &'static str,
        bytes: Option<Vec<u8>>,
        #[source]
        source: SerializationError,
    },

    /// Outbound key or value could not be encoded
    #[error("Serialization error: {0}")]
    Encode(#[from] SerializationError),

    /// The broker rejected or never acknowledged a send
    #[error("Failed to send record to topic '{topic}': {message}")]
    Send { topic: String, message: String },

    /// Invalid client configuration
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// The consumer or producer has been closed
    #[error("Client has been closed")]
    Closed,

    /// Broker side failure not covered by the other variants
    #[error("Broker error: {message}")]
    Broker { message: String },

    /// Underlying Kafka library error
    #[cfg(feature = "kafka")]
    #[error("Kafka error: {0}")]
    KafkaError(#[from] rdkafka::error::KafkaError),
}

impl KafkaClientError {
    pub fn connection(brokers: impl Into<String>, message: impl Into<String>) -> Self {
        KafkaClientError::Connection {
            brokers: brokers.into(),
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        KafkaClientError::Config {
            message: message.into(),
        }
    }

    pub fn broker(message: impl Into<String>) -> Self {
        KafkaClientError::Broker {
            message: message.into(),
        }
    }

    pub fn send(topic: impl Into<String>, message: impl Into<String>) -> Self {
        KafkaClientError::Send {
            topic: topic.into(),
            message: message.into(),
        }
    }
}

/// Type alias for producer operations
pub type ProducerError = KafkaClientError;

/// Type alias for consumer operations
pub type ConsumerError = KafkaClientError;

pub type Result<T, E = KafkaClientError> = std::result::Result<T, E>;
