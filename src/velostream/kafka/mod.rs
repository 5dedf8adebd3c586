//! Kafka consumer and producer cores
//!
//! The cores never talk to a broker directly: they open sessions through the
//! [`BrokerClient`] found in the active
//! [`ClientSettings`](crate::velostream::config::ClientSettings).

pub mod client;
pub mod client_config_builder;
pub mod common_config;
pub mod kafka_consumer;
pub mod kafka_error;
pub mod kafka_producer;
pub mod message;
#[cfg(feature = "kafka")]
pub mod rdkafka_client;
pub mod utils;

pub use client::{
    BrokerClient, ConsumerSession, DeliveryFuture, POLL_FOREVER, ProducerSession, Properties,
};
pub use kafka_consumer::{
    KafkaConsumer, PollBatch, RecordStream, StreamOptions, Topics, decode_record,
    topics_to_records, values,
};
pub use kafka_error::{ConsumerError, KafkaClientError, ProducerError};
pub use kafka_producer::{
    DeliveryHandle, KafkaProducer, SendResults, encode, encode_record, send_all, send_many,
    send_one,
};
pub use message::{
    ConsumerRecord, EncodedRecord, ProducerRecord, RawRecord, RecordMetadata, SendResult,
};
#[cfg(feature = "kafka")]
pub use rdkafka_client::{LoggingClientContext, RdKafkaClient};
