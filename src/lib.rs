//! # velostream-kafka
//!
//! A small, synchronous Kafka client abstraction: consumers and producers
//! that exchange [`Value`]s through a pluggable serialization boundary, with
//! connection settings resolved from a thread-scoped configuration and an
//! embedded broker harness for tests.
//!
//! ## Features
//!
//! - **Pluggable codecs**: bincode by default, JSON, raw bytes and UTF-8 strings
//! - **Lazy streams**: [`KafkaConsumer::consume`] polls only when the caller asks for more
//! - **Cached deliveries**: [`send_one`] returns a [`DeliveryHandle`] that resolves once
//! - **Scoped configuration**: [`config::with_settings`] overrides apply to the current thread only
//! - **Embedded broker**: [`with_test_broker`] runs a closure against a throwaway cluster
//! - **librdkafka backend**: enable the `kafka` feature to talk to real brokers and to run
//!   the harness against Docker containers
//!
//! ## Quick Start
//!
//! ```rust
//! use velostream_kafka::{ProducerRecord, StreamOptions, Value, send_one, topics_to_records, with_test_broker};
//!
//! with_test_broker(|| {
//!     let delivered = send_one(ProducerRecord::new("orders", Value::from(42)), None, None).get()?;
//!     assert_eq!(delivered.offset, 0);
//!
//!     let mut stream = topics_to_records("orders", StreamOptions::new())?.values();
//!     assert_eq!(stream.next().transpose()?, Some(Value::from(42)));
//!     Ok::<_, velostream_kafka::TestHarnessError>(())
//! })
//! .unwrap();
//! ```

pub mod velostream;

pub use velostream::config::{self, ClientSettings};
pub use velostream::kafka::{
    BrokerClient, ConsumerRecord, ConsumerSession, DeliveryHandle, KafkaClientError,
    KafkaConsumer, KafkaProducer, ProducerRecord, ProducerSession, Properties, RecordMetadata,
    RecordStream, SendResult, StreamOptions, Topics, send_all, send_many, send_one,
    topics_to_records, values,
};
pub use velostream::serialization::{
    BincodeCodec, Deserializer, JsonCodec, RawCodec, SerializationError, Serializer, StringCodec,
    Value,
};
pub use velostream::test_harness::{TestHarnessError, with_test_broker};
