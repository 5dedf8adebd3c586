// Common imports and re-exports for client tests

pub use velostream_kafka::velostream::config::{self, ClientSettings};
pub use velostream_kafka::velostream::kafka::{
    ConsumerRecord, DeliveryHandle, KafkaClientError, KafkaConsumer, KafkaProducer,
    ProducerRecord, Properties, StreamOptions, send_all, send_many, send_one, topics_to_records,
};
pub use velostream_kafka::velostream::serialization::{
    BincodeCodec, Deserializer, JsonCodec, RawCodec, SerializationError, Serializer,
    StringCodec, Value,
};
pub use velostream_kafka::velostream::test_harness::{TestHarnessError, with_test_broker};

pub use serial_test::serial;
pub use std::collections::BTreeMap;
pub use std::sync::Arc;
pub use std::time::Duration;
pub use uuid::Uuid;

/// Unique topic name so tests sharing a broker never see each other's data
pub fn unique_topic(prefix: &str) -> String {
    format!("{}-{}", prefix, Uuid::new_v4())
}

/// A map value with a few nested shapes
pub fn sample_order(id: i64) -> Value {
    let mut order = BTreeMap::new();
    order.insert("id".to_string(), Value::Integer(id));
    order.insert("customer".to_string(), Value::from("acme"));
    order.insert("amount".to_string(), Value::Float(12.5));
    order.insert(
        "tags".to_string(),
        Value::Array(vec![Value::from("new"), Value::Null]),
    );
    Value::Map(order)
}

/// Route env_logger output through the test harness capture
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
