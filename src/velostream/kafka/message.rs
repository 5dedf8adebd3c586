//! Record types exchanged with the broker
//!
//! [`ConsumerRecord`] is what a poll yields, [`ProducerRecord`] is what a send
//! accepts. Both are generic over key and value so the same shapes describe
//! the undecoded wire form ([`RawRecord`], [`EncodedRecord`]) and the decoded
//! application form (the `Value` defaults).

use crate::velostream::serialization::Value;

/// Inbound record as delivered by the broker
///
/// Fields are fixed once the consumer builds the record; use the accessors
/// or [`into_parts`](Self::into_parts) to take it apart.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumerRecord<K = Value, V = Value> {
    key: K,
    value: V,
    topic: String,
    partition: i32,
    offset: i64,
    timestamp: i64,
    checksum: i64,
}

/// Inbound record before decoding; `None` means the broker sent no bytes
pub type RawRecord = ConsumerRecord<Option<Vec<u8>>, Option<Vec<u8>>>;

impl<K, V> ConsumerRecord<K, V> {
    pub fn new(
        topic: impl Into<String>,
        partition: i32,
        offset: i64,
        timestamp: i64,
        checksum: i64,
        key: K,
        value: V,
    ) -> Self {
        Self {
            key,
            value,
            topic: topic.into(),
            partition,
            offset,
            timestamp,
            checksum,
        }
    }

    pub fn key(&self) -> &K {
        &self.key
    }

    pub fn value(&self) -> &V {
        &self.value
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn partition(&self) -> i32 {
        self.partition
    }

    pub fn offset(&self) -> i64 {
        self.offset
    }

    /// Broker timestamp in milliseconds since the Unix epoch
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn checksum(&self) -> i64 {
        self.checksum
    }

    /// Consumes the record and returns the owned value
    pub fn into_value(self) -> V {
        self.value
    }

    /// Consumes the record and returns key and value
    pub fn into_parts(self) -> (K, V) {
        (self.key, self.value)
    }

    /// Rebuild the record with a new key and value, keeping its coordinates.
    ///
    /// The consumer uses this to turn a [`RawRecord`] into a decoded record.
    pub fn try_map<K2, V2, E>(
        self,
        decode_key: impl FnOnce(K) -> Result<K2, E>,
        decode_value: impl FnOnce(V) -> Result<V2, E>,
    ) -> Result<ConsumerRecord<K2, V2>, E> {
        Ok(ConsumerRecord {
            key: decode_key(self.key)?,
            value: decode_value(self.value)?,
            topic: self.topic,
            partition: self.partition,
            offset: self.offset,
            timestamp: self.timestamp,
            checksum: self.checksum,
        })
    }
}

/// Outbound record
///
/// Topic and value are mandatory; key, partition and timestamp are left to
/// the broker unless set.
///
/// ```rust
/// # use velostream_kafka::{ProducerRecord, Value};
/// let record = ProducerRecord::new("orders", Value::from("payload"))
///     .with_key(Value::from("order-1"))
///     .with_partition(0);
/// assert_eq!(record.partition(), Some(0));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ProducerRecord<K = Value, V = Value> {
    topic: String,
    value: V,
    key: Option<K>,
    partition: Option<i32>,
    timestamp: Option<i64>,
}

/// Outbound record after encoding
pub type EncodedRecord = ProducerRecord<Vec<u8>, Vec<u8>>;

impl<K, V> ProducerRecord<K, V> {
    pub fn new(topic: impl Into<String>, value: V) -> Self {
        Self {
            topic: topic.into(),
            value,
            key: None,
            partition: None,
            timestamp: None,
        }
    }

    pub fn with_key(mut self, key: K) -> Self {
        self.key = Some(key);
        self
    }

    pub fn with_partition(mut self, partition: i32) -> Self {
        self.partition = Some(partition);
        self
    }

    /// Milliseconds since the Unix epoch
    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn value(&self) -> &V {
        &self.value
    }

    pub fn key(&self) -> Option<&K> {
        self.key.as_ref()
    }

    pub fn partition(&self) -> Option<i32> {
        self.partition
    }

    pub fn timestamp(&self) -> Option<i64> {
        self.timestamp
    }

    /// Re-encode key and value, leaving everything else untouched
    pub fn try_map<K2, V2, E>(
        self,
        mut encode_key: impl FnMut(K) -> Result<K2, E>,
        mut encode_value: impl FnMut(V) -> Result<V2, E>,
    ) -> Result<ProducerRecord<K2, V2>, E> {
        Ok(ProducerRecord {
            topic: self.topic,
            value: encode_value(self.value)?,
            key: self.key.map(&mut encode_key).transpose()?,
            partition: self.partition,
            timestamp: self.timestamp,
        })
    }
}

/// Coordinates the broker assigned to an acknowledged send
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordMetadata {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub timestamp: i64,
    pub checksum: i64,
}

/// The record a caller sent, overlaid with the broker's metadata
#[derive(Debug, Clone, PartialEq)]
pub struct SendResult<K = Value, V = Value> {
    pub key: Option<K>,
    pub value: V,
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub timestamp: i64,
    pub checksum: i64,
}

impl<K, V> SendResult<K, V> {
    /// Merge broker metadata onto the original record; the broker's topic,
    /// partition and timestamp win over whatever the record asked for.
    pub fn merge(record: ProducerRecord<K, V>, metadata: RecordMetadata) -> Self {
        Self {
            key: record.key,
            value: record.value,
            topic: metadata.topic,
            partition: metadata.partition,
            offset: metadata.offset,
            timestamp: metadata.timestamp,
            checksum: metadata.checksum,
        }
    }

    pub fn metadata(&self) -> RecordMetadata {
        RecordMetadata {
            topic: self.topic.clone(),
            partition: self.partition,
            offset: self.offset,
            timestamp: self.timestamp,
            checksum: self.checksum,
        }
    }
}
