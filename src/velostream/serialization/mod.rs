//! Serialization boundary between in-process values and Kafka bytes
//!
//! A [`Serializer`] turns a [`Value`] into bytes for the producer and a
//! [`Deserializer`] turns record bytes back into a [`Value`] for the
//! consumer. Both are object safe so the process-wide defaults in
//! [`ClientSettings`](crate::velostream::config::ClientSettings) can be
//! swapped at runtime, and both are implemented for plain closures.
//!
//! Codecs shipped with the crate:
//!
//! - [`BincodeCodec`]: structural binary codec, exact round trip for every
//!   `Value`, no portability guarantee across implementations (default)
//! - [`JsonCodec`]: self-describing text codec for interoperability
//! - [`RawCodec`]: pass-through of raw bytes
//! - [`StringCodec`]: UTF-8 text

pub mod bincode_codec;
pub mod json_codec;
pub mod raw_codec;
pub mod value;

pub use bincode_codec::BincodeCodec;
pub use json_codec::JsonCodec;
pub use raw_codec::{RawCodec, StringCodec};
pub use value::Value;

/// Errors raised while encoding or decoding a [`Value`]
///
/// Sources are kept as rendered strings so the error stays `Clone`; a
/// resolved delivery handle hands the same error out on every read.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SerializationError {
    /// Binary (bincode) encoding failure
    #[error("Binary serialization error: {message}: {cause}")]
    Binary { message: String, cause: String },

    /// JSON encoding failure
    #[error("JSON serialization error: {message}: {cause}")]
    Json { message: String, cause: String },

    /// Bytes were not valid UTF-8 where text was expected
    #[error("Invalid UTF-8: {0}")]
    Utf8(String),

    /// The codec cannot represent this kind of value
    #[error("{codec} codec cannot encode {value_type} values")]
    Unsupported {
        codec: &'static str,
        value_type: &'static str,
    },
}

impl SerializationError {
    pub fn binary_error(message: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        SerializationError::Binary {
            message: message.into(),
            cause: cause.to_string(),
        }
    }

    pub fn json_error(message: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        SerializationError::Json {
            message: message.into(),
            cause: cause.to_string(),
        }
    }

    pub fn unsupported(codec: &'static str, value: &Value) -> Self {
        SerializationError::Unsupported {
            codec,
            value_type: value.type_name(),
        }
    }
}

/// Encodes application values into the bytes sent to the broker
pub trait Serializer: Send + Sync {
    fn serialize(&self, value: &Value) -> Result<Vec<u8>, SerializationError>;
}

/// Decodes record bytes back into application values
///
/// `None` means the record carried no bytes (a null key or a tombstone
/// payload). Implementations must map it to `Value::Null` instead of
/// failing.
pub trait Deserializer: Send + Sync {
    fn deserialize(&self, bytes: Option<&[u8]>) -> Result<Value, SerializationError>;
}

impl<F> Serializer for F
where
    F: Fn(&Value) -> Result<Vec<u8>, SerializationError> + Send + Sync,
{
    fn serialize(&self, value: &Value) -> Result<Vec<u8>, SerializationError> {
        self(value)
    }
}

impl<F> Deserializer for F
where
    F: Fn(Option<&[u8]>) -> Result<Value, SerializationError> + Send + Sync,
{
    fn deserialize(&self, bytes: Option<&[u8]>) -> Result<Value, SerializationError> {
        self(bytes)
    }
}
