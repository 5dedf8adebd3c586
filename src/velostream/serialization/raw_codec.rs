//! Byte and text codecs
//!
//! These two do not describe structure at all. They exist for topics whose
//! payloads are opaque blobs or plain strings produced by some other system.

use super::{Deserializer, SerializationError, Serializer, Value};

/// Pass-through codec: `Bytes` and `String` go out as their bytes, bytes come
/// back as `Value::Bytes`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawCodec;

impl Serializer for RawCodec {
    fn serialize(&self, value: &Value) -> Result<Vec<u8>, SerializationError> {
        match value {
            Value::Bytes(b) => Ok(b.clone()),
            Value::String(s) => Ok(s.as_bytes().to_vec()),
            other => Err(SerializationError::unsupported("raw", other)),
        }
    }
}

impl Deserializer for RawCodec {
    fn deserialize(&self, bytes: Option<&[u8]>) -> Result<Value, SerializationError> {
        Ok(bytes.map(Value::from).unwrap_or(Value::Null))
    }
}

/// UTF-8 text codec
///
/// Scalars are written using their display form, so an `Integer(5)` goes out
/// as `"5"` and comes back as the string `"5"`. Only strings round-trip.
#[derive(Debug, Clone, Copy, Default)]
pub struct StringCodec;

impl Serializer for StringCodec {
    fn serialize(&self, value: &Value) -> Result<Vec<u8>, SerializationError> {
        match value {
            Value::String(s) => Ok(s.as_bytes().to_vec()),
            Value::Boolean(_) | Value::Integer(_) | Value::Float(_) => {
                Ok(value.to_string().into_bytes())
            }
            other => Err(SerializationError::unsupported("string", other)),
        }
    }
}

impl Deserializer for StringCodec {
    fn deserialize(&self, bytes: Option<&[u8]>) -> Result<Value, SerializationError> {
        let Some(bytes) = bytes else {
            return Ok(Value::Null);
        };
        String::from_utf8(bytes.to_vec())
            .map(Value::String)
            .map_err(|e| SerializationError::Utf8(e.to_string()))
    }
}
