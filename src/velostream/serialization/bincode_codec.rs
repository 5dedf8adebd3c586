//! Structural binary codec
//!
//! Writes the `Value` tree with bincode. Every variant round-trips exactly,
//! including raw bytes and the integer/float distinction, which makes it
//! the library default. The layout is bincode's, so only peers using the
//! same codec can read it; use [`JsonCodec`](super::JsonCodec) to talk to
//! anything else.

use super::{Deserializer, SerializationError, Serializer, Value};

#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeCodec;

impl BincodeCodec {
    pub fn new() -> Self {
        BincodeCodec
    }
}

impl Serializer for BincodeCodec {
    fn serialize(&self, value: &Value) -> Result<Vec<u8>, SerializationError> {
        bincode::serialize(value)
            .map_err(|e| SerializationError::binary_error("Failed to serialize value", e))
    }
}

impl Deserializer for BincodeCodec {
    fn deserialize(&self, bytes: Option<&[u8]>) -> Result<Value, SerializationError> {
        match bytes {
            None => Ok(Value::Null),
            Some(bytes) => bincode::deserialize(bytes)
                .map_err(|e| SerializationError::binary_error("Failed to deserialize value", e)),
        }
    }
}
