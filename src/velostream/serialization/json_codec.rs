//! JSON codec for `Value` serialization/deserialization
//!
//! Self-describing and readable by any JSON-speaking client, so this is the
//! codec to pick when the other side of the topic is not this library.
//!
//! Mapping rules:
//! - numbers that fit in `i64` decode as `Integer`, everything else as `Float`
//! - `Bytes` are written as `{"$bytes": "<base64>"}` and read back as bytes
//! - a map whose only key is `$bytes` or `$map` is wrapped as `{"$map": {...}}`
//!   so it cannot be mistaken for a tag
//! - non-finite floats have no JSON form and are rejected

use super::{Deserializer, SerializationError, Serializer, Value};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Map, Number, Value as JsonValue};

const BYTES_TAG: &str = "$bytes";
const MAP_TAG: &str = "$map";

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl JsonCodec {
    pub fn new() -> Self {
        JsonCodec
    }
}

impl Serializer for JsonCodec {
    fn serialize(&self, value: &Value) -> Result<Vec<u8>, SerializationError> {
        let json = to_json_value(value)?;
        serde_json::to_vec(&json)
            .map_err(|e| SerializationError::json_error("Failed to serialize JSON", e))
    }
}

impl Deserializer for JsonCodec {
    fn deserialize(&self, bytes: Option<&[u8]>) -> Result<Value, SerializationError> {
        let Some(bytes) = bytes else {
            return Ok(Value::Null);
        };
        let json: JsonValue = serde_json::from_slice(bytes)
            .map_err(|e| SerializationError::json_error("Failed to parse JSON", e))?;
        Ok(from_json_value(json))
    }
}

/// Convert a `Value` into the JSON data model
pub fn to_json_value(value: &Value) -> Result<JsonValue, SerializationError> {
    Ok(match value {
        Value::Null => JsonValue::Null,
        Value::Boolean(b) => JsonValue::Bool(*b),
        Value::Integer(i) => JsonValue::Number((*i).into()),
        Value::Float(f) => Number::from_f64(*f)
            .map(JsonValue::Number)
            .ok_or_else(|| SerializationError::unsupported("json", value))?,
        Value::String(s) => JsonValue::String(s.clone()),
        Value::Bytes(b) => {
            let mut tagged = Map::with_capacity(1);
            tagged.insert(BYTES_TAG.to_string(), JsonValue::String(STANDARD.encode(b)));
            JsonValue::Object(tagged)
        }
        Value::Array(items) => JsonValue::Array(
            items
                .iter()
                .map(to_json_value)
                .collect::<Result<Vec<_>, _>>()?,
        ),
        Value::Map(entries) => {
            let mut object = Map::with_capacity(entries.len());
            for (k, v) in entries {
                object.insert(k.clone(), to_json_value(v)?);
            }
            if looks_tagged(&object) {
                let mut escaped = Map::with_capacity(1);
                escaped.insert(MAP_TAG.to_string(), JsonValue::Object(object));
                JsonValue::Object(escaped)
            } else {
                JsonValue::Object(object)
            }
        }
    })
}

/// Convert parsed JSON back into a `Value`
pub fn from_json_value(json: JsonValue) -> Value {
    match json {
        JsonValue::Null => Value::Null,
        JsonValue::Bool(b) => Value::Boolean(b),
        JsonValue::Number(n) => match n.as_i64() {
            Some(i) => Value::Integer(i),
            None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
        },
        JsonValue::String(s) => Value::String(s),
        JsonValue::Array(items) => Value::Array(items.into_iter().map(from_json_value).collect()),
        JsonValue::Object(object) => {
            if let Some(bytes) = tagged_bytes(&object) {
                return Value::Bytes(bytes);
            }
            Value::Map(
                unescape_map(object)
                    .into_iter()
                    .map(|(k, v)| (k, from_json_value(v)))
                    .collect(),
            )
        }
    }
}

fn looks_tagged(object: &Map<String, JsonValue>) -> bool {
    object.len() == 1 && (object.contains_key(BYTES_TAG) || object.contains_key(MAP_TAG))
}

fn unescape_map(mut object: Map<String, JsonValue>) -> Map<String, JsonValue> {
    if object.len() == 1 && matches!(object.get(MAP_TAG), Some(JsonValue::Object(_))) {
        if let Some(JsonValue::Object(inner)) = object.remove(MAP_TAG) {
            return inner;
        }
    }
    object
}

fn tagged_bytes(object: &Map<String, JsonValue>) -> Option<Vec<u8>> {
    if object.len() != 1 {
        return None;
    }
    match object.get(BYTES_TAG) {
        Some(JsonValue::String(encoded)) => STANDARD.decode(encoded).ok(),
        _ => None,
    }
}
