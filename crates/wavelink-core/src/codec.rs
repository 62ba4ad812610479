//! Compact binary codec for Wavelink frames
//!
//! Every post-handshake frame body is produced by encoding a structured value
//! through this codec and encrypting the resulting bytes under the session
//! key. The codec is self-describing after decryption: a dynamic [`Value`]
//! model covers the scalar and container types the envelope may carry, and
//! encode/decode round-trips exactly for all of them.

use std::collections::BTreeMap;

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::Result;

// ----------------------------------------------------------------------------
// Dynamic Value Model
// ----------------------------------------------------------------------------

/// Dynamic value carried in frame payloads.
///
/// Payload contents are opaque to the transport core; handlers exchange
/// arbitrarily nested maps, arrays and scalars without a fixed schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    Array(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Build a map value from key/value pairs
    pub fn map<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        Value::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v))
                .collect(),
        )
    }

    /// Get a map entry by key, if this value is a map
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Map(map) => map.get(key),
            _ => None,
        }
    }

    /// View this value as a string slice
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// View this value as raw bytes
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

// ----------------------------------------------------------------------------
// Encode / Decode
// ----------------------------------------------------------------------------

/// Encode a serializable value to the compact binary form
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(bincode::serialize(value)?)
}

/// Decode a value from the compact binary form
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(bincode::deserialize(bytes)?)
}

// ----------------------------------------------------------------------------
// JSON Interop
// ----------------------------------------------------------------------------
//
// The diagnostic endpoint speaks plaintext JSON; these conversions let it
// funnel into the same router as encrypted traffic. Bytes values render as
// base64 text on the JSON side.

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else if let Some(u) = n.as_u64() {
                    Value::UInt(u)
                } else {
                    Value::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_json::Value::String(s) => Value::Str(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => Value::Map(
                map.into_iter()
                    .map(|(k, v)| (k, Value::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<Value> for serde_json::Value {
    fn from(v: Value) -> Self {
        use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

        match v {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(b),
            Value::Int(i) => serde_json::Value::from(i),
            Value::UInt(u) => serde_json::Value::from(u),
            Value::Float(f) => serde_json::Number::from_f64(f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Str(s) => serde_json::Value::String(s),
            Value::Bytes(b) => serde_json::Value::String(BASE64.encode(b)),
            Value::Array(items) => {
                serde_json::Value::Array(items.into_iter().map(serde_json::Value::from).collect())
            }
            Value::Map(map) => serde_json::Value::Object(
                map.into_iter()
                    .map(|(k, v)| (k, serde_json::Value::from(v)))
                    .collect(),
            ),
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(value: Value) {
        let bytes = encode(&value).unwrap();
        let decoded: Value = decode(&bytes).unwrap();
        assert_eq!(value, decoded);
    }

    #[test]
    fn test_scalar_roundtrip() {
        roundtrip(Value::Null);
        roundtrip(Value::Bool(true));
        roundtrip(Value::Int(-42));
        roundtrip(Value::UInt(u64::MAX));
        roundtrip(Value::Float(3.5));
        roundtrip(Value::Str("hello".into()));
        roundtrip(Value::Bytes(vec![0, 1, 2, 255]));
    }

    #[test]
    fn test_nested_container_roundtrip() {
        let value = Value::map([
            ("name", Value::from("alice")),
            (
                "posts",
                Value::Array(vec![
                    Value::map([("id", Value::Int(1)), ("likes", Value::UInt(7))]),
                    Value::map([
                        ("id", Value::Int(2)),
                        ("attachment", Value::Bytes(vec![0xde, 0xad])),
                    ]),
                ]),
            ),
            ("deleted", Value::Null),
        ]);
        roundtrip(value);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let result: crate::Result<Value> = decode(&[0xff; 3]);
        assert!(result.is_err());
    }

    #[test]
    fn test_json_interop() {
        let json: serde_json::Value = serde_json::json!({
            "action": "posts/load",
            "count": 3,
            "ratio": 0.5,
            "tags": ["a", "b"],
            "extra": null,
        });

        let value = Value::from(json.clone());
        assert_eq!(value.get("count"), Some(&Value::Int(3)));
        assert_eq!(serde_json::Value::from(value), json);
    }
}
