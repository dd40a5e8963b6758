//! Tagged store values

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::de::Error as _;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A value read from the store, classified once at ingestion.
///
/// Serializes as a plain JSON string for text and as
/// `{"binary": "<base64>"}` for opaque bytes, so the dashboard can tell the
/// two apart and the raw bytes survive the trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// Valid UTF-8 without any zero byte.
    Text(String),
    /// Anything else, untouched.
    Binary(Vec<u8>),
}

impl Value {
    /// Classify raw bytes.
    ///
    /// A zero byte marks the value binary outright; otherwise a UTF-8 decode
    /// is attempted and a failed decode falls back to binary.
    pub fn from_raw(raw: Vec<u8>) -> Self {
        if raw.contains(&0) {
            return Value::Binary(raw);
        }
        match String::from_utf8(raw) {
            Ok(text) => Value::Text(text),
            Err(err) => Value::Binary(err.into_bytes()),
        }
    }

    /// Raw bytes of this value.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Value::Text(text) => text.as_bytes(),
            Value::Binary(bytes) => bytes,
        }
    }

    /// True for the binary variant.
    pub fn is_binary(&self) -> bool {
        matches!(self, Value::Binary(_))
    }
}

impl From<&str> for Value {
    fn from(text: &str) -> Self {
        Value::Text(text.to_string())
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Text(text) => serializer.serialize_str(text),
            Value::Binary(bytes) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("binary", &STANDARD.encode(bytes))?;
                map.end()
            }
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WireValue {
    Text(String),
    Binary { binary: String },
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match WireValue::deserialize(deserializer)? {
            WireValue::Text(text) => Ok(Value::Text(text)),
            WireValue::Binary { binary } => STANDARD
                .decode(binary.as_bytes())
                .map(Value::Binary)
                .map_err(D::Error::custom),
        }
    }
}
