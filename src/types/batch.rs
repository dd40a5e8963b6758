//! Change batches and their wire envelope

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::Value;

/// One key and its current value.
///
/// Serialized as a two-element array `[key, value]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub key: String,
    pub value: Value,
}

impl Entry {
    /// Create a new entry
    pub fn new(key: impl Into<String>, value: Value) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }

    /// Create a text entry
    pub fn text(key: impl Into<String>, text: &str) -> Self {
        Self::new(key, Value::from(text))
    }
}

impl Serialize for Entry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (&self.key, &self.value).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Entry {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let (key, value) = <(String, Value)>::deserialize(deserializer)?;
        Ok(Self { key, value })
    }
}

/// One broadcast unit: `{"update": [[key, value], ...], "delete": [key, ...]}`
///
/// A key never appears in both lists. Empty batches are never sent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeBatch {
    #[serde(rename = "update", default)]
    pub updates: Vec<Entry>,
    #[serde(rename = "delete", default)]
    pub deletes: Vec<String>,
}

impl ChangeBatch {
    /// Create a batch from updates and deletes
    pub fn new(updates: Vec<Entry>, deletes: Vec<String>) -> Self {
        Self { updates, deletes }
    }

    /// Create an update-only batch (snapshots, coalesced notification flushes)
    pub fn updates_only(updates: Vec<Entry>) -> Self {
        Self {
            updates,
            deletes: Vec::new(),
        }
    }

    /// Check if the batch carries nothing
    pub fn is_empty(&self) -> bool {
        self.updates.is_empty() && self.deletes.is_empty()
    }

    /// Total number of changes in the batch
    pub fn len(&self) -> usize {
        self.updates.len() + self.deletes.len()
    }

    /// Serialize to the JSON text carried by one text frame
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
