//! In-process store

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{publishes_set_events, KeyValueStore, EVENT_CHANNEL_CAPACITY};
use crate::error::{StoreError, StoreResult};

#[derive(Debug, Clone)]
enum Slot {
    Scalar(Vec<u8>),
    /// Name of a structured type (list, hash, ...); never observed by the monitor
    Structured(&'static str),
}

#[derive(Default)]
struct MemoryState {
    keys: BTreeMap<String, Slot>,
    flags: String,
    subscribers: Vec<mpsc::Sender<String>>,
    disconnected: bool,
}

impl MemoryState {
    fn check_connected(&self) -> StoreResult<()> {
        if self.disconnected {
            return Err(StoreError::Disconnected("memory store disconnected".to_string()));
        }
        Ok(())
    }

    /// Type name as reported by the `TYPE` command
    fn key_type(&self, key: &str) -> Option<&'static str> {
        self.keys.get(key).map(|slot| match slot {
            Slot::Scalar(_) => "string",
            Slot::Structured(kind) => *kind,
        })
    }
}

/// Thread-safe in-memory store with Redis-like set-event notifications.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    /// Create an empty store with notifications disabled
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a scalar key, publishing a set event when enabled
    pub fn set(&self, key: &str, value: impl Into<Vec<u8>>) {
        let mut state = self.state.lock();
        state
            .keys
            .insert(key.to_string(), Slot::Scalar(value.into()));
        if publishes_set_events(&state.flags) {
            // Drop subscribers whose receiver is gone
            state.subscribers.retain(|tx| {
                !matches!(
                    tx.try_send(key.to_string()),
                    Err(mpsc::error::TrySendError::Closed(_))
                )
            });
        }
    }

    /// Create a non-scalar key of the given type name
    pub fn set_structured(&self, key: &str, kind: &'static str) {
        self.state
            .lock()
            .keys
            .insert(key.to_string(), Slot::Structured(kind));
    }

    /// Remove a key
    pub fn remove(&self, key: &str) -> bool {
        self.state.lock().keys.remove(key).is_some()
    }

    /// Type name of a key (`"string"` for scalars), `None` if absent
    pub fn key_type(&self, key: &str) -> Option<&'static str> {
        self.state.lock().key_type(key)
    }

    /// Read a scalar value without going through the async trait
    pub fn value(&self, key: &str) -> Option<Vec<u8>> {
        match self.state.lock().keys.get(key) {
            Some(Slot::Scalar(value)) => Some(value.clone()),
            _ => None,
        }
    }

    /// Current notification flags
    pub fn flags(&self) -> String {
        self.state.lock().flags.clone()
    }

    /// Preset the notification flags
    pub fn with_flags(self, flags: &str) -> Self {
        self.state.lock().flags = flags.to_string();
        self
    }

    /// Simulate loss of the connection: every later command fails and
    /// subscriptions close.
    pub fn disconnect(&self) {
        let mut state = self.state.lock();
        state.disconnected = true;
        state.subscribers.clear();
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn scan_keys(&self) -> StoreResult<Vec<String>> {
        let state = self.state.lock();
        state.check_connected()?;
        Ok(state.keys.keys().cloned().collect())
    }

    async fn is_scalar(&self, key: &str) -> StoreResult<bool> {
        let state = self.state.lock();
        state.check_connected()?;
        Ok(state.key_type(key) == Some("string"))
    }

    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let state = self.state.lock();
        state.check_connected()?;
        Ok(match state.keys.get(key) {
            Some(Slot::Scalar(value)) => Some(value.clone()),
            _ => None,
        })
    }

    async fn delete(&self, keys: &[String]) -> StoreResult<u64> {
        let mut state = self.state.lock();
        state.check_connected()?;
        let removed = keys
            .iter()
            .filter(|key| state.keys.remove(key.as_str()).is_some())
            .count();
        Ok(removed as u64)
    }

    async fn notification_flags(&self) -> StoreResult<String> {
        let state = self.state.lock();
        state.check_connected()?;
        Ok(state.flags.clone())
    }

    async fn set_notification_flags(&self, flags: &str) -> StoreResult<()> {
        let mut state = self.state.lock();
        state.check_connected()?;
        state.flags = flags.to_string();
        Ok(())
    }

    async fn subscribe_set_events(&self) -> StoreResult<mpsc::Receiver<String>> {
        let mut state = self.state.lock();
        state.check_connected()?;
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        state.subscribers.push(tx);
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scalar_and_structured_keys() {
        let store = MemoryStore::new();
        store.set("a", "1");
        store.set_structured("list", "list");

        assert_eq!(store.scan_keys().await.unwrap(), vec!["a", "list"]);
        assert!(store.is_scalar("a").await.unwrap());
        assert!(!store.is_scalar("list").await.unwrap());
        assert_eq!(store.get("a").await.unwrap(), Some(b"1".to_vec()));
        assert_eq!(store.get("list").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_key_type_names() {
        let store = MemoryStore::new();
        store.set("s", "1");
        store.set_structured("h", "hash");

        assert_eq!(store.key_type("s"), Some("string"));
        assert_eq!(store.key_type("h"), Some("hash"));
        assert_eq!(store.key_type("missing"), None);

        // Overwriting with a structured type makes the key non-scalar
        store.set_structured("s", "zset");
        assert_eq!(store.key_type("s"), Some("zset"));
        assert!(!store.is_scalar("s").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_counts_existing_keys() {
        let store = MemoryStore::new();
        store.set("a", "1");
        store.set("b", "2");

        let removed = store
            .delete(&["a".to_string(), "missing".to_string()])
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.scan_keys().await.unwrap(), vec!["b"]);
    }

    #[tokio::test]
    async fn test_set_events_follow_flags() {
        let store = MemoryStore::new();
        let mut rx = store.subscribe_set_events().await.unwrap();

        // Notifications disabled: nothing published
        store.set("quiet", "1");
        assert!(rx.try_recv().is_err());

        store.set_notification_flags("$E").await.unwrap();
        store.set("loud", "2");
        assert_eq!(rx.recv().await.unwrap(), "loud");
    }

    #[tokio::test]
    async fn test_disconnect_fails_commands_and_closes_subscriptions() {
        let store = MemoryStore::new().with_flags("AE");
        let mut rx = store.subscribe_set_events().await.unwrap();

        store.disconnect();

        assert!(matches!(
            store.scan_keys().await,
            Err(StoreError::Disconnected(_))
        ));
        assert!(rx.recv().await.is_none());
    }
}
