//! Key-value store access
//!
//! The change detector, the snapshot reader and the HTTP layer only ever see
//! [`KeyValueStore`]. [`RedisStore`] talks to a live server; [`MemoryStore`]
//! is an in-process stand-in with the same observable behavior, used by the
//! test suites.

mod memory;
mod redis_store;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::StoreResult;

pub use memory::MemoryStore;
pub use redis_store::RedisStore;

/// Configuration parameter controlling which event classes are reported.
pub const NOTIFY_PARAM: &str = "notify-keyspace-events";

/// Capacity of the set-event channel handed out by `subscribe_set_events`.
pub const EVENT_CHANNEL_CAPACITY: usize = 4096;

/// Whether a flag string makes the store publish string "set" key events.
///
/// Needs the keyevent class (`E`) and string commands (`$`, or `A` which
/// covers every class).
pub fn publishes_set_events(flags: &str) -> bool {
    flags.contains('E') && (flags.contains('$') || flags.contains('A'))
}

/// The subset of store commands the monitor relies on.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Enumerate every key in the selected database.
    async fn scan_keys(&self) -> StoreResult<Vec<String>>;

    /// Whether the key holds a flat byte string.
    async fn is_scalar(&self, key: &str) -> StoreResult<bool>;

    /// Raw value of a key, `None` if it does not exist (or is not scalar).
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Delete keys, returning how many existed.
    async fn delete(&self, keys: &[String]) -> StoreResult<u64>;

    /// Current value of the event-notification parameter.
    async fn notification_flags(&self) -> StoreResult<String>;

    /// Overwrite the event-notification parameter.
    async fn set_notification_flags(&self, flags: &str) -> StoreResult<()>;

    /// Subscribe to "key set" events.
    ///
    /// Each message is a bare key name. The channel closes when the
    /// subscription is lost.
    async fn subscribe_set_events(&self) -> StoreResult<mpsc::Receiver<String>>;
}
