//! Redis Monitor
//!
//! Mirrors the scalar keys of a Redis database to browsers over WebSocket.
//! Every client first receives a snapshot of all monitored keys, then a
//! stream of change batches.
//!
//! # Features
//!
//! - **Two detection modes**: periodic scan-and-diff (reports updates and
//!   deletions) or keyspace set-event notifications (updates only)
//! - **Coalescing**: events within one period are sent as a single batch
//! - **Snapshot on join**: new clients never miss or half-see a batch
//! - **Binary safe**: values that are not valid text are sent base64-tagged
//! - **Key filter**: anchored regular expression on key names
//!
//! # Modules
//!
//! - `types`: Values, entries and the change-batch envelope
//! - `config`: Server configuration and key filter
//! - `store`: Key-value store abstraction (Redis and in-memory)
//! - `monitor`: Change detection, coalescing and snapshots
//! - `api`: WebSocket server and HTTP endpoints
//! - `server`: Wiring and lifecycle
//! - `shutdown`: Shutdown signal shared by all tasks
//! - `error`: Error types
//!
//! # Example
//!
//! ```no_run
//! use redis_monitor::{server, MonitorConfig};
//!
//! #[tokio::main]
//! async fn main() -> redis_monitor::MonitorResult<()> {
//!     let config = MonitorConfig::new("127.0.0.1", 6379).with_key_filter("session:");
//!     let monitor = server::connect(config).await?;
//!     monitor.run().await
//! }
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod monitor;
pub mod server;
pub mod shutdown;
pub mod store;
pub mod types;

// Re-export commonly used items at crate root
pub use config::{KeyFilter, Mode, MonitorConfig};
pub use error::{ConfigError, MonitorError, MonitorResult, StoreError, StoreResult};
pub use server::MonitorServer;
pub use shutdown::{Shutdown, ShutdownSignal};
pub use store::{KeyValueStore, MemoryStore, RedisStore};
pub use types::{ChangeBatch, Entry, Value};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
