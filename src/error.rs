//! Error types for the monitor.
//!
//! Fatal errors (`StoreError`, `ConfigError`) propagate out of the server and
//! end the process. Per-connection errors (`ClientSendError`, `AdmitError`)
//! are absorbed where they happen and only ever cost the one client involved.

use std::time::Duration;

use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type for top-level monitor operations.
pub type MonitorResult<T> = Result<T, MonitorError>;

/// Errors raised while talking to the key-value store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The store client reported a failure.
    #[error("store error: {0}")]
    Redis(#[from] redis::RedisError),

    /// The connection (or the event subscription) went away.
    #[error("store connection lost: {0}")]
    Disconnected(String),

    /// The store answered with something we did not expect.
    #[error("unexpected store reply: {0}")]
    Protocol(String),
}

/// Startup-time configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The key filter is not a valid regular expression.
    #[error("invalid key filter {pattern:?}: {source}")]
    InvalidFilter {
        /// Pattern as supplied by the user.
        pattern: String,
        /// Compilation failure.
        #[source]
        source: regex::Error,
    },

    /// Poll period must be non-zero.
    #[error("poll period must be greater than zero")]
    InvalidPollPeriod,

    /// Keyspace notifications could not be enabled.
    #[error("cannot enable set-event notifications: {0}")]
    NotificationFlags(String),
}

/// Errors delivering a message to one client.
#[derive(Error, Debug)]
pub enum ClientSendError {
    /// The socket or the protocol layer refused the message.
    #[error("write failed: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Write did not complete within the send timeout.
    #[error("write timed out after {0:?}")]
    Timeout(Duration),
}

/// Errors admitting a client (its snapshot could not be produced or sent).
#[derive(Error, Debug)]
pub enum AdmitError {
    /// The change detector stopped before serving the join.
    #[error("monitor is not accepting clients")]
    Closed,

    /// Encoding the snapshot failed.
    #[error("snapshot encoding failed: {0}")]
    Encode(#[from] serde_json::Error),

    /// The client could not take the snapshot.
    #[error("snapshot delivery failed: {0}")]
    Send(#[from] ClientSendError),
}

/// Top-level errors surfaced by the server.
#[derive(Error, Debug)]
pub enum MonitorError {
    /// Store failure (fatal).
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Configuration failure (fatal at startup).
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Listener or socket failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Batch serialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Signal handler installation failure.
    #[error("signal handler error: {0}")]
    Signal(#[from] ctrlc::Error),

    /// A background task panicked or was cancelled.
    #[error("task failed: {0}")]
    Task(String),
}

impl MonitorError {
    /// Returns true if this error must terminate the service.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, MonitorError::Serialization(_))
    }

    /// Returns true if this error is a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(self, MonitorError::Config(_))
    }
}

impl From<tokio::task::JoinError> for MonitorError {
    fn from(err: tokio::task::JoinError) -> Self {
        MonitorError::Task(err.to_string())
    }
}
