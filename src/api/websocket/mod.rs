//! WebSocket server for pushing change batches to browsers
//!
//! The protocol layer is `tokio-tungstenite`; this module adds:
//!
//! - A registry that admits each client with a snapshot of the store, then
//!   broadcasts every batch to all clients
//! - Per-client send timeouts and failure isolation
//! - An upgrade deadline and inbound size limits
//!
//! Every message is a JSON object `{"update": [[key, value], ...], "delete": [key, ...]}`.

pub mod handler;
pub mod listener;
pub mod registry;
pub mod state;

pub use listener::SocketServer;
pub use registry::{Client, ClientId, ClientRegistry};
pub use state::{JoinRequest, SocketState};
