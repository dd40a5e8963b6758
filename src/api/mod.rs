//! API module for HTTP and WebSocket endpoints
//!
//! The WebSocket server pushes change batches; the HTTP server hosts the
//! dashboard and a couple of helper endpoints.

pub mod http;
pub mod websocket;
