//! Registry of admitted clients
//!
//! One async mutex guards the client map. Admission (snapshot + insert),
//! removal and broadcast all hold it, so a broadcast never runs while a
//! client is half-admitted or half-removed, and a new client's snapshot is
//! always the first data message written to it.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use futures::{Sink, SinkExt};
use tokio::sync::{Mutex, Notify};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, warn};

use crate::error::{AdmitError, ClientSendError};
use crate::types::ChangeBatch;

/// Identifier assigned to each connection.
pub type ClientId = u64;

/// Write half of an upgraded connection.
pub type ClientSink = Pin<Box<dyn Sink<Message, Error = WsError> + Send>>;

/// An upgraded connection.
///
/// Writes go through one mutex so messages from the broadcaster and the
/// connection's own close handling never interleave.
pub struct Client {
    id: ClientId,
    addr: SocketAddr,
    connected_at: DateTime<Utc>,
    sink: Mutex<ClientSink>,
    dropped: Notify,
}

impl Client {
    pub fn new(id: ClientId, addr: SocketAddr, sink: ClientSink) -> Self {
        Self {
            id,
            addr,
            connected_at: Utc::now(),
            sink: Mutex::new(sink),
            dropped: Notify::new(),
        }
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Time of the upgrade
    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// Time since the upgrade
    pub fn connected_for(&self) -> chrono::Duration {
        Utc::now() - self.connected_at
    }

    /// Write and flush one message, giving up after `timeout`.
    pub async fn send(&self, message: Message, timeout: Duration) -> Result<(), ClientSendError> {
        let send = async {
            let mut sink = self.sink.lock().await;
            sink.send(message).await
        };
        tokio::time::timeout(timeout, send)
            .await
            .map_err(|_| ClientSendError::Timeout(timeout))??;
        Ok(())
    }

    /// Finish the closing handshake, flushing any close reply still queued.
    pub async fn close(&self, timeout: Duration) {
        let close = async { self.sink.lock().await.close().await };
        // Ignore errors - the connection is ending either way
        let _ = tokio::time::timeout(timeout, close).await;
    }

    /// Tell the connection's reader to stop.
    pub fn drop_connection(&self) {
        // notify_one stores a permit if the reader is not waiting yet
        self.dropped.notify_one();
    }

    /// Resolves once the registry has dropped this client.
    pub async fn dropped(&self) {
        self.dropped.notified().await
    }
}

/// The set of clients receiving broadcasts.
pub struct ClientRegistry {
    clients: Mutex<BTreeMap<ClientId, Arc<Client>>>,
    next_id: AtomicU64,
    send_timeout: Duration,
    /// Number of batches broadcast so far
    broadcast_counter: AtomicU64,
}

impl ClientRegistry {
    /// Create an empty registry
    pub fn new(send_timeout: Duration) -> Self {
        Self {
            clients: Mutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
            send_timeout,
            broadcast_counter: AtomicU64::new(0),
        }
    }

    /// Allocate an id for a new connection
    pub fn next_client_id(&self) -> ClientId {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Per-message write bound
    pub fn send_timeout(&self) -> Duration {
        self.send_timeout
    }

    /// Number of batches broadcast so far
    pub fn broadcast_count(&self) -> u64 {
        self.broadcast_counter.load(Ordering::SeqCst)
    }

    /// Deliver `snapshot` to `client`, then make it a broadcast recipient.
    ///
    /// The send happens under the guard, so no broadcast can reach the
    /// client before its snapshot. The snapshot is sent even when empty.
    pub async fn admit(&self, client: Arc<Client>, snapshot: &ChangeBatch) -> Result<(), AdmitError> {
        let text = snapshot.to_json()?;
        let mut clients = self.clients.lock().await;

        client.send(Message::Text(text), self.send_timeout).await?;

        debug!(client = %client.addr(), keys = snapshot.updates.len(), "snapshot delivered");
        clients.insert(client.id(), client);
        Ok(())
    }

    /// Remove a client. Returns it if it was still registered.
    pub async fn remove(&self, id: ClientId) -> Option<Arc<Client>> {
        self.clients.lock().await.remove(&id)
    }

    /// Number of registered clients
    pub async fn len(&self) -> usize {
        self.clients.lock().await.len()
    }

    /// Check if no client is registered
    pub async fn is_empty(&self) -> bool {
        self.clients.lock().await.is_empty()
    }

    /// Send a batch to every registered client as one text message.
    ///
    /// A client whose write fails or times out is dropped; the others still
    /// get the batch. Returns the number of clients that received it.
    pub async fn broadcast(&self, batch: &ChangeBatch) -> serde_json::Result<usize> {
        if batch.is_empty() {
            return Ok(0);
        }
        let text = batch.to_json()?;
        let timeout = self.send_timeout;

        let mut clients = self.clients.lock().await;
        let sends = clients.values().map(|client| {
            let message = Message::Text(text.clone());
            async move { (client.id(), client.send(message, timeout).await) }
        });
        let results = join_all(sends).await;

        let mut delivered = 0;
        for (id, result) in results {
            match result {
                Ok(()) => delivered += 1,
                Err(err) => {
                    if let Some(client) = clients.remove(&id) {
                        warn!(client = %client.addr(), error = %err, "dropping client after failed send");
                        client.drop_connection();
                    }
                }
            }
        }

        self.broadcast_counter.fetch_add(1, Ordering::SeqCst);
        Ok(delivered)
    }

    /// Send a close frame with `code` to every client and empty the registry.
    pub async fn close_all(&self, code: CloseCode) {
        let timeout = self.send_timeout;
        let mut clients = self.clients.lock().await;
        let closes = clients.values().map(|client| async move {
            let frame = CloseFrame {
                code,
                reason: "".into(),
            };
            // Ignore errors - the client is going away regardless
            let _ = client.send(Message::Close(Some(frame)), timeout).await;
            client.drop_connection();
        });
        join_all(closes).await;
        clients.clear();
    }
}
