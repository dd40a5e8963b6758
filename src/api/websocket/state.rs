//! WebSocket application state

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

use crate::error::AdmitError;
use crate::monitor::Feed;
use crate::types::ChangeBatch;

use super::registry::{Client, ClientRegistry};

/// A connection waiting for its snapshot.
///
/// Sent to the change detector, which answers with a
/// [`Feed::Snapshot`] carrying the request back.
pub struct JoinRequest {
    client: Arc<Client>,
    admitted: oneshot::Sender<Result<(), AdmitError>>,
}

/// Shared state for WebSocket connections
pub struct SocketState {
    /// Clients receiving broadcasts
    pub registry: ClientRegistry,

    /// Where join requests go (the change detector)
    joins: mpsc::Sender<JoinRequest>,

    /// Upgrade deadline for new connections
    handshake_timeout: Duration,
}

impl SocketState {
    /// Create state with an empty registry
    pub fn new(
        send_timeout: Duration,
        handshake_timeout: Duration,
        joins: mpsc::Sender<JoinRequest>,
    ) -> Self {
        Self {
            registry: ClientRegistry::new(send_timeout),
            joins,
            handshake_timeout,
        }
    }

    pub fn handshake_timeout(&self) -> Duration {
        self.handshake_timeout
    }

    /// Ask for a snapshot and wait until `client` has been admitted with it.
    pub async fn join(&self, client: Arc<Client>) -> Result<(), AdmitError> {
        let (admitted, reply) = oneshot::channel();
        self.joins
            .send(JoinRequest { client, admitted })
            .await
            .map_err(|_| AdmitError::Closed)?;
        reply.await.map_err(|_| AdmitError::Closed)?
    }

    /// Act on one item from the detector: broadcast a batch, or admit a
    /// joining client with its snapshot.
    pub async fn deliver(&self, feed: Feed<JoinRequest>) {
        match feed {
            Feed::Batch(batch) => match self.registry.broadcast(&batch).await {
                Ok(delivered) => debug!(
                    sequence = self.registry.broadcast_count(),
                    changes = batch.len(),
                    delivered,
                    "broadcast batch"
                ),
                Err(err) => error!(error = %err, "failed to encode batch"),
            },
            Feed::Snapshot { batch, join } => {
                let id = join.client.id();
                let result = self.registry.admit(join.client, &batch).await;
                if join.admitted.send(result).is_err() {
                    // Connection went away while waiting
                    self.registry.remove(id).await;
                }
            }
        }
    }

    /// Broadcast a batch to every connected client
    pub async fn broadcast(&self, batch: &ChangeBatch) -> serde_json::Result<usize> {
        self.registry.broadcast(batch).await
    }

    /// Number of connected clients
    pub async fn client_count(&self) -> usize {
        self.registry.len().await
    }
}
