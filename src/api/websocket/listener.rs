//! TCP accept loop for the WebSocket port

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tracing::{info, warn};

use super::handler::handle_connection;
use super::state::SocketState;
use crate::shutdown::ShutdownSignal;

/// Accepts connections and hands each one to its own task.
pub struct SocketServer {
    listener: TcpListener,
    state: Arc<SocketState>,
}

impl SocketServer {
    /// Bind the listening socket
    pub async fn bind(addr: SocketAddr, state: Arc<SocketState>) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, state })
    }

    /// Address actually bound (useful with port 0)
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn state(&self) -> Arc<SocketState> {
        Arc::clone(&self.state)
    }

    /// Accept until shutdown, then close every client with 1001.
    pub async fn run(self, mut shutdown: ShutdownSignal) {
        if let Ok(addr) = self.listener.local_addr() {
            info!(%addr, "websocket server listening");
        }

        loop {
            let accepted = tokio::select! {
                _ = shutdown.wait() => break,
                accepted = self.listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, addr)) => {
                    // Ignore errors - Nagle only affects latency
                    let _ = stream.set_nodelay(true);
                    tokio::spawn(handle_connection(stream, addr, Arc::clone(&self.state)));
                }
                Err(err) => {
                    // Back off on fd exhaustion
                    warn!(error = %err, "accept failed");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }

        self.state.registry.close_all(CloseCode::Away).await;
        info!("websocket server stopped");
    }
}
