//! Monitor server implementation
//!
//! Wires the change detector to the WebSocket broadcast registry and runs
//! the HTTP server beside them:
//!
//! ```text
//! connections ──joins──┐
//!                      v
//! store ──> ChangeDetector ──feed──> fan-out ──> ClientRegistry ──> clients
//! ```
//!
//! Snapshots travel on the same ordered feed as batches, so a joining
//! client's snapshot is placed exactly between two detector cycles.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinError;
use tracing::{error, info};

use crate::api::http::{create_router, serve, HttpState};
use crate::api::websocket::{JoinRequest, SocketServer, SocketState};
use crate::config::{KeyFilter, MonitorConfig};
use crate::error::{MonitorError, MonitorResult};
use crate::monitor::{ChangeDetector, Feed};
use crate::shutdown::Shutdown;
use crate::store::{KeyValueStore, RedisStore};

/// Items buffered between the detector and the fan-out task
const FEED_CHANNEL_CAPACITY: usize = 64;

/// Joins waiting for the detector
const JOIN_CHANNEL_CAPACITY: usize = 256;

/// A bound, ready-to-run monitor.
pub struct MonitorServer {
    config: MonitorConfig,
    filter: KeyFilter,
    store: Arc<dyn KeyValueStore>,
    socket: SocketServer,
    http: Option<TcpListener>,
    joins: mpsc::Receiver<JoinRequest>,
    shutdown: Shutdown,
}

impl MonitorServer {
    /// Validate `config` and bind both listeners.
    ///
    /// Nothing is read from the store until [`run`](Self::run).
    pub async fn bind(config: MonitorConfig, store: Arc<dyn KeyValueStore>) -> MonitorResult<Self> {
        let filter = config.validate()?;

        let (join_tx, joins) = mpsc::channel(JOIN_CHANNEL_CAPACITY);
        let state = Arc::new(SocketState::new(
            config.send_timeout,
            config.handshake_timeout,
            join_tx,
        ));
        let socket = SocketServer::bind(config.ws_addr, state).await?;
        let http = match config.http_addr {
            Some(addr) => Some(TcpListener::bind(addr).await?),
            None => None,
        };

        Ok(Self {
            config,
            filter,
            store,
            socket,
            http,
            joins,
            shutdown: Shutdown::new(),
        })
    }

    /// Address the WebSocket server is bound to
    pub fn websocket_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Address the HTTP server is bound to, if enabled
    pub fn http_addr(&self) -> Option<SocketAddr> {
        self.http.as_ref().and_then(|listener| listener.local_addr().ok())
    }

    /// Handle that stops [`run`](Self::run) when triggered
    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Shared WebSocket state (registry and join queue)
    pub fn socket_state(&self) -> Arc<SocketState> {
        self.socket.state()
    }

    /// Run until shutdown is triggered or the detector fails.
    ///
    /// A detector failure (lost store connection, unusable notification
    /// flags) stops everything and is returned.
    pub async fn run(self) -> MonitorResult<()> {
        let Self {
            config,
            filter,
            store,
            socket,
            http,
            joins,
            shutdown,
        } = self;

        let ws_port = socket.local_addr()?.port();
        let state = socket.state();

        let (feed_tx, mut feed_rx) = mpsc::channel::<Feed<JoinRequest>>(FEED_CHANNEL_CAPACITY);
        let fanout = tokio::spawn(async move {
            while let Some(feed) = feed_rx.recv().await {
                state.deliver(feed).await;
            }
        });

        let socket_task = tokio::spawn(socket.run(shutdown.signal()));
        let http_task = http.map(|listener| {
            let router = create_router(
                HttpState {
                    store: Arc::clone(&store),
                    ws_port,
                },
                &config.web_root,
            );
            tokio::spawn(serve(listener, router, shutdown.signal()))
        });

        info!(mode = ?config.mode, filter = %config.key_filter, "monitor running");
        let detector = ChangeDetector::new(store, filter);
        let result = detector
            .run(config.mode, config.poll_period, joins, feed_tx, shutdown.signal())
            .await;
        if let Err(err) = &result {
            error!(error = %err, "change detection stopped");
        }

        // The detector dropped its sender; let queued items go out first
        if let Err(err) = fanout.await {
            error!(error = %err, "fan-out task failed");
        }
        shutdown.trigger();
        if let Err(err) = socket_task.await {
            error!(error = %err, "websocket server task failed");
        }
        let http_outcome = match http_task {
            Some(task) => Some(task.await),
            None => None,
        };

        info!("monitor stopped");
        combine(result, http_outcome)
    }
}

/// Final result of a run.
///
/// A detector failure is what ended the run, so it is returned even when
/// the HTTP server also failed; that failure is only logged.
fn combine(
    detector: MonitorResult<()>,
    http: Option<Result<io::Result<()>, JoinError>>,
) -> MonitorResult<()> {
    let http = match http {
        None | Some(Ok(Ok(()))) => Ok(()),
        Some(Ok(Err(err))) => {
            error!(error = %err, "http server failed");
            Err(MonitorError::from(err))
        }
        Some(Err(err)) => {
            error!(error = %err, "http server task failed");
            Err(MonitorError::from(err))
        }
    };
    detector.and(http)
}

/// Connect to Redis as configured and bind the monitor.
pub async fn connect(config: MonitorConfig) -> MonitorResult<MonitorServer> {
    let store = RedisStore::connect(&config.redis_url(), config.redis_db).await?;
    info!(
        host = %config.redis_host,
        port = config.redis_port,
        db = config.redis_db,
        "connected to redis"
    );
    MonitorServer::bind(config, Arc::new(store)).await
}
