//! HTTP server setup with Axum
//!
//! Serves the dashboard's static files and a few small endpoints. Change
//! data itself only flows over the WebSocket port.

use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::sync::Arc;

use axum::{
    extract::{Form, State},
    http::StatusCode,
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tracing::{info, warn};

use crate::shutdown::ShutdownSignal;
use crate::store::KeyValueStore;

/// State shared by the HTTP handlers
#[derive(Clone)]
pub struct HttpState {
    /// Store handle used by `/DEL`
    pub store: Arc<dyn KeyValueStore>,
    /// Port the WebSocket server is bound to
    pub ws_port: u16,
}

/// Create the Axum router with all endpoints
pub fn create_router(state: HttpState, web_root: impl AsRef<Path>) -> Router {
    // CORS configuration - the dashboard may be served from elsewhere
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/get_websocket_port", get(websocket_port))
        .route("/DEL", post(delete_keys))
        // Everything else is a static file (index.html at /)
        .fallback_service(ServeDir::new(web_root.as_ref()))
        .layer(cors)
        .with_state(state)
}

/// Serve `router` on `listener` until shutdown.
pub async fn serve(listener: TcpListener, router: Router, mut shutdown: ShutdownSignal) -> io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "http server listening");
    }
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.wait().await })
        .await
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}

/// Port of the WebSocket server, as plain text
async fn websocket_port(State(state): State<HttpState>) -> String {
    state.ws_port.to_string()
}

/// Delete every key named in the form body; responds with the count removed.
async fn delete_keys(
    State(state): State<HttpState>,
    Form(form): Form<HashMap<String, String>>,
) -> Result<String, (StatusCode, String)> {
    let keys: Vec<String> = form.into_keys().collect();
    match state.store.delete(&keys).await {
        Ok(deleted) => {
            info!(requested = keys.len(), deleted, "deleted keys");
            Ok(deleted.to_string())
        }
        Err(err) => {
            warn!(error = %err, "delete failed");
            Err((StatusCode::BAD_GATEWAY, err.to_string()))
        }
    }
}
