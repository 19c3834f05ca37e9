//! Admin server for health checks and metrics.
//!
//! Runs on a dedicated port so operational probes never mix with session
//! traffic. Endpoints:
//!
//! - `GET /health` - liveness probe
//! - `GET /status` - gateway status: active sessions plus the session
//!   endpoints the gateway serves
//! - `GET /metrics` - Prometheus metrics

use axum::{Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::transport::SessionRegistry;

/// Shared state for the admin server.
#[derive(Clone)]
pub struct AdminState {
    /// Session registry, read for the status endpoint.
    pub registry: Arc<SessionRegistry>,
}

/// Admin server for health checks and metrics.
pub struct AdminServer {
    bind_addr: String,
    state: AdminState,
}

impl AdminServer {
    /// Create a new admin server.
    pub fn new(bind_addr: impl Into<String>, registry: Arc<SessionRegistry>) -> Self {
        Self {
            bind_addr: bind_addr.into(),
            state: AdminState { registry },
        }
    }

    /// Create the Axum router for the admin server.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .route("/status", get(status_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(self.state.clone())
    }

    /// Run the admin server until the shutdown token is cancelled.
    ///
    /// # Errors
    ///
    /// Returns an error if the server fails to bind or serve.
    pub async fn run(
        self,
        shutdown: CancellationToken,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let listener = TcpListener::bind(&self.bind_addr).await?;

        info!(addr = %self.bind_addr, "Admin server listening");

        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move {
                shutdown.cancelled().await;
                info!("Admin server shutting down");
            })
            .await?;

        Ok(())
    }
}

/// Liveness probe. Always 200 while the process serves.
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// Gateway status: session count and the endpoints the gateway serves.
async fn status_handler(State(state): State<AdminState>) -> impl IntoResponse {
    let body = serde_json::json!({
        "status": "ok",
        "active_sessions": state.registry.len(),
        "endpoints": {
            "session": ["POST /mcp", "GET /mcp", "DELETE /mcp"],
            "admin": ["GET /health", "GET /status", "GET /metrics"],
        },
    });
    (
        StatusCode::OK,
        [("content-type", "application/json")],
        body.to_string(),
    )
}

/// Metrics in Prometheus text format.
async fn metrics_handler() -> impl IntoResponse {
    use prometheus::{Encoder, TextEncoder};

    let metrics = prometheus::default_registry().gather();
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metrics, &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to encode metrics",
        )
            .into_response();
    }

    let metrics_string = String::from_utf8_lossy(&buffer).to_string();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        metrics_string,
    )
        .into_response()
}
