//! HTTP surface: `POST /mcp`, `GET /mcp`, `DELETE /mcp`.
//!
//! # Request Flow (POST)
//!
//! 1. Acquire semaphore permit (or return 503)
//! 2. Negotiate: Accept must cover both response modes (406), body must be
//!    JSON (415)
//! 3. Allow-list guard on Origin/Host (403), before any registry access
//! 4. Parse JSON-RPC message(s) (400)
//! 5. Classify once: handshake mints a session, continuation routes by the
//!    `mcp-session-id` header
//! 6. Reply: 202 for notification-only bodies, a JSON document when every
//!    request yields one message, SSE when any request streams
//!
//! GET attaches the standalone server-push stream (one per session, 409 on
//! a second). DELETE tears the session down (idempotent; the second call
//! observes 404). Any other method gets 405 from the method router.
//!
//! A client that drops an SSE stream mid-flight abandons its session: a
//! disconnect observer removes the registry entry and closes the engine.

use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::{
    Router,
    extract::{DefaultBodyLimit, State},
    http::{HeaderMap, StatusCode, header},
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::post,
};
use bytes::Bytes;
use futures::Stream;
use serde_json::Value;
use tokio::sync::{Semaphore, mpsc};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::capability::CapabilityInvoker;
use crate::config::GateConfig;
use crate::error::GateError;
use crate::metrics;
use crate::protocol::{
    ClientMessage, JsonRpcResponse, ParsedBody, SESSION_ID_HEADER, fast_correlation_id, parse_body,
};
use crate::transport::guard::AllowListGuard;
use crate::transport::negotiate;
use crate::transport::registry::SessionRegistry;
use crate::transport::session::{Session, SessionReply};

/// Shared handler state.
pub struct GateState {
    /// Live sessions
    pub registry: Arc<SessionRegistry>,
    /// Origin/Host allow-lists
    pub guard: AllowListGuard,
    /// Concurrency semaphore
    pub semaphore: Arc<Semaphore>,
    /// Maximum body size in bytes
    pub max_body_size: usize,
}

/// The session gateway server.
pub struct GateServer {
    config: GateConfig,
    state: Arc<GateState>,
}

impl GateServer {
    /// Create a server from config and a capability surface.
    pub fn new(config: GateConfig, invoker: Arc<dyn CapabilityInvoker>) -> Self {
        let state = Arc::new(GateState {
            registry: Arc::new(SessionRegistry::new(invoker)),
            guard: AllowListGuard::new(
                config.allowed_origins.clone(),
                config.allowed_hosts.clone(),
            ),
            semaphore: Arc::new(Semaphore::new(config.max_concurrent_requests)),
            max_body_size: config.max_body_size,
        });
        Self { config, state }
    }

    /// The session registry (for shutdown and tests).
    pub fn registry(&self) -> Arc<SessionRegistry> {
        Arc::clone(&self.state.registry)
    }

    /// Create the axum Router.
    ///
    /// Unknown methods on `/mcp` get 405 with an `Allow` header from the
    /// method router. Body size is limited before buffering.
    pub fn router(&self) -> Router {
        Router::new()
            .route(
                "/mcp",
                post(handle_post).get(handle_get).delete(handle_delete),
            )
            .layer(DefaultBodyLimit::max(self.state.max_body_size))
            .with_state(Arc::clone(&self.state))
    }

    /// Run the server until the token is cancelled, then close all sessions.
    ///
    /// # Errors
    ///
    /// Returns error if the listener fails to bind or serve.
    pub async fn run(
        self,
        shutdown: tokio_util::sync::CancellationToken,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let listener = tokio::net::TcpListener::bind(&self.config.listen_addr).await?;
        info!(addr = %self.config.listen_addr, "Gateway listening");

        let registry = self.registry();
        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;

        registry.shutdown().await;
        Ok(())
    }
}

/// Handle `POST /mcp`.
async fn handle_post(
    State(state): State<Arc<GateState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    // Acquire concurrency permit first; an overloaded gateway sheds load
    // before doing any per-request work.
    let _permit = match state.semaphore.clone().try_acquire_owned() {
        Ok(permit) => permit,
        Err(_) => {
            warn!("Max concurrent requests reached, returning 503");
            return error_response(
                "POST",
                &GateError::ServiceUnavailable {
                    reason: "Max concurrent requests reached".to_string(),
                },
            );
        }
    };

    match post_inner(&state, &headers, body).await {
        Ok(response) => {
            metrics::record_request("POST", "success");
            response
        }
        Err(e) => error_response("POST", &e),
    }
}

async fn post_inner(
    state: &Arc<GateState>,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<Response, GateError> {
    negotiate::require_dual_accept(headers)?;
    negotiate::require_json_content_type(headers)?;
    state.guard.check(headers)?;

    let parsed = parse_body(&body)?;

    if parsed.contains_initialize() {
        return handle_handshake(state, parsed).await;
    }

    let session_id = resolve_session_id(headers)?;
    let session = state
        .registry
        .get(&session_id)
        .ok_or_else(|| GateError::SessionNotFound {
            session_id: session_id.to_string(),
        })?;

    match session.dispatch(parsed.into_messages()).await? {
        SessionReply::Accepted => Ok(StatusCode::ACCEPTED.into_response()),
        SessionReply::Single(responses) => {
            debug!(
                session_id = %session_id,
                mode = ?negotiate::ResponseMode::Json,
                replies = responses.len(),
                "Replying"
            );
            json_document(&responses)
        }
        SessionReply::Stream(rx) => {
            debug!(
                session_id = %session_id,
                mode = ?negotiate::ResponseMode::EventStream,
                "Replying"
            );
            // The client dropping this stream abandons the session.
            let guard = DisconnectGuard::new(Arc::clone(&state.registry), session);
            Ok(sse_response(rx, guard, true))
        }
    }
}

/// Mint a session and run the handshake through it.
///
/// The handshake must be the only message in the body; the session id does
/// not exist yet, so nothing else could be routed.
async fn handle_handshake(
    state: &Arc<GateState>,
    parsed: ParsedBody,
) -> Result<Response, GateError> {
    let mut messages = parsed.into_messages();
    if messages.len() != 1 {
        return Err(GateError::InvalidRequest {
            details: "The initialize request must be the only message in the body".to_string(),
        });
    }
    let request = match messages.remove(0) {
        ClientMessage::Request(req) => req,
        _ => {
            return Err(GateError::InvalidRequest {
                details: "The initialize message must be a request".to_string(),
            });
        }
    };

    let session = state.registry.create();
    let response = match session.initialize(&request).await {
        Ok(response) => response,
        Err(e) => {
            // Never leak a half-initialized record.
            if let Some(session) = state.registry.remove(&session.id()) {
                session.close().await;
            }
            return Err(e);
        }
    };

    debug!(
        session_id = %session.id(),
        correlation_id = %request.correlation_id,
        "Handshake complete"
    );

    let body = serde_json::to_vec(&response).map_err(|e| {
        error!(error = %e, "Failed to serialize handshake response");
        GateError::InternalError {
            correlation_id: request.correlation_id.to_string(),
        }
    })?;

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, negotiate::APPLICATION_JSON.to_string()),
            (
                header::HeaderName::from_static(SESSION_ID_HEADER),
                session.id().to_string(),
            ),
        ],
        Bytes::from(body),
    )
        .into_response())
}

/// Handle `GET /mcp`: attach the standalone server-push stream.
async fn handle_get(State(state): State<Arc<GateState>>, headers: HeaderMap) -> Response {
    match get_inner(&state, &headers).await {
        Ok(response) => {
            metrics::record_request("GET", "success");
            response
        }
        Err(e) => error_response("GET", &e),
    }
}

async fn get_inner(state: &Arc<GateState>, headers: &HeaderMap) -> Result<Response, GateError> {
    negotiate::require_event_stream_accept(headers)?;
    state.guard.check(headers)?;

    let session_id = resolve_session_id(headers)?;
    let session = state
        .registry
        .get(&session_id)
        .ok_or_else(|| GateError::SessionNotFound {
            session_id: session_id.to_string(),
        })?;

    let rx = session.attach_stream().await?;
    debug!(session_id = %session_id, "Standalone stream attached");

    // This stream is the session's persistent connection: when it goes, the
    // session goes, whether by disconnect or by teardown elsewhere.
    let guard = DisconnectGuard::new(Arc::clone(&state.registry), session);
    Ok(sse_response(rx, guard, false))
}

/// Handle `DELETE /mcp`: explicit session teardown.
async fn handle_delete(State(state): State<Arc<GateState>>, headers: HeaderMap) -> Response {
    match delete_inner(&state, &headers).await {
        Ok(response) => {
            metrics::record_request("DELETE", "success");
            response
        }
        Err(e) => error_response("DELETE", &e),
    }
}

async fn delete_inner(state: &Arc<GateState>, headers: &HeaderMap) -> Result<Response, GateError> {
    state.guard.check(headers)?;

    let session_id = resolve_session_id(headers)?;
    let session = state
        .registry
        .remove(&session_id)
        .ok_or_else(|| GateError::SessionNotFound {
            session_id: session_id.to_string(),
        })?;

    session.close().await;
    info!(session_id = %session_id, "Session deleted");
    Ok(StatusCode::OK.into_response())
}

/// Read and validate the `mcp-session-id` header.
fn resolve_session_id(headers: &HeaderMap) -> Result<Uuid, GateError> {
    let raw = headers
        .get(SESSION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| GateError::InvalidRequest {
            details: format!("Missing {} header", SESSION_ID_HEADER),
        })?;

    Uuid::parse_str(raw).map_err(|_| GateError::InvalidRequest {
        details: format!("Malformed {} header", SESSION_ID_HEADER),
    })
}

/// Serialize a single-document reply: one response as an object, a batch as
/// an array.
fn json_document(responses: &[JsonRpcResponse]) -> Result<Response, GateError> {
    let body = if responses.len() == 1 {
        serde_json::to_vec(&responses[0])
    } else {
        serde_json::to_vec(responses)
    }
    .map_err(|e| {
        error!(error = %e, "Failed to serialize reply document");
        GateError::InternalError {
            correlation_id: fast_correlation_id().to_string(),
        }
    })?;

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, negotiate::APPLICATION_JSON)],
        Bytes::from(body),
    )
        .into_response())
}

/// Build the SSE response around a reply channel.
///
/// `disarm_on_complete` distinguishes a POST reply stream (normal completion
/// leaves the session alive) from the standalone GET stream (any end tears
/// the session down).
fn sse_response(rx: mpsc::Receiver<Value>, guard: DisconnectGuard, disarm_on_complete: bool) -> Response {
    let stream = GuardedStream {
        inner: ReceiverStream::new(rx),
        guard,
        disarm_on_complete,
    };
    Sse::new(stream).keep_alive(KeepAlive::default()).into_response()
}

/// Build a JSON-RPC error envelope response, recording the outcome.
fn error_response(http_method: &str, err: &GateError) -> Response {
    metrics::record_request(http_method, err.error_type_name());

    let correlation_id = fast_correlation_id().to_string();
    warn!(
        correlation_id = %correlation_id,
        error_type = err.error_type_name(),
        http_method = http_method,
        "Request rejected"
    );

    let envelope = JsonRpcResponse::error(None, err.to_jsonrpc_error(&correlation_id));
    let body = serde_json::to_vec(&envelope).unwrap_or_else(|_| {
        br#"{"jsonrpc":"2.0","id":null,"error":{"code":-32603,"message":"Internal error"}}"#
            .to_vec()
    });

    (
        err.http_status(),
        [(header::CONTENT_TYPE, negotiate::APPLICATION_JSON)],
        Bytes::from(body),
    )
        .into_response()
}

/// Observes the fate of an SSE stream. While armed, dropping the guard
/// tears the session down: registry removal plus engine close, spawned so
/// Drop stays synchronous.
struct DisconnectGuard {
    registry: Arc<SessionRegistry>,
    session: Arc<Session>,
    armed: bool,
}

impl DisconnectGuard {
    fn new(registry: Arc<SessionRegistry>, session: Arc<Session>) -> Self {
        Self {
            registry,
            session,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for DisconnectGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let registry = Arc::clone(&self.registry);
        let session = Arc::clone(&self.session);
        let session_id = session.id();
        // Drop may run outside a runtime during process teardown.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                info!(session_id = %session_id, "Client disconnected, tearing session down");
                registry.remove(&session_id);
                session.close().await;
            });
        }
    }
}

/// Reply channel as an SSE event stream, with a disconnect observer.
///
/// Every message is one `message` event in production order. When the inner
/// channel ends normally the guard is disarmed (POST reply streams only);
/// dropping the stream early leaves the guard armed.
struct GuardedStream {
    inner: ReceiverStream<Value>,
    guard: DisconnectGuard,
    disarm_on_complete: bool,
}

impl Stream for GuardedStream {
    type Item = Result<Event, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match Pin::new(&mut self.inner).poll_next(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(None) => {
                if self.disarm_on_complete {
                    self.guard.disarm();
                }
                Poll::Ready(None)
            }
            Poll::Ready(Some(message)) => match Event::default().event("message").json_data(&message)
            {
                Ok(event) => Poll::Ready(Some(Ok(event))),
                Err(e) => {
                    error!(error = %e, "Failed to encode SSE event");
                    Poll::Ready(None)
                }
            },
        }
    }
}
