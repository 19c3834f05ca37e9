//! Per-client protocol engine.
//!
//! Each session owns a small state machine (`Uninitialized → Active →
//! Closed`) and a handle to the capability surface. Continuation requests
//! on the same session may arrive concurrently; the state mutex serializes
//! state transitions while capability awaits and stream flushes happen
//! outside the lock, so unrelated requests never block each other on I/O.
//!
//! # Reply modes
//!
//! `dispatch` inspects what the capability surface returned:
//!
//! - only notifications/responses in → [`SessionReply::Accepted`] (202)
//! - every request yields one message → [`SessionReply::Single`] (JSON)
//! - any request yields a stream → [`SessionReply::Stream`] (SSE), with all
//!   replies for the body flushed through it in production order

use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::capability::{CapabilityFrame, CapabilityInvoker, CapabilityOutcome};
use crate::error::GateError;
use crate::protocol::{
    ClientMessage, JsonRpcId, JsonRpcResponse, PROTOCOL_VERSION, RpcRequest,
};

/// Buffer capacity for reply and server-push channels. A stalled client
/// applies backpressure instead of buffering unboundedly.
const REPLY_CHANNEL_CAPACITY: usize = 64;

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EngineState {
    /// Created, handshake not yet processed
    Uninitialized,
    /// Handshake complete, accepting continuations
    Active,
    /// Torn down; the registry entry is gone or going
    Closed,
}

/// Reply to one POST body, decided after dispatch.
pub enum SessionReply {
    /// Nothing to answer (notifications/responses only) - 202
    Accepted,
    /// One reply message per request - single JSON document
    Single(Vec<JsonRpcResponse>),
    /// At least one request streams - SSE, messages in production order
    Stream(mpsc::Receiver<Value>),
}

impl std::fmt::Debug for SessionReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionReply::Accepted => f.write_str("SessionReply::Accepted"),
            SessionReply::Single(responses) => f
                .debug_tuple("SessionReply::Single")
                .field(&responses.len())
                .finish(),
            SessionReply::Stream(_) => f.write_str("SessionReply::Stream(..)"),
        }
    }
}

/// Outcome of invoking one request, kept in body order until the reply mode
/// is known.
enum RequestOutcome {
    /// Terminal reply (success or in-envelope error)
    Response(JsonRpcResponse),
    /// Frame stream still producing; the id completes the final frame
    Stream {
        id: Option<JsonRpcId>,
        rx: mpsc::Receiver<CapabilityFrame>,
    },
}

/// One client session: engine state + capability handle + push channel.
pub struct Session {
    id: Uuid,
    created_at: Instant,
    state: Mutex<EngineState>,
    invoker: Arc<dyn CapabilityInvoker>,
    /// Sender side of the standalone server-push stream, present while a
    /// GET stream is attached. Dropped on close so the stream ends.
    push: Mutex<Option<mpsc::Sender<Value>>>,
}

impl Session {
    /// Create a session in the `Uninitialized` state.
    pub fn new(id: Uuid, invoker: Arc<dyn CapabilityInvoker>) -> Self {
        Self {
            id,
            created_at: Instant::now(),
            state: Mutex::new(EngineState::Uninitialized),
            invoker,
            push: Mutex::new(None),
        }
    }

    /// Session identifier (the routing key).
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Creation timestamp.
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Process the handshake request and activate the session.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` if the session is already past the
    /// handshake.
    pub async fn initialize(&self, request: &RpcRequest) -> Result<JsonRpcResponse, GateError> {
        {
            let mut state = self.state.lock().await;
            if *state != EngineState::Uninitialized {
                return Err(GateError::InvalidRequest {
                    details: "Session is already initialized".to_string(),
                });
            }
            *state = EngineState::Active;
        }

        debug!(
            session_id = %self.id,
            correlation_id = %request.correlation_id,
            "Session initialized"
        );

        Ok(JsonRpcResponse::success(
            request.id.clone(),
            serde_json::json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {},
                "serverInfo": {
                    "name": env!("CARGO_PKG_NAME"),
                    "version": env!("CARGO_PKG_VERSION"),
                },
            }),
        ))
    }

    /// Dispatch a continuation body.
    ///
    /// Messages are processed in body order. Client responses are absorbed,
    /// notifications produce no reply, requests go to the capability
    /// surface. Capability failures become in-envelope error responses; the
    /// session stays valid.
    ///
    /// # Errors
    ///
    /// Returns `SessionNotFound` if the session was closed concurrently.
    pub async fn dispatch(&self, messages: Vec<ClientMessage>) -> Result<SessionReply, GateError> {
        {
            let state = self.state.lock().await;
            match *state {
                EngineState::Active => {}
                EngineState::Closed => {
                    return Err(GateError::SessionNotFound {
                        session_id: self.id.to_string(),
                    });
                }
                EngineState::Uninitialized => {
                    return Err(GateError::InvalidRequest {
                        details: "Session handshake has not completed".to_string(),
                    });
                }
            }
        }

        let mut outcomes = Vec::new();
        for message in messages {
            match message {
                ClientMessage::Response(response) => {
                    // Answer to a server-initiated request; nothing to send back.
                    debug!(session_id = %self.id, id = ?response.id, "Absorbed client response");
                }
                ClientMessage::Notification(request) => {
                    debug!(
                        session_id = %self.id,
                        method = %request.method,
                        "Received notification"
                    );
                }
                ClientMessage::Request(request) => {
                    outcomes.push(self.invoke_request(request).await);
                }
            }
        }

        if outcomes.is_empty() {
            return Ok(SessionReply::Accepted);
        }

        let any_stream = outcomes
            .iter()
            .any(|o| matches!(o, RequestOutcome::Stream { .. }));

        if !any_stream {
            let responses = outcomes
                .into_iter()
                .map(|o| match o {
                    RequestOutcome::Response(resp) => resp,
                    RequestOutcome::Stream { .. } => unreachable!("checked above"),
                })
                .collect();
            return Ok(SessionReply::Single(responses));
        }

        let (tx, rx) = mpsc::channel(REPLY_CHANNEL_CAPACITY);
        let session_id = self.id;
        tokio::spawn(async move {
            drive_stream_reply(session_id, outcomes, tx).await;
        });
        Ok(SessionReply::Stream(rx))
    }

    /// Invoke one request against the capability surface.
    async fn invoke_request(&self, request: RpcRequest) -> RequestOutcome {
        let correlation_id = request.correlation_id.to_string();
        debug!(
            session_id = %self.id,
            correlation_id = %correlation_id,
            method = %request.method,
            "Dispatching request"
        );

        match self
            .invoker
            .invoke(&request.method, request.params.clone())
            .await
        {
            Ok(CapabilityOutcome::Single(value)) => {
                debug!(
                    session_id = %self.id,
                    correlation_id = %correlation_id,
                    duration_ms = request.received_at.elapsed().as_millis() as u64,
                    "Request complete"
                );
                RequestOutcome::Response(JsonRpcResponse::success(request.id, value))
            }
            Ok(CapabilityOutcome::Stream(rx)) => RequestOutcome::Stream { id: request.id, rx },
            Err(err) => {
                let gate_err: GateError = err.into();
                warn!(
                    session_id = %self.id,
                    correlation_id = %correlation_id,
                    method = %request.method,
                    error_type = gate_err.error_type_name(),
                    "Request failed"
                );
                RequestOutcome::Response(JsonRpcResponse::error(
                    request.id,
                    gate_err.to_jsonrpc_error(&correlation_id),
                ))
            }
        }
    }

    /// Attach the standalone server-push stream.
    ///
    /// At most one stream per session. A previous stream whose client has
    /// disconnected frees the slot for re-attachment.
    ///
    /// # Errors
    ///
    /// Returns `StreamOccupied` if a stream is already open.
    pub async fn attach_stream(&self) -> Result<mpsc::Receiver<Value>, GateError> {
        let mut push = self.push.lock().await;
        if let Some(sender) = push.as_ref() {
            if !sender.is_closed() {
                return Err(GateError::StreamOccupied {
                    session_id: self.id.to_string(),
                });
            }
        }

        let (tx, rx) = mpsc::channel(REPLY_CHANNEL_CAPACITY);
        *push = Some(tx);
        Ok(rx)
    }

    /// Push a server-initiated message to the standalone stream.
    ///
    /// Returns false if no stream is attached or the client is gone.
    pub async fn push(&self, message: Value) -> bool {
        let push = self.push.lock().await;
        match push.as_ref() {
            Some(sender) => sender.send(message).await.is_ok(),
            None => false,
        }
    }

    /// Tear the session down. Idempotent; faults are swallowed.
    pub async fn close(&self) {
        {
            let mut state = self.state.lock().await;
            if *state == EngineState::Closed {
                return;
            }
            *state = EngineState::Closed;
        }
        // Dropping the sender ends the standalone stream.
        self.push.lock().await.take();
        debug!(session_id = %self.id, "Session closed");
    }

    /// Returns true once the session has been torn down.
    pub async fn is_closed(&self) -> bool {
        *self.state.lock().await == EngineState::Closed
    }
}

/// Flush all replies for one POST body through the SSE channel, in body
/// order, frames within each stream in production order.
async fn drive_stream_reply(
    session_id: Uuid,
    outcomes: Vec<RequestOutcome>,
    tx: mpsc::Sender<Value>,
) {
    for outcome in outcomes {
        match outcome {
            RequestOutcome::Response(response) => {
                if !send_message(&tx, &response).await {
                    return;
                }
            }
            RequestOutcome::Stream { id, mut rx } => {
                let mut completed = false;
                while let Some(frame) = rx.recv().await {
                    match frame {
                        CapabilityFrame::Progress { method, params } => {
                            let mut notification = serde_json::json!({
                                "jsonrpc": "2.0",
                                "method": method,
                            });
                            if let (Some(obj), Some(params)) =
                                (notification.as_object_mut(), params)
                            {
                                obj.insert("params".to_string(), params);
                            }
                            if tx.send(notification).await.is_err() {
                                // Receiver dropped: client disconnected. Stop
                                // draining; the producer sees its channel close.
                                return;
                            }
                        }
                        CapabilityFrame::Done(value) => {
                            let response = JsonRpcResponse::success(id.clone(), value);
                            if !send_message(&tx, &response).await {
                                return;
                            }
                            completed = true;
                            break;
                        }
                    }
                }
                if !completed {
                    // Producer dropped without a terminal frame.
                    error!(session_id = %session_id, "Stream ended without result");
                    let correlation_id = crate::protocol::fast_correlation_id().to_string();
                    let err = GateError::InternalError {
                        correlation_id: correlation_id.clone(),
                    };
                    let response =
                        JsonRpcResponse::error(id, err.to_jsonrpc_error(&correlation_id));
                    if !send_message(&tx, &response).await {
                        return;
                    }
                }
            }
        }
    }
}

/// Serialize and send one reply message. Returns false when the client side
/// of the channel is gone.
async fn send_message(tx: &mpsc::Sender<Value>, response: &JsonRpcResponse) -> bool {
    match serde_json::to_value(response) {
        Ok(value) => tx.send(value).await.is_ok(),
        Err(e) => {
            error!(error = %e, "Failed to serialize reply");
            false
        }
    }
}
