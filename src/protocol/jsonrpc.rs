//! JSON-RPC 2.0 types and parsing.
//!
//! # JSON-RPC 2.0 Compliance
//!
//! - Requests have `id`, `method`, and optional `params`
//! - Notifications are requests without `id`
//! - Responses carry `result` or `error` and no `method`
//! - Batches are arrays of the above
//! - `id` type (string or integer) MUST be preserved in responses
//!
//! # Security Note
//!
//! This module parses untrusted input. Size limits are enforced at the HTTP
//! layer before bytes reach the parser. An unparsable body is rejected whole;
//! no message extracted from it is ever executed.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::borrow::Cow;
use std::sync::Arc;
use std::sync::LazyLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use uuid::Uuid;

use crate::error::GateError;

// ============================================================================
// Fast Correlation ID Generator
// ============================================================================

/// Startup prefix derived from a single Uuid::new_v4() call.
/// The upper 64 bits provide process-level uniqueness.
static CORRELATION_PREFIX: LazyLock<u64> = LazyLock::new(|| {
    let seed = Uuid::new_v4().as_u128();
    (seed >> 64) as u64
});

/// Monotonically increasing counter for the lower 64 bits.
static CORRELATION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a fast correlation ID using a counter-based approach.
///
/// Combines a process-unique prefix (from a single Uuid::new_v4() at startup)
/// with a monotonically increasing counter. This avoids the CSPRNG overhead
/// of Uuid::new_v4() on every request while still producing unique 128-bit IDs.
///
/// Correlation IDs are for log tracing only. Session identifiers are NOT
/// generated this way: they are routing keys and must be unguessable, so they
/// always come from `Uuid::new_v4()` directly.
pub fn fast_correlation_id() -> Uuid {
    let prefix = *CORRELATION_PREFIX;
    let counter = CORRELATION_COUNTER.fetch_add(1, Ordering::Relaxed);
    let mut combined = ((prefix as u128) << 64) | (counter as u128);
    // Set version 4 (bits 48-51 of the 128-bit value)
    combined = (combined & !(0xF_u128 << 76)) | (0x4_u128 << 76);
    // Set variant 1 - RFC 4122 (bits 64-65)
    combined = (combined & !(0x3_u128 << 62)) | (0x2_u128 << 62);
    Uuid::from_u128(combined)
}

/// JSON-RPC 2.0 request ID.
///
/// The spec allows string or integer IDs. We preserve the exact type
/// to ensure responses use the same type as requests.
///
/// # Important
///
/// Never coerce between types! If the client sends `"id": 1`, respond with
/// `"id": 1`, not `"id": "1"`.
///
/// # Note on Null IDs
///
/// Per JSON-RPC 2.0 spec, `"id": null` is valid (though unusual) and should
/// be echoed back in responses. This is distinct from a missing `id` field,
/// which indicates a notification that requires no response.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum JsonRpcId {
    /// Integer ID (e.g., `"id": 1`)
    Number(i64),
    /// String ID (e.g., `"id": "abc-123"`)
    String(String),
    /// Explicit null ID (e.g., `"id": null`) - valid but unusual
    Null,
}

impl Serialize for JsonRpcId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            JsonRpcId::Number(n) => serializer.serialize_i64(*n),
            JsonRpcId::String(s) => serializer.serialize_str(s),
            JsonRpcId::Null => serializer.serialize_none(),
        }
    }
}

impl<'de> Deserialize<'de> for JsonRpcId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        match value {
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(JsonRpcId::Number(i))
                } else {
                    Err(serde::de::Error::custom(
                        "JSON-RPC ID must be integer, not float",
                    ))
                }
            }
            Value::String(s) => Ok(JsonRpcId::String(s)),
            Value::Null => Ok(JsonRpcId::Null),
            _ => Err(serde::de::Error::custom(
                "JSON-RPC ID must be string, integer, or null",
            )),
        }
    }
}

/// Wrapper to distinguish between missing field and explicit null.
/// - `Absent` - field was not present in JSON
/// - `Null` - field was present with value `null`
/// - `Present(T)` - field was present with a non-null value
#[derive(Debug, Clone, Default)]
enum MaybeNull<T> {
    #[default]
    Absent,
    Null,
    Present(T),
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for MaybeNull<T> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        // Deserialize to serde_json::Value first to check for null
        let value = Value::deserialize(deserializer)?;
        if value.is_null() {
            Ok(MaybeNull::Null)
        } else {
            T::deserialize(value)
                .map(MaybeNull::Present)
                .map_err(serde::de::Error::custom)
        }
    }
}

/// Deserializer that converts MaybeNull<JsonRpcId> to Option<JsonRpcId>
/// where explicit null becomes Some(JsonRpcId::Null)
fn deserialize_optional_id<'de, D>(deserializer: D) -> Result<Option<JsonRpcId>, D::Error>
where
    D: Deserializer<'de>,
{
    match MaybeNull::deserialize(deserializer)? {
        MaybeNull::Absent => Ok(None),
        MaybeNull::Null => Ok(Some(JsonRpcId::Null)),
        MaybeNull::Present(id) => Ok(Some(id)),
    }
}

/// Raw JSON-RPC 2.0 message as received from the client.
///
/// This struct handles the wire format before validation. All fields are
/// optional to allow for proper error reporting on malformed messages, and
/// to cover all three inbound shapes (request, notification, response).
#[derive(Debug, Clone, Deserialize)]
struct RawJsonRpcMessage {
    /// Must be "2.0"
    jsonrpc: Option<String>,
    /// Message ID (absent for notifications, Some(Null) for explicit null)
    #[serde(default, deserialize_with = "deserialize_optional_id")]
    id: Option<JsonRpcId>,
    /// Method name (absent for responses)
    method: Option<String>,
    /// Method parameters
    params: Option<Value>,
    /// Result payload (responses only)
    result: Option<Value>,
    /// Error payload (responses only)
    error: Option<Value>,
}

/// JSON-RPC 2.0 version constant.
const JSONRPC_VERSION: &str = "2.0";

/// Method name of the initialization handshake.
const INITIALIZE_METHOD: &str = "initialize";

/// JSON-RPC 2.0 response.
///
/// # ID Serialization
///
/// Per JSON-RPC 2.0 spec, the `id` field is REQUIRED in responses and MUST be:
/// - The same as the request's `id` for success/error responses
/// - `null` if the request `id` could not be determined (e.g., parse error)
///
/// The `id` field always serializes: `None` becomes `"id": null` in JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// Always "2.0"
    pub jsonrpc: Cow<'static, str>,
    /// Request ID - always serialized (None becomes null per JSON-RPC 2.0 spec)
    pub id: Option<JsonRpcId>,
    /// Result (mutually exclusive with error)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error (mutually exclusive with result)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<crate::error::jsonrpc::JsonRpcError>,
}

impl JsonRpcResponse {
    /// Create a success response.
    pub fn success(id: Option<JsonRpcId>, result: Value) -> Self {
        Self {
            jsonrpc: Cow::Borrowed(JSONRPC_VERSION),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response.
    ///
    /// Pass `None` as `id` if the request ID could not be determined (e.g.,
    /// parse error) - this serializes as `"id": null` per JSON-RPC 2.0 spec.
    pub fn error(id: Option<JsonRpcId>, error: crate::error::jsonrpc::JsonRpcError) -> Self {
        Self {
            jsonrpc: Cow::Borrowed(JSONRPC_VERSION),
            id,
            result: None,
            error: Some(error),
        }
    }
}

/// Parsed and validated inbound request with internal tracking.
#[derive(Clone)]
pub struct RpcRequest {
    /// Original JSON-RPC ID (None for notifications)
    pub id: Option<JsonRpcId>,
    /// Method name
    pub method: String,
    /// Method parameters (Arc-wrapped for O(1) clone on the dispatch path)
    pub params: Option<Arc<Value>>,
    /// Timestamp when the request was received
    pub received_at: Instant,
    /// Unique correlation ID for tracing
    pub correlation_id: Uuid,
}

/// Custom Debug implementation that redacts params to prevent PII leakage
/// (procedure arguments may contain sensitive data).
impl std::fmt::Debug for RpcRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcRequest")
            .field("id", &self.id)
            .field("method", &self.method)
            .field("params", &self.params.as_ref().map(|_| "<redacted>"))
            .field("correlation_id", &self.correlation_id)
            .finish()
    }
}

impl RpcRequest {
    /// Returns true if this is a notification (no ID).
    ///
    /// Notifications do not receive responses per JSON-RPC 2.0.
    #[inline]
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }

    /// Returns true if this request is the initialization handshake.
    ///
    /// This is a structural predicate over the decoded message, independent
    /// of any session identifier the request may carry.
    #[inline]
    pub fn is_initialize(&self) -> bool {
        self.method == INITIALIZE_METHOD && !self.is_notification()
    }
}

/// One classified inbound message.
///
/// Classification happens exactly once, here; downstream branches match on
/// the variant and never re-inspect the raw body.
#[derive(Debug, Clone)]
pub enum ClientMessage {
    /// A request expecting a response (has `id` and `method`).
    Request(RpcRequest),
    /// A notification (has `method`, no `id`); never answered.
    Notification(RpcRequest),
    /// A response to a server-initiated request (has `result` or `error`).
    Response(JsonRpcResponse),
}

impl ClientMessage {
    /// Returns true if this message is the initialization handshake request.
    pub fn is_initialize(&self) -> bool {
        matches!(self, ClientMessage::Request(req) if req.is_initialize())
    }
}

/// Parse result: a single message or a batch.
#[derive(Debug)]
pub enum ParsedBody {
    /// Single message
    Single(ClientMessage),
    /// Batch of messages (order preserved)
    Batch(Vec<ClientMessage>),
}

impl ParsedBody {
    /// Returns true if any message in the body is an initialize request.
    pub fn contains_initialize(&self) -> bool {
        match self {
            ParsedBody::Single(msg) => msg.is_initialize(),
            ParsedBody::Batch(msgs) => msgs.iter().any(ClientMessage::is_initialize),
        }
    }

    /// Total number of messages in the body.
    pub fn len(&self) -> usize {
        match self {
            ParsedBody::Single(_) => 1,
            ParsedBody::Batch(msgs) => msgs.len(),
        }
    }

    /// Returns true if the body holds no messages. Kept for symmetry with
    /// `len`; an empty batch never survives parsing.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Consume the body into a flat, ordered message list.
    pub fn into_messages(self) -> Vec<ClientMessage> {
        match self {
            ParsedBody::Single(msg) => vec![msg],
            ParsedBody::Batch(msgs) => msgs,
        }
    }
}

/// Parse JSON bytes into JSON-RPC 2.0 message(s).
///
/// # Returns
///
/// * `Ok(ParsedBody)` - Successfully parsed message(s)
/// * `Err(GateError::ParseError)` - Malformed JSON (-32700)
/// * `Err(GateError::InvalidRequest)` - Invalid JSON-RPC structure (-32600)
///
/// A body containing any invalid message is rejected whole: the transport
/// never speculatively executes the valid prefix of an unparsable payload.
pub fn parse_body(bytes: &[u8]) -> Result<ParsedBody, GateError> {
    // Peek at the first non-whitespace byte to determine single vs batch
    // without parsing the entire payload into an intermediate Value.
    let first_byte = bytes
        .iter()
        .find(|b| !b.is_ascii_whitespace())
        .ok_or_else(|| GateError::ParseError {
            details: "Invalid JSON: empty input".to_string(),
        })?;

    match first_byte {
        b'{' => {
            // Single message fast path: deserialize directly to
            // RawJsonRpcMessage, skipping the intermediate Value allocation.
            let raw: RawJsonRpcMessage = serde_json::from_slice(bytes).map_err(|e| {
                // Distinguish syntax errors (bad JSON) from semantic errors
                // (valid JSON but invalid field values like float IDs).
                if e.is_syntax() || e.is_eof() {
                    GateError::ParseError {
                        details: format!("Invalid JSON: {}", e),
                    }
                } else {
                    GateError::InvalidRequest {
                        details: format!("Invalid JSON-RPC structure: {}", e),
                    }
                }
            })?;
            Ok(ParsedBody::Single(classify_raw(raw)?))
        }
        b'[' => {
            let arr: Vec<Value> =
                serde_json::from_slice(bytes).map_err(|e| GateError::ParseError {
                    details: format!("Invalid JSON: {}", e),
                })?;

            if arr.is_empty() {
                return Err(GateError::InvalidRequest {
                    details: "Empty batch is not allowed".to_string(),
                });
            }

            let mut messages = Vec::with_capacity(arr.len());
            for item in arr {
                let raw: RawJsonRpcMessage =
                    serde_json::from_value(item).map_err(|e| GateError::InvalidRequest {
                        details: format!("Invalid JSON-RPC structure: {}", e),
                    })?;
                messages.push(classify_raw(raw)?);
            }
            Ok(ParsedBody::Batch(messages))
        }
        _ => {
            // Attempt parse to get a proper serde error message
            serde_json::from_slice::<Value>(bytes)
                .map_err(|e| GateError::ParseError {
                    details: format!("Invalid JSON: {}", e),
                })
                .and_then(|_| {
                    // Parsed successfully but isn't object or array
                    Err(GateError::InvalidRequest {
                        details: "Request body must be an object or array".to_string(),
                    })
                })
        }
    }
}

/// Validate and classify a raw JSON-RPC message.
///
/// Shared by the single-message fast path and the batch path.
fn classify_raw(raw: RawJsonRpcMessage) -> Result<ClientMessage, GateError> {
    // Validate JSON-RPC version
    match raw.jsonrpc.as_deref() {
        Some("2.0") => {}
        Some(v) => {
            return Err(GateError::InvalidRequest {
                details: format!("Invalid jsonrpc version: expected \"2.0\", got \"{}\"", v),
            });
        }
        None => {
            return Err(GateError::InvalidRequest {
                details: "Missing required field: jsonrpc".to_string(),
            });
        }
    }

    if let Some(method) = raw.method {
        if raw.result.is_some() || raw.error.is_some() {
            return Err(GateError::InvalidRequest {
                details: "Message cannot carry both method and result/error".to_string(),
            });
        }

        let request = RpcRequest {
            id: raw.id,
            method,
            params: raw.params.map(Arc::new),
            received_at: Instant::now(),
            correlation_id: fast_correlation_id(),
        };

        if request.is_notification() {
            Ok(ClientMessage::Notification(request))
        } else {
            Ok(ClientMessage::Request(request))
        }
    } else if raw.result.is_some() || raw.error.is_some() {
        // Client-to-server response (answers a server-initiated request).
        let error = match raw.error {
            None => None,
            Some(v) => Some(serde_json::from_value(v).map_err(|e| GateError::InvalidRequest {
                details: format!("Invalid error object: {}", e),
            })?),
        };
        Ok(ClientMessage::Response(JsonRpcResponse {
            jsonrpc: Cow::Borrowed(JSONRPC_VERSION),
            id: raw.id,
            result: raw.result,
            error,
        }))
    } else {
        Err(GateError::InvalidRequest {
            details: "Missing required field: method".to_string(),
        })
    }
}
