//! Error handling for StreamGate.
//!
//! This module defines all error types that can occur in the gateway and
//! provides JSON-RPC 2.0 compliant error response formatting. Every error a
//! client sees is a structured envelope, never a bare transport failure.
//!
//! ## Error classes
//!
//! - Negotiation errors (`NotAcceptable`, `UnsupportedMediaType`) reject the
//!   request before any session state is touched.
//! - Message errors (`ParseError`, `InvalidRequest`) reject the request with
//!   no session mutation.
//! - `SessionNotFound` signals the client must re-initialize.
//! - Capability errors are terminal for one request only; the session
//!   remains valid.

pub mod jsonrpc;

use axum::http::StatusCode;
use jsonrpc::{ErrorData, JsonRpcError};
use thiserror::Error;

/// All error types that can occur in the gateway.
///
/// Each variant maps to a JSON-RPC error code and an HTTP status. Variants
/// with status 200 are surfaced inside the protocol envelope because the
/// session itself is still healthy.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum GateError {
    // Protocol errors
    /// Invalid JSON in request body.
    #[error("Invalid JSON: {details}")]
    ParseError {
        /// Description of the parse error
        details: String,
    },

    /// Request is not a valid JSON-RPC 2.0 message.
    #[error("Invalid JSON-RPC request: {details}")]
    InvalidRequest {
        /// Description of what makes the request invalid
        details: String,
    },

    /// The requested procedure does not exist.
    #[error("Method '{method}' not found")]
    MethodNotFound {
        /// The method name that was not found
        method: String,
    },

    /// The method parameters are invalid.
    #[error("Invalid parameters: {details}")]
    InvalidParams {
        /// Description of the parameter validation failure
        details: String,
    },

    // Negotiation errors
    /// The Accept header does not cover both response content types the
    /// transport may need.
    #[error("Not acceptable: client must accept both application/json and text/event-stream")]
    NotAcceptable,

    /// Request body is not declared as JSON.
    #[error("Unsupported media type: Content-Type must be application/json")]
    UnsupportedMediaType,

    // Session errors
    /// Continuation request carried an identifier with no live session.
    #[error("Session not found")]
    SessionNotFound {
        /// The session identifier the client presented
        session_id: String,
    },

    /// The session already has an open server-push stream.
    #[error("Session already has an active event stream")]
    StreamOccupied {
        /// The session identifier
        session_id: String,
    },

    // Allow-list guard errors
    /// Request origin is not on the allow-list.
    #[error("Origin not allowed")]
    ForbiddenOrigin {
        /// The rejected origin value
        origin: String,
    },

    /// Request host header is not on the allow-list.
    #[error("Host not allowed")]
    ForbiddenHost {
        /// The rejected host value
        host: String,
    },

    // Capability errors
    /// The invoked procedure ran and failed.
    #[error("Procedure '{procedure}' failed: {message}")]
    CapabilityFailed {
        /// The procedure that failed
        procedure: String,
        /// Error code reported by the capability surface
        code: i32,
        /// Error message reported by the capability surface
        message: String,
    },

    /// The capability call could not be made at all.
    #[error("Procedure '{procedure}' could not be invoked: {reason}")]
    CapabilityUnavailable {
        /// The procedure that could not be invoked
        procedure: String,
        /// Reason the call could not be made
        reason: String,
    },

    // Operational errors
    /// Service is temporarily unavailable (concurrency limit reached).
    #[error("Service temporarily unavailable")]
    ServiceUnavailable {
        /// Reason for unavailability
        reason: String,
    },

    /// Internal server error - should not happen.
    #[error("Internal error. Reference: {correlation_id}")]
    InternalError {
        /// Correlation ID for debugging
        correlation_id: String,
    },
}

impl GateError {
    /// Maps error to JSON-RPC 2.0 error code.
    ///
    /// Standard JSON-RPC codes (-32700 to -32603) are used for protocol
    /// errors; gateway custom codes (-32000 to -32013) for everything else.
    pub fn to_jsonrpc_code(&self) -> i32 {
        match self {
            // Standard JSON-RPC codes
            Self::ParseError { .. } => -32700,
            Self::InvalidRequest { .. } => -32600,
            Self::MethodNotFound { .. } => -32601,
            Self::InvalidParams { .. } => -32602,
            Self::InternalError { .. } => -32603,

            // Gateway custom codes
            Self::NotAcceptable => -32000,
            Self::SessionNotFound { .. } => -32001,
            Self::ForbiddenOrigin { .. } => -32002,
            Self::ForbiddenHost { .. } => -32003,
            Self::CapabilityFailed { code, .. } => *code,
            Self::CapabilityUnavailable { .. } => -32005,
            Self::StreamOccupied { .. } => -32006,
            Self::UnsupportedMediaType => -32007,
            Self::ServiceUnavailable { .. } => -32013,
        }
    }

    /// Maps error to the HTTP status of the enclosing response.
    ///
    /// Variants returning `OK` are delivered inside the protocol envelope:
    /// the request failed but the transport exchange succeeded.
    pub fn http_status(&self) -> StatusCode {
        match self {
            Self::ParseError { .. } | Self::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            Self::NotAcceptable => StatusCode::NOT_ACCEPTABLE,
            Self::UnsupportedMediaType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::SessionNotFound { .. } => StatusCode::NOT_FOUND,
            Self::StreamOccupied { .. } => StatusCode::CONFLICT,
            Self::ForbiddenOrigin { .. } | Self::ForbiddenHost { .. } => StatusCode::FORBIDDEN,
            Self::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::InternalError { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::MethodNotFound { .. }
            | Self::InvalidParams { .. }
            | Self::CapabilityFailed { .. }
            | Self::CapabilityUnavailable { .. } => StatusCode::OK,
        }
    }

    /// Returns the error type name for metrics and logging.
    pub fn error_type_name(&self) -> &'static str {
        match self {
            Self::ParseError { .. } => "parse_error",
            Self::InvalidRequest { .. } => "invalid_request",
            Self::MethodNotFound { .. } => "method_not_found",
            Self::InvalidParams { .. } => "invalid_params",
            Self::NotAcceptable => "not_acceptable",
            Self::UnsupportedMediaType => "unsupported_media_type",
            Self::SessionNotFound { .. } => "session_not_found",
            Self::StreamOccupied { .. } => "stream_occupied",
            Self::ForbiddenOrigin { .. } => "forbidden_origin",
            Self::ForbiddenHost { .. } => "forbidden_host",
            Self::CapabilityFailed { .. } => "capability_failed",
            Self::CapabilityUnavailable { .. } => "capability_unavailable",
            Self::ServiceUnavailable { .. } => "service_unavailable",
            Self::InternalError { .. } => "internal_error",
        }
    }

    /// Returns safe details for client consumption (no sensitive data).
    pub fn safe_details(&self) -> Option<serde_json::Value> {
        match self {
            Self::MethodNotFound { method } => Some(serde_json::json!({ "method": method })),
            Self::SessionNotFound { session_id } | Self::StreamOccupied { session_id } => {
                Some(serde_json::json!({ "session_id": session_id }))
            }
            Self::CapabilityFailed { procedure, .. }
            | Self::CapabilityUnavailable { procedure, .. } => {
                Some(serde_json::json!({ "procedure": procedure }))
            }
            // Rejected origin/host values are echoed back so a misconfigured
            // client can see what it sent; they came from the client anyway.
            Self::ForbiddenOrigin { origin } => Some(serde_json::json!({ "origin": origin })),
            Self::ForbiddenHost { host } => Some(serde_json::json!({ "host": host })),
            _ => None,
        }
    }

    /// Converts error to JSON-RPC error response.
    pub fn to_jsonrpc_error(&self, correlation_id: &str) -> JsonRpcError {
        JsonRpcError {
            code: self.to_jsonrpc_code(),
            message: self.to_string(),
            data: Some(ErrorData {
                correlation_id: correlation_id.to_string(),
                error_type: self.error_type_name().to_string(),
                details: self.safe_details(),
            }),
        }
    }
}
