//! Protocol message layer.
//!
//! This module owns the wire format of the gateway: JSON-RPC 2.0 message
//! types, parsing (single and batch), and the structural classification
//! that decides, once at the top of the request pipeline, whether an
//! inbound body is an initialization handshake or a continuation payload.
//! Nothing deeper in the pipeline re-inspects raw bytes.

pub mod jsonrpc;

pub use jsonrpc::{
    ClientMessage, JsonRpcId, JsonRpcResponse, ParsedBody, RpcRequest, fast_correlation_id,
    parse_body,
};

/// Protocol revision advertised to clients during the handshake.
pub const PROTOCOL_VERSION: &str = "2025-03-26";

/// Request header carrying the session identifier on continuation requests.
pub const SESSION_ID_HEADER: &str = "mcp-session-id";
