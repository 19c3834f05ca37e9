//! StreamGate - session-multiplexing gateway for stateful RPC over HTTP.
//!
//! StreamGate serves many concurrent client sessions on one HTTP endpoint.
//! A client opens a session with a JSON-RPC `initialize` handshake, then
//! routes every subsequent request with the `mcp-session-id` header to its
//! own protocol engine. Replies come back as a single JSON document or,
//! when a procedure streams, as server-sent events.
//!
//! # Layers
//!
//! - [`protocol`] - JSON-RPC 2.0 message types and parsing
//! - [`transport`] - negotiation, allow-list guard, session registry and
//!   engine, axum router
//! - [`capability`] - the procedure surface sessions dispatch into
//! - [`error`] - `GateError` and JSON-RPC error envelopes
//! - [`admin`] - health/status/metrics endpoints on a dedicated port

pub mod admin;
pub mod capability;
pub mod config;
pub mod error;
pub mod metrics;
pub mod protocol;
pub mod transport;
