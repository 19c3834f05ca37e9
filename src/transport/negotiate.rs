//! Content negotiation.
//!
//! The gateway answers a POST in one of two modes: a single JSON document or
//! an SSE event stream. Which mode applies is only known after dispatch, so
//! the client must be prepared for both up front: its `Accept` header has to
//! cover `application/json` AND `text/event-stream`. Requests that cannot
//! receive one of the modes are rejected with 406 before any session state
//! is touched.

use axum::http::{HeaderMap, header};

use crate::error::GateError;

/// JSON media type.
pub const APPLICATION_JSON: &str = "application/json";

/// SSE media type.
pub const TEXT_EVENT_STREAM: &str = "text/event-stream";

/// Response mode for a POST, frozen before any bytes are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseMode {
    /// Single JSON document (object or array)
    Json,
    /// SSE event stream
    EventStream,
}

/// Require that `Accept` covers both response modes. 406 otherwise.
pub fn require_dual_accept(headers: &HeaderMap) -> Result<(), GateError> {
    if accepts(headers, APPLICATION_JSON) && accepts(headers, TEXT_EVENT_STREAM) {
        Ok(())
    } else {
        Err(GateError::NotAcceptable)
    }
}

/// Require that `Accept` covers `text/event-stream`. 406 otherwise.
pub fn require_event_stream_accept(headers: &HeaderMap) -> Result<(), GateError> {
    if accepts(headers, TEXT_EVENT_STREAM) {
        Ok(())
    } else {
        Err(GateError::NotAcceptable)
    }
}

/// Require a JSON request body declaration. 415 otherwise.
///
/// Parameters after the media type (e.g., `;charset=utf-8`) are accepted.
pub fn require_json_content_type(headers: &HeaderMap) -> Result<(), GateError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .ok_or(GateError::UnsupportedMediaType)?;

    let media_type = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();

    if media_type == APPLICATION_JSON {
        Ok(())
    } else {
        Err(GateError::UnsupportedMediaType)
    }
}

/// Check whether the `Accept` header covers `media_type`, explicitly or via
/// a `*/*` or `type/*` wildcard. An absent header covers nothing: the client
/// has to declare readiness for both response modes.
fn accepts(headers: &HeaderMap, media_type: &str) -> bool {
    let Some(accept) = headers.get(header::ACCEPT).and_then(|v| v.to_str().ok()) else {
        return false;
    };

    let (want_type, want_subtype) = match media_type.split_once('/') {
        Some(parts) => parts,
        None => return false,
    };

    accept.split(',').any(|entry| {
        // Strip quality and other parameters
        let range = entry.split(';').next().unwrap_or("").trim();
        match range.split_once('/') {
            Some(("*", "*")) => true,
            Some((t, "*")) => t.eq_ignore_ascii_case(want_type),
            Some((t, s)) => t.eq_ignore_ascii_case(want_type) && s.eq_ignore_ascii_case(want_subtype),
            None => false,
        }
    })
}
