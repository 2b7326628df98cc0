//! Request header size limit.
//!
//! Applied by the server before a request reaches the pipeline, for both
//! protocols. HTTP/2 connections also advertise a header list size in their
//! SETTINGS frame; that one is looser (see
//! [`http2_header_list_size`]) so over-limit requests still reach
//! [`check_headers`] and get the JSON 431.

use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Bytes one header field takes on the wire: `name: value\r\n`.
pub fn header_bytes(headers: &HeaderMap) -> usize {
    headers
        .iter()
        .map(|(name, value)| name.as_str().len() + value.len() + 4)
        .sum()
}

/// Room for pseudo-headers (`:method`, `:path`, ...) which [`header_bytes`]
/// never sees.
const HTTP2_PSEUDO_HEADER_ALLOWANCE: usize = 8 * 1024;

/// SETTINGS_MAX_HEADER_LIST_SIZE to advertise for a `max_bytes` limit.
///
/// HTTP/2 counts `name + value + 32` per field where [`header_bytes`] counts
/// `+ 4`. The smallest field we count is 5 bytes (33 for h2), so the h2 size of
/// any header set stays under 7x ours; anything between the two limits is left to
/// [`check_headers`].
pub fn http2_header_list_size(max_bytes: usize) -> u32 {
    let size = max_bytes
        .saturating_mul(8)
        .saturating_add(HTTP2_PSEUDO_HEADER_ALLOWANCE);
    u32::try_from(size).unwrap_or(u32::MAX)
}

/// `Some(431 response)` when the combined header size exceeds `max_bytes`.
pub fn check_headers(headers: &HeaderMap, max_bytes: usize) -> Option<Response> {
    let size = header_bytes(headers);
    if size <= max_bytes {
        return None;
    }

    tracing::debug!(size, max_bytes, "Rejecting oversized request headers");
    Some(
        (
            StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE,
            Json(json!({ "status": "request header fields too large" })),
        )
            .into_response(),
    )
}
