//! Route registration.
//!
//! # Design Decisions
//! - Routes registered at startup, immutable at runtime
//! - Only the listed method is served on a known path; everything else,
//!   `HEAD` included, is 405
//! - Unknown paths get a JSON 404 rather than an empty body

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;

use crate::health::ping;

pub const PING_PATH: &str = "/service/ping";

/// The application's route table.
pub fn routes() -> Router {
    with_fallbacks(
        Router::new().route(PING_PATH, get(ping::ping).head(method_not_allowed)),
    )
}

/// Attach the 404 and 405 responses to a route table.
pub fn with_fallbacks(router: Router) -> Router {
    router
        .fallback(not_found)
        .method_not_allowed_fallback(method_not_allowed)
}

pub async fn not_found() -> Response {
    (StatusCode::NOT_FOUND, Json(json!({ "status": "not found" }))).into_response()
}

pub async fn method_not_allowed() -> Response {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        Json(json!({ "status": "method not allowed" })),
    )
        .into_response()
}
