use axum::Json;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct Pong {
    pub data: &'static str,
}

/// Liveness check: the process is up and serving requests.
pub async fn ping() -> Json<Pong> {
    Json(Pong { data: "PONG" })
}
