//! ping-service: a health-check HTTP service.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client ──▶ net::Listener ──▶ http::server (HTTP/1.1 | h2c)
//!                                       │
//!                                       ▼
//!                               http::RequestPipeline
//!                    access_log ──▶ recovery ──▶ routing::routes()
//!                        │             │
//!                        ▼             ▼
//!                   observability::LogSink (access records, diagnostics)
//! ```

pub mod config;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod routing;

pub use config::AppConfig;
pub use http::{HttpServer, RequestPipeline};
pub use lifecycle::Shutdown;
