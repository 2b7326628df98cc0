//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (HTTP/1.1 or h2c detection, header limit, idle and write timeouts)
//!     → pipeline.rs
//!         → access_log.rs (timer, one access record per request)
//!         → recovery.rs (panic isolation)
//!         → application router (repeated and trailing slashes normalized)
//!     → Send to client, or tear the connection down
//! ```

pub mod access_log;
pub mod limits;
pub mod pipeline;
pub mod recovery;
pub mod request;
pub mod server;

use std::time::Duration;

pub use pipeline::{PipelineOptions, RequestPipeline};
pub use server::{HttpServer, ServerError};

/// Outcomes that end a request without a response being written.
///
/// Returning one of these from the connection service makes hyper drop the
/// HTTP/1.1 connection or reset the HTTP/2 stream.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("connection aborted: {0}")]
    ConnectionAborted(String),

    #[error("response not produced within {0:?}")]
    TimedOut(Duration),
}
