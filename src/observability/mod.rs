//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Pipeline stages produce:
//!     → sink.rs (AccessRecord / Diagnostic, through an explicit LogSink)
//!     → TracingSink turns them into tracing events
//!
//! logging.rs installs the subscriber that renders those events:
//!     → JSON lines outside development
//!     → colored, human-readable output in development
//! ```
//!
//! # Design Decisions
//! - Stages never reach for a global logger; the sink is built at bootstrap
//!   and shared by `Arc`
//! - The sink must accept concurrent writes from every connection task

pub mod logging;
pub mod sink;

pub use sink::{AccessRecord, Diagnostic, LogSink, RecordingSink, TracingSink};
