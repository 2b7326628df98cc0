//! Logging sink consumed by the request pipeline.
//!
//! The pipeline emits two kinds of records: one [`AccessRecord`] per request
//! and zero or more [`Diagnostic`]s when a handler panics. Both go through a
//! [`LogSink`] trait object constructed at bootstrap.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Snapshot of one completed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessRecord {
    pub path: String,
    pub status: u16,
    pub method: String,
    pub query: String,
    pub client_ip: String,
    pub user_agent: String,
    /// Private errors attached while handling, joined with `;`.
    pub errors: String,
    pub cost: Duration,
}

impl AccessRecord {
    /// Elapsed time in fractional milliseconds.
    pub fn cost_ms(&self) -> f64 {
        self.cost.as_secs_f64() * 1000.0
    }
}

/// Error-severity record produced by panic recovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    /// The peer went away mid-request; logged once with full context.
    BrokenConnection {
        path: String,
        error: String,
        request: String,
    },
    /// The recovered panic value.
    Panic(String),
    /// Stack trace captured at the panic site.
    Stack(String),
    /// The raw HTTP request that triggered the panic.
    RawRequest(String),
}

/// Destination for pipeline records. Must tolerate concurrent writers.
pub trait LogSink: Send + Sync {
    fn access(&self, record: AccessRecord);

    fn diagnostic(&self, diagnostic: Diagnostic);
}

/// Sink that forwards records to the installed tracing subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn access(&self, record: AccessRecord) {
        tracing::info!(
            status = record.status,
            method = %record.method,
            path = %record.path,
            query = %record.query,
            ip = %record.client_ip,
            user_agent = %record.user_agent,
            errors = %record.errors,
            cost_ms = record.cost_ms(),
            "{}",
            record.path
        );
    }

    fn diagnostic(&self, diagnostic: Diagnostic) {
        match diagnostic {
            Diagnostic::BrokenConnection {
                path,
                error,
                request,
            } => tracing::error!(error = %error, request = %request, "{}", path),
            Diagnostic::Panic(value) => tracing::error!("{}", value),
            Diagnostic::Stack(stack) => tracing::error!("{}", stack),
            Diagnostic::RawRequest(request) => tracing::error!("[raw http request] {}", request),
        }
    }
}

/// Sink that keeps every record in memory, for assertions.
#[derive(Debug, Default)]
pub struct RecordingSink {
    access: Mutex<Vec<AccessRecord>>,
    diagnostics: Mutex<Vec<Diagnostic>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn access_records(&self) -> Vec<AccessRecord> {
        self.access
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.diagnostics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl LogSink for RecordingSink {
    fn access(&self, record: AccessRecord) {
        self.access
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
    }

    fn diagnostic(&self, diagnostic: Diagnostic) {
        self.diagnostics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(diagnostic);
    }
}
