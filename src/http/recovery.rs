//! Panic recovery stage.
//!
//! # Responsibilities
//! - Catch any panic raised while the wrapped handler is called or polled
//! - Classify it as a broken connection or an internal error
//! - Emit diagnostics through the sink
//! - Turn it into a `500 {}` response, or abort the connection when the peer
//!   is already gone
//!
//! # Design Decisions
//! - The request body is never read on the handler's behalf; whatever the
//!   handler reads is copied (up to `maxBodyBytes`) for the raw-request dump
//! - Stack traces are captured by a panic hook at the panic site; the hook
//!   stays silent for panics inside a guarded poll and defers to the previous
//!   hook everywhere else

use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::{Cell, RefCell};
use std::convert::Infallible;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::{Arc, Once};
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::future::BoxFuture;
use serde_json::json;
use tower::{Layer, Service};

use crate::http::request::{dump_head, BodyCapture, PrivateErrors};
use crate::http::PipelineError;
use crate::observability::{Diagnostic, LogSink};

const BROKEN_CONNECTION_MARKERS: [&str; 2] = ["broken pipe", "connection reset by peer"];

/// Broad origin of a recovered fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// An I/O error from the transport.
    Network,
    /// Anything else.
    Other,
}

/// Normalized representation of a panic payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fault {
    pub kind: FaultKind,
    pub message: String,
}

impl Fault {
    pub fn network(message: impl Into<String>) -> Self {
        Self {
            kind: FaultKind::Network,
            message: message.into(),
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self {
            kind: FaultKind::Other,
            message: message.into(),
        }
    }

    /// Normalize a panic payload. `std::io::Error` payloads are network faults.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let payload = match payload.downcast::<std::io::Error>() {
            Ok(err) => return Self::network(err.to_string()),
            Err(payload) => payload,
        };
        let payload = match payload.downcast::<String>() {
            Ok(message) => return Self::other(*message),
            Err(payload) => payload,
        };
        match payload.downcast::<&'static str>() {
            Ok(message) => Self::other(*message),
            Err(_) => Self::other("Box<dyn Any>"),
        }
    }

    /// A network fault whose message names a broken pipe or a reset peer.
    pub fn is_broken_connection(&self) -> bool {
        if self.kind != FaultKind::Network {
            return false;
        }
        let message = self.message.to_lowercase();
        BROKEN_CONNECTION_MARKERS
            .iter()
            .any(|marker| message.contains(marker))
    }
}

/// A recovered panic, ready for the diagnostic emitter.
#[derive(Debug, Clone)]
pub struct PanicEvent {
    pub fault: Fault,
    pub stack: String,
    pub request: String,
    pub broken_connection: bool,
}

impl PanicEvent {
    fn new(fault: Fault, stack: String, request: String) -> Self {
        let broken_connection = fault.is_broken_connection();
        Self {
            fault,
            stack,
            request,
            broken_connection,
        }
    }
}

thread_local! {
    static GUARD_DEPTH: Cell<usize> = const { Cell::new(0) };
    static LAST_STACK: RefCell<Option<String>> = const { RefCell::new(None) };
}

static HOOK: Once = Once::new();

/// Install the process panic hook that records stack traces for guarded polls.
///
/// Idempotent. Without it, recovery still works but the stack is captured at
/// the recovery site instead of the panic site.
pub fn install_panic_hook() {
    HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if GUARD_DEPTH.with(Cell::get) > 0 {
                let stack = Backtrace::force_capture().to_string();
                LAST_STACK.with(|slot| *slot.borrow_mut() = Some(stack));
            } else {
                previous(info);
            }
        }));
    });
}

fn take_stack() -> String {
    LAST_STACK
        .with(|slot| slot.borrow_mut().take())
        .unwrap_or_else(|| Backtrace::force_capture().to_string())
}

struct GuardScope;

impl GuardScope {
    fn enter() -> Self {
        GUARD_DEPTH.with(|depth| depth.set(depth.get() + 1));
        GuardScope
    }
}

impl Drop for GuardScope {
    fn drop(&mut self) {
        GUARD_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

/// Future adapter that converts a panic during any poll into `Err(payload)`.
struct Guarded<F> {
    inner: Pin<Box<F>>,
}

impl<F: Future> Future for Guarded<F> {
    type Output = Result<F::Output, (Fault, String)>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let _scope = GuardScope::enter();
        match panic::catch_unwind(AssertUnwindSafe(|| this.inner.as_mut().poll(cx))) {
            Ok(Poll::Ready(output)) => Poll::Ready(Ok(output)),
            Ok(Poll::Pending) => Poll::Pending,
            Err(payload) => Poll::Ready(Err((Fault::from_panic(payload), take_stack()))),
        }
    }
}

/// Layer that applies [`Recovery`].
#[derive(Clone)]
pub struct RecoveryLayer {
    sink: Arc<dyn LogSink>,
    max_body_bytes: usize,
}

impl RecoveryLayer {
    pub fn new(sink: Arc<dyn LogSink>, max_body_bytes: usize) -> Self {
        install_panic_hook();
        Self {
            sink,
            max_body_bytes,
        }
    }
}

impl<S> Layer<S> for RecoveryLayer {
    type Service = Recovery<S>;

    fn layer(&self, inner: S) -> Self::Service {
        Recovery {
            inner,
            sink: Arc::clone(&self.sink),
            max_body_bytes: self.max_body_bytes,
        }
    }
}

/// Service that isolates handler panics from the connection.
#[derive(Clone)]
pub struct Recovery<S> {
    inner: S,
    sink: Arc<dyn LogSink>,
    max_body_bytes: usize,
}

impl<S> Service<Request<Body>> for Recovery<S>
where
    S: Service<Request<Body>, Response = Response, Error = Infallible> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = PipelineError;
    type Future = BoxFuture<'static, Result<Response, PipelineError>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(|never| match never {})
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let sink = Arc::clone(&self.sink);
        let max_body_bytes = self.max_body_bytes;

        Box::pin(async move {
            let (parts, body) = request.into_parts();
            let head = dump_head(&parts);
            let path = parts.uri.path().to_string();
            let errors = parts.extensions.get::<PrivateErrors>().cloned();
            let capture = BodyCapture::new(max_body_bytes);
            let request = Request::from_parts(parts, capture.wrap(body));

            let guarded = Guarded {
                inner: Box::pin(async move { inner.call(request).await }),
            };

            match guarded.await {
                Ok(Ok(response)) => Ok(response),
                Ok(Err(never)) => match never {},
                Err((fault, stack)) => {
                    let raw_request = head + &capture.render();
                    let event = PanicEvent::new(fault, stack, raw_request);
                    recover(sink.as_ref(), &path, errors.as_ref(), event)
                }
            }
        })
    }
}

/// Emit diagnostics for `event` and decide what the client sees.
fn recover(
    sink: &dyn LogSink,
    path: &str,
    errors: Option<&PrivateErrors>,
    event: PanicEvent,
) -> Result<Response, PipelineError> {
    if event.broken_connection {
        sink.diagnostic(Diagnostic::BrokenConnection {
            path: path.to_string(),
            error: event.fault.message.clone(),
            request: event.request,
        });
        if let Some(errors) = errors {
            errors.push(event.fault.message.clone());
        }
        // The peer is gone; writing a status would only fail again.
        return Err(PipelineError::ConnectionAborted(event.fault.message));
    }

    sink.diagnostic(Diagnostic::Panic(event.fault.message));
    sink.diagnostic(Diagnostic::Stack(event.stack));
    sink.diagnostic(Diagnostic::RawRequest(event.request));
    Ok((StatusCode::INTERNAL_SERVER_ERROR, Json(json!({}))).into_response())
}
