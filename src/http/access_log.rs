//! Access logging stage.
//!
//! Starts a timer, hands the request to the next stage, and emits exactly one
//! [`AccessRecord`] when control returns, whether the inner stages produced a
//! response, aborted the connection, or were cancelled.

use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use axum::body::Body;
use axum::http::Request;
use axum::response::Response;
use futures_util::future::BoxFuture;
use tower::{Layer, Service};

use crate::http::request::{ClientIpResolver, RequestContext};
use crate::http::PipelineError;
use crate::observability::{AccessRecord, LogSink};

/// Status recorded when no response could be written (nginx's "client closed request").
pub const CLIENT_CLOSED_REQUEST: u16 = 499;

/// Layer that applies [`AccessLog`].
#[derive(Clone)]
pub struct AccessLogLayer {
    sink: Arc<dyn LogSink>,
    resolver: ClientIpResolver,
}

impl AccessLogLayer {
    pub fn new(sink: Arc<dyn LogSink>, resolver: ClientIpResolver) -> Self {
        Self { sink, resolver }
    }
}

impl<S> Layer<S> for AccessLogLayer {
    type Service = AccessLog<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AccessLog {
            inner,
            sink: Arc::clone(&self.sink),
            resolver: self.resolver.clone(),
        }
    }
}

#[derive(Clone)]
pub struct AccessLog<S> {
    inner: S,
    sink: Arc<dyn LogSink>,
    resolver: ClientIpResolver,
}

impl<S> Service<Request<Body>> for AccessLog<S>
where
    S: Service<Request<Body>, Response = Response, Error = PipelineError> + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = PipelineError;
    type Future = BoxFuture<'static, Result<Response, PipelineError>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut request: Request<Body>) -> Self::Future {
        let start = Instant::now();
        let ctx = RequestContext::from_request(&request, &self.resolver);
        request.extensions_mut().insert(ctx.errors.clone());

        let future = self.inner.call(request);
        let mut in_flight = InFlight {
            sink: Arc::clone(&self.sink),
            ctx: Some(ctx),
            start,
        };

        Box::pin(async move {
            let result = future.await;
            let status = match &result {
                Ok(response) => response.status().as_u16(),
                Err(_) => CLIENT_CLOSED_REQUEST,
            };
            in_flight.finish(status);
            result
        })
    }
}

/// Pending access record. Emitted on completion, or on drop if the request
/// future is cancelled (write timeout, peer reset of an HTTP/2 stream).
struct InFlight {
    sink: Arc<dyn LogSink>,
    ctx: Option<RequestContext>,
    start: Instant,
}

impl InFlight {
    fn finish(&mut self, status: u16) {
        let Some(ctx) = self.ctx.take() else {
            return;
        };
        self.sink.access(AccessRecord {
            path: ctx.path,
            status,
            method: ctx.method,
            query: ctx.query,
            client_ip: ctx.client_ip,
            user_agent: ctx.user_agent,
            errors: ctx.errors.joined(),
            cost: self.start.elapsed(),
        });
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.finish(CLIENT_CLOSED_REQUEST);
    }
}
