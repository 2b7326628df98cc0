//! HTTP server setup.
//!
//! # Responsibilities
//! - Serve HTTP/1.1 and cleartext HTTP/2 (prior knowledge) on one listener
//! - Enforce the header size limit before the pipeline sees a request
//! - Enforce read (header and idle) and write (response) timeouts per connection
//! - Attach the peer address to each request
//! - Stop accepting on shutdown or when the listening socket fails
//!
//! # Design Decisions
//! - `Upgrade: h2c` offers on HTTP/1.1 requests are ignored; those requests
//!   are answered over HTTP/1.1
//! - A connection with no request in flight for longer than the read timeout
//!   is dropped, whether it never sent anything, stalled mid-preface, or went
//!   quiet after a keep-alive response

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::Request;
use axum::response::Response;
use hyper::body::Incoming;
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use hyper_util::server::conn::auto;
use tokio::time::Instant;

use crate::config::ServerConfig;
use crate::http::{limits, PipelineError, RequestPipeline};
use crate::net::{Listener, ListenerError};

/// Pause after a transient accept failure so a persistent one (e.g. EMFILE)
/// cannot spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Error type for the accept loop.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error("Listener address unavailable: {0}")]
    Io(#[from] std::io::Error),
}

/// HTTP server for the service.
pub struct HttpServer {
    handler: ConnectionHandler,
    config: ServerConfig,
}

/// Per-request work shared by every connection task.
#[derive(Clone)]
struct ConnectionHandler {
    pipeline: RequestPipeline,
    max_header_bytes: usize,
    write_timeout: Duration,
}

impl ConnectionHandler {
    async fn serve(
        &self,
        request: Request<Incoming>,
        peer: SocketAddr,
    ) -> Result<Response, PipelineError> {
        if let Some(rejection) = limits::check_headers(request.headers(), self.max_header_bytes) {
            return Ok(rejection);
        }

        let mut request = request.map(Body::new);
        request.extensions_mut().insert(ConnectInfo(peer));

        match tokio::time::timeout(self.write_timeout, self.pipeline.handle(request)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(peer = %peer, timeout = ?self.write_timeout, "Write timeout elapsed, closing connection");
                Err(PipelineError::TimedOut(self.write_timeout))
            }
        }
    }
}

/// Requests in flight on one connection and when the last one finished.
#[derive(Debug)]
struct ConnectionActivity {
    in_flight: AtomicUsize,
    last_seen: Mutex<Instant>,
}

impl ConnectionActivity {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            in_flight: AtomicUsize::new(0),
            last_seen: Mutex::new(Instant::now()),
        })
    }

    fn begin(self: &Arc<Self>) -> ActiveRequest {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        ActiveRequest(Arc::clone(self))
    }

    fn last_seen(&self) -> Instant {
        *self.last_seen.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// `Some(deadline)` while idle; `None` while a request is being served.
    fn idle_deadline(&self, idle_timeout: Duration) -> Option<Instant> {
        if self.in_flight.load(Ordering::SeqCst) > 0 {
            return None;
        }
        Some(self.last_seen() + idle_timeout)
    }
}

struct ActiveRequest(Arc<ConnectionActivity>);

impl Drop for ActiveRequest {
    fn drop(&mut self) {
        *self.0.last_seen.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl HttpServer {
    pub fn new(config: ServerConfig, pipeline: RequestPipeline) -> Self {
        let handler = ConnectionHandler {
            pipeline,
            max_header_bytes: config.max_header_bytes,
            write_timeout: config.write_timeout(),
        };
        Self { handler, config }
    }

    /// Protocol builder: HTTP/1.1 with a header read timeout, plus h2c
    /// detected from the HTTP/2 connection preface.
    fn connection_builder(&self) -> auto::Builder<TokioExecutor> {
        let read_timeout = self.config.read_timeout();
        let mut builder = auto::Builder::new(TokioExecutor::new());
        builder
            .http1()
            .timer(TokioTimer::new())
            .header_read_timeout(read_timeout);
        builder
            .http2()
            .timer(TokioTimer::new())
            .keep_alive_interval(read_timeout)
            .keep_alive_timeout(read_timeout)
            .max_header_list_size(limits::http2_header_list_size(self.config.max_header_bytes));
        builder
    }

    /// Accept and serve connections until `shutdown` resolves.
    ///
    /// Transient accept failures are logged and retried; any other listener
    /// failure ends the loop with an error.
    pub async fn run<F>(self, listener: Listener, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()>,
    {
        let addr = listener.local_addr()?;
        let idle_timeout = self.config.read_timeout();
        tracing::info!(
            address = %addr,
            read_timeout = ?idle_timeout,
            write_timeout = ?self.config.write_timeout(),
            max_header_bytes = self.config.max_header_bytes,
            "HTTP server starting"
        );

        let builder = self.connection_builder();
        tokio::pin!(shutdown);

        loop {
            let accepted = tokio::select! {
                accepted = listener.accept() => accepted,
                () = &mut shutdown => break,
            };

            let (stream, peer, permit) = match accepted {
                Ok(connection) => connection,
                Err(err) if err.is_transient() => {
                    tracing::warn!(error = %err, "Accept failed");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
                Err(err) => {
                    tracing::error!(error = %err, "Listener failed, stopping");
                    return Err(err.into());
                }
            };

            let builder = builder.clone();
            let handler = self.handler.clone();
            tokio::spawn(async move {
                let _permit = permit;
                let activity = ConnectionActivity::new();
                let service = {
                    let activity = Arc::clone(&activity);
                    hyper::service::service_fn(move |request: Request<Incoming>| {
                        let handler = handler.clone();
                        let active = activity.begin();
                        async move {
                            let _active = active;
                            handler.serve(request, peer).await
                        }
                    })
                };

                let connection = builder.serve_connection(TokioIo::new(stream), service);
                tokio::pin!(connection);

                loop {
                    let deadline = activity
                        .idle_deadline(idle_timeout)
                        .unwrap_or_else(|| Instant::now() + idle_timeout);
                    tokio::select! {
                        result = connection.as_mut() => {
                            if let Err(err) = result {
                                tracing::debug!(peer = %peer, error = %err, "Connection closed with error");
                            }
                            break;
                        }
                        () = tokio::time::sleep_until(deadline) => {
                            let expired = activity
                                .idle_deadline(idle_timeout)
                                .is_some_and(|deadline| deadline <= Instant::now());
                            if expired {
                                tracing::debug!(peer = %peer, timeout = ?idle_timeout, "Idle connection closed");
                                break;
                            }
                        }
                    }
                }
            });
        }

        tracing::info!("HTTP server stopped accepting connections");
        Ok(())
    }
}
