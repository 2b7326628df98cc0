//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use axum::Router;
use ping_service::config::ServerConfig;
use ping_service::http::{HttpServer, PipelineOptions, RequestPipeline};
use ping_service::lifecycle::Shutdown;
use ping_service::net::Listener;
use ping_service::observability::RecordingSink;
use ping_service::routing::{self, PING_PATH};

/// The production routes plus handlers that fail on purpose.
pub fn test_routes() -> Router {
    routing::with_fallbacks(
        Router::new()
            .route(PING_PATH, get(ping_service::health::ping::ping).head(routing::method_not_allowed))
            .route("/panic", get(panicking).post(panicking))
            .route("/broken-pipe", get(broken_pipe))
            .route("/slow", get(slow)),
    )
}

async fn panicking(body: String) -> &'static str {
    let _ = body;
    panic!("handler exploded");
}

async fn broken_pipe() -> &'static str {
    std::panic::panic_any(io::Error::new(
        io::ErrorKind::BrokenPipe,
        "write tcp 127.0.0.1:8080->127.0.0.1:51234: write: broken pipe",
    ));
}

async fn slow() -> &'static str {
    tokio::time::sleep(Duration::from_secs(5)).await;
    "late"
}

pub fn pipeline(sink: Arc<RecordingSink>) -> RequestPipeline {
    pipeline_with(sink, PipelineOptions::default())
}

pub fn pipeline_with(sink: Arc<RecordingSink>, options: PipelineOptions) -> RequestPipeline {
    RequestPipeline::new(test_routes(), sink, options)
}

/// A running server bound to an ephemeral port.
pub struct TestServer {
    pub addr: SocketAddr,
    pub sink: Arc<RecordingSink>,
    shutdown: Shutdown,
}

impl TestServer {
    pub async fn start() -> Self {
        Self::start_with(ServerConfig::default()).await
    }

    pub async fn start_with(mut config: ServerConfig) -> Self {
        config.port = "127.0.0.1:0".to_string();
        let sink = Arc::new(RecordingSink::new());
        let listener = Listener::bind(&config).await.unwrap();
        let addr = listener.local_addr().unwrap();

        let options = PipelineOptions::from_config(&config);
        let server = HttpServer::new(config, pipeline_with(sink.clone(), options));
        let shutdown = Shutdown::new();
        let signalled = shutdown.signalled();
        tokio::spawn(async move {
            let _ = server.run(listener, signalled).await;
        });

        Self { addr, sink, shutdown }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

/// A fresh HTTP/1.1 client that never reuses connections across tests.
pub fn http1_client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .http1_only()
        .build()
        .unwrap()
}

/// A client that speaks cleartext HTTP/2 without an upgrade round trip.
pub fn h2c_client() -> reqwest::Client {
    reqwest::Client::builder()
        .no_proxy()
        .http2_prior_knowledge()
        .build()
        .unwrap()
}
