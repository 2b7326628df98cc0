//! Request pipeline composition.
//!
//! ```text
//! AccessLog → Recovery → collapse `//` → NormalizePath → Router
//! ```
//!
//! The order is fixed: the access logger sits outside recovery so that every
//! request, including one whose handler panicked, yields one access record.

use std::sync::Arc;

use axum::body::Body;
use axum::http::Request;
use axum::response::Response;
use axum::Router;
use tower::util::BoxCloneSyncService;
use tower::{ServiceBuilder, ServiceExt};
use tower_http::normalize_path::NormalizePath;

use crate::config::ServerConfig;
use crate::http::access_log::AccessLogLayer;
use crate::http::recovery::RecoveryLayer;
use crate::http::request::{collapse_repeated_slashes, ClientIpResolver};
use crate::http::PipelineError;
use crate::observability::LogSink;

/// Tunables the pipeline stages need.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub resolver: ClientIpResolver,
    pub max_body_bytes: usize,
}

impl PipelineOptions {
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            resolver: ClientIpResolver::new(config.trusted_proxies.clone()),
            max_body_bytes: config.max_body_bytes,
        }
    }
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self::from_config(&ServerConfig::default())
    }
}

/// The composed request-handling service, built once at startup.
#[derive(Clone)]
pub struct RequestPipeline {
    service: BoxCloneSyncService<Request<Body>, Response, PipelineError>,
}

impl RequestPipeline {
    pub fn new(routes: Router, sink: Arc<dyn LogSink>, options: PipelineOptions) -> Self {
        let app = NormalizePath::trim_trailing_slash(routes);

        let service = ServiceBuilder::new()
            .layer(AccessLogLayer::new(Arc::clone(&sink), options.resolver))
            .layer(RecoveryLayer::new(sink, options.max_body_bytes))
            .map_request(collapse_repeated_slashes::<Body>)
            .service(app);

        Self {
            service: BoxCloneSyncService::new(service),
        }
    }

    /// Run one request through every stage.
    pub async fn handle(&self, request: Request<Body>) -> Result<Response, PipelineError> {
        self.service.clone().oneshot(request).await
    }
}
