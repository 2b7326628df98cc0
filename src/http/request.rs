//! Per-request context.
//!
//! # Responsibilities
//! - Extract the identifying fields of an in-flight request
//! - Resolve the client IP, honoring forwarding headers only from trusted peers
//! - Carry the private error list shared by the pipeline stages
//! - Serialize the raw request for diagnostics, capturing the body as it is read
//! - Collapse repeated slashes before route matching
//!
//! # Design Decisions
//! - Never trust X-Forwarded-For / X-Real-IP from untrusted sources
//! - Private errors live in a request extension so inner stages can append
//!   while the access logger still reads them after the call returns

use std::fmt::Write as _;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex, PoisonError};

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::uri::PathAndQuery;
use axum::http::{header, request::Parts, HeaderMap, Request, Uri};
use futures_util::StreamExt;

const X_FORWARDED_FOR: &str = "x-forwarded-for";
const X_REAL_IP: &str = "x-real-ip";

/// Internal-only errors attached to a request while it is handled.
///
/// Cloning shares the same list; each request gets a fresh one.
#[derive(Debug, Clone, Default)]
pub struct PrivateErrors(Arc<Mutex<Vec<String>>>);

impl PrivateErrors {
    pub fn push(&self, error: impl Into<String>) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(error.into());
    }

    /// All errors joined with `;`, empty when none were attached.
    pub fn joined(&self) -> String {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .join(";")
    }
}

/// Resolves the client IP of a request.
#[derive(Debug, Clone, Default)]
pub struct ClientIpResolver {
    trusted_proxies: Vec<IpAddr>,
}

impl ClientIpResolver {
    pub fn new(trusted_proxies: Vec<IpAddr>) -> Self {
        Self { trusted_proxies }
    }

    fn is_trusted(&self, ip: &IpAddr) -> bool {
        self.trusted_proxies.contains(ip)
    }

    /// The peer address, unless the peer is a trusted proxy, in which case the
    /// right-most untrusted X-Forwarded-For hop (or X-Real-IP) wins.
    pub fn resolve(&self, peer: Option<IpAddr>, headers: &HeaderMap) -> Option<IpAddr> {
        let peer = peer?;
        if !self.is_trusted(&peer) {
            return Some(peer);
        }

        if let Some(forwarded) = headers.get(X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
            let hops: Vec<IpAddr> = forwarded
                .split(',')
                .filter_map(|hop| hop.trim().parse().ok())
                .collect();
            if let Some(client) = hops.iter().rev().find(|ip| !self.is_trusted(ip)) {
                return Some(*client);
            }
            if let Some(first) = hops.first() {
                return Some(*first);
            }
        }

        headers
            .get(X_REAL_IP)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok())
            .or(Some(peer))
    }
}

/// Identifying fields of one in-flight request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub method: String,
    pub path: String,
    pub query: String,
    pub client_ip: String,
    pub user_agent: String,
    pub errors: PrivateErrors,
}

impl RequestContext {
    pub fn from_request<B>(request: &Request<B>, resolver: &ClientIpResolver) -> Self {
        let peer = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());

        Self {
            method: request.method().to_string(),
            path: request.uri().path().to_string(),
            query: request.uri().query().unwrap_or_default().to_string(),
            client_ip: resolver
                .resolve(peer, request.headers())
                .map(|ip| ip.to_string())
                .unwrap_or_default(),
            user_agent: request
                .headers()
                .get(header::USER_AGENT)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string(),
            errors: PrivateErrors::default(),
        }
    }
}

/// Render the request line and headers the way they would appear on the wire
/// (HTTP/1.1 framing), including the blank line that ends the head.
pub fn dump_head(parts: &Parts) -> String {
    let target = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");

    let mut out = String::new();
    let _ = write!(out, "{} {} {:?}\r\n", parts.method, target, parts.version);
    if !parts.headers.contains_key(header::HOST) {
        if let Some(authority) = parts.uri.authority() {
            let _ = write!(out, "Host: {}\r\n", authority);
        }
    }
    for (name, value) in &parts.headers {
        let _ = write!(out, "{}: {}\r\n", name, String::from_utf8_lossy(value.as_bytes()));
    }
    out.push_str("\r\n");
    out
}

#[derive(Debug, Default)]
struct Captured {
    bytes: Vec<u8>,
    truncated: bool,
}

/// Copy of the request body as the handler reads it, bounded by `limit`.
///
/// Nothing is read on the handler's behalf: a body the handler never touches
/// stays empty here, and an oversized one is kept up to `limit` and flagged.
#[derive(Debug, Clone)]
pub struct BodyCapture {
    captured: Arc<Mutex<Captured>>,
    limit: usize,
}

impl BodyCapture {
    pub fn new(limit: usize) -> Self {
        Self {
            captured: Arc::default(),
            limit,
        }
    }

    /// Wrap `body` so every data frame the handler pulls is recorded.
    pub fn wrap(&self, body: Body) -> Body {
        let capture = self.clone();
        let stream = body.into_data_stream().map(move |chunk| {
            if let Ok(bytes) = &chunk {
                capture.record(bytes);
            }
            chunk
        });
        Body::from_stream(stream)
    }

    fn record(&self, chunk: &[u8]) {
        let mut captured = self.captured.lock().unwrap_or_else(PoisonError::into_inner);
        let room = self.limit.saturating_sub(captured.bytes.len());
        if chunk.len() > room {
            captured.truncated = true;
        }
        let keep = chunk.len().min(room);
        captured.bytes.extend_from_slice(&chunk[..keep]);
    }

    /// The captured body as lossy UTF-8, with a marker when it was cut short.
    pub fn render(&self) -> String {
        let captured = self.captured.lock().unwrap_or_else(PoisonError::into_inner);
        let mut out = String::from_utf8_lossy(&captured.bytes).into_owned();
        if captured.truncated {
            let _ = write!(out, "\r\n[body truncated at {} bytes]", self.limit);
        }
        out
    }
}

/// Collapse runs of `/` in the request path (`/service//ping` → `/service/ping`).
/// The query string is left untouched.
pub fn collapse_repeated_slashes<B>(mut request: Request<B>) -> Request<B> {
    let path = request.uri().path();
    if !path.contains("//") {
        return request;
    }

    let mut collapsed = String::with_capacity(path.len());
    for ch in path.chars() {
        if ch == '/' && collapsed.ends_with('/') {
            continue;
        }
        collapsed.push(ch);
    }
    if let Some(query) = request.uri().query() {
        collapsed.push('?');
        collapsed.push_str(query);
    }

    let mut parts = request.uri().clone().into_parts();
    let Ok(path_and_query) = collapsed.parse::<PathAndQuery>() else {
        return request;
    };
    parts.path_and_query = Some(path_and_query);
    if let Ok(uri) = Uri::from_parts(parts) {
        *request.uri_mut() = uri;
    }
    request
}
