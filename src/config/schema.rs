//! Configuration schema definitions.
//!
//! Field names follow the service's on-disk format (`server.readTimeout`,
//! `server.writeTimeout`, ...), so the server section is camelCase.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Environment name that switches on human-readable, colored diagnostics.
pub const DEVELOPMENT: &str = "development";

/// Default cap on the combined size of request header fields.
pub const DEFAULT_MAX_HEADER_BYTES: usize = 1 << 10;

/// Root configuration for the service.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    /// Deployment environment ("development", "production", ...).
    pub environment: String,

    /// Listener and per-connection settings.
    pub server: ServerConfig,

    /// Logging settings.
    pub logging: LoggingConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            environment: "production".to_string(),
            server: ServerConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl AppConfig {
    /// Whether verbose, colorized diagnostics are enabled.
    pub fn is_development(&self) -> bool {
        self.environment == DEVELOPMENT
    }
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerConfig {
    /// Listen address, either ":8080" or "127.0.0.1:8080".
    pub port: String,

    /// Seconds allowed to receive the request headers.
    pub read_timeout: u64,

    /// Seconds allowed to produce the response.
    pub write_timeout: u64,

    /// Maximum combined size of request header fields, in bytes.
    pub max_header_bytes: usize,

    /// Maximum request body buffered for diagnostics, in bytes.
    pub max_body_bytes: usize,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,

    /// Peers whose forwarding headers are honored for client IP resolution.
    pub trusted_proxies: Vec<IpAddr>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: ":8080".to_string(),
            read_timeout: 10,
            write_timeout: 10,
            max_header_bytes: DEFAULT_MAX_HEADER_BYTES,
            max_body_bytes: 1024 * 1024,
            max_connections: 10_000,
            trusted_proxies: Vec::new(),
        }
    }
}

impl ServerConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout)
    }

    /// Resolve `port` into a socket address. A bare ":port" binds all interfaces.
    pub fn bind_address(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        if let Some(port) = self.port.strip_prefix(':') {
            format!("0.0.0.0:{}", port).parse()
        } else {
            self.port.parse()
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive, used when neither the CLI nor RUST_LOG set one.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}
