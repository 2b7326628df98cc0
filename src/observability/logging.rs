//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the tracing subscriber once at startup
//! - Pick the output format from the environment
//!
//! # Design Decisions
//! - JSON format for production, pretty colored format for development
//! - Filter priority: CLI > RUST_LOG > config

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::AppConfig;

/// Error raised when the subscriber cannot be installed.
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("invalid log filter {filter:?}: {source}")]
    Filter {
        filter: String,
        #[source]
        source: tracing_subscriber::filter::ParseError,
    },

    #[error("failed to install subscriber: {0}")]
    Install(#[from] tracing_subscriber::util::TryInitError),
}

/// Resolve the filter directive: CLI override, then RUST_LOG, then config.
pub fn resolve_filter(config: &AppConfig, cli_override: Option<String>) -> String {
    cli_override
        .or_else(|| std::env::var("RUST_LOG").ok())
        .unwrap_or_else(|| {
            if config.is_development() {
                "debug".to_string()
            } else {
                config.logging.level.clone()
            }
        })
}

/// Install the global subscriber for this process.
pub fn init(config: &AppConfig, cli_override: Option<String>) -> Result<(), LoggingError> {
    let filter = resolve_filter(config, cli_override);
    let env_filter = EnvFilter::try_new(&filter).map_err(|source| LoggingError::Filter {
        filter: filter.clone(),
        source,
    })?;

    let registry = tracing_subscriber::registry().with(env_filter);

    if config.is_development() {
        registry
            .with(tracing_subscriber::fmt::layer().with_ansi(true))
            .try_init()?;
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().json().flatten_event(true))
            .try_init()?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_override_wins() {
        let config = AppConfig::default();
        assert_eq!(resolve_filter(&config, Some("warn".into())), "warn");
    }

    #[test]
    fn development_defaults_to_debug() {
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        let config = AppConfig {
            environment: "development".into(),
            ..Default::default()
        };
        assert_eq!(resolve_filter(&config, None), "debug");
    }
}
