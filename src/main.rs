use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use ping_service::config::{load_config, AppConfig};
use ping_service::http::{HttpServer, PipelineOptions, RequestPipeline};
use ping_service::lifecycle::signals::shutdown_signal;
use ping_service::net::Listener;
use ping_service::observability::{logging, LogSink, TracingSink};
use ping_service::routing;

/// Health-check HTTP service
#[derive(Parser, Debug)]
#[command(name = "ping-service", version, about)]
struct Args {
    /// Path to a TOML configuration file; built-in defaults are used when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level filter (e.g., "ping_service=debug")
    #[arg(short, long)]
    log_level: Option<String>,
}

/// Log at the highest severity and terminate. Only used before any request
/// has been accepted, or when the accept loop itself fails.
fn fatal(message: &str, err: &dyn std::error::Error) -> ! {
    tracing::error!(severity = "fatal", error = %err, "{}", message);
    std::process::exit(1);
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => match load_config(path) {
            Ok(config) => config,
            Err(err) => {
                eprintln!("failed to load config {}: {err}", path.display());
                std::process::exit(1);
            }
        },
        None => AppConfig::default(),
    };

    if let Err(err) = logging::init(&config, args.log_level) {
        eprintln!("failed to initialize logging: {err}");
        std::process::exit(1);
    }

    tracing::info!(
        environment = %config.environment,
        port = %config.server.port,
        "Configuration loaded"
    );

    let sink: Arc<dyn LogSink> = Arc::new(TracingSink);
    let pipeline = RequestPipeline::new(
        routing::routes(),
        sink,
        PipelineOptions::from_config(&config.server),
    );

    let listener = match Listener::bind(&config.server).await {
        Ok(listener) => listener,
        Err(err) => fatal("failed to start server", &err),
    };

    tracing::info!("Starting server on port {}", config.server.port);
    let server = HttpServer::new(config.server.clone(), pipeline);
    if let Err(err) = server.run(listener, shutdown_signal()).await {
        fatal("failed to serve", &err);
    }

    tracing::info!("Shutdown complete");
}
