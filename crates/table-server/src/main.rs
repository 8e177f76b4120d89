//! Table Server
//!
//! Matches anonymous WebSocket participants into fixed-size sessions.
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize tracing
//! 3. Initialize Prometheus metrics recorder
//! 4. Build and start the orchestrator (hub, waiting room, registry,
//!    matchmaker, transport)
//! 5. Wait for `q`/`quit` on stdin, Ctrl+C or SIGTERM
//! 6. End every component in reverse order

#![warn(clippy::pedantic)]

use metrics_exporter_prometheus::PrometheusHandle;
use table_server::config::Config;
use table_server::errors::ServerError;
use table_server::observability::init_metrics_recorder;
use table_server::orchestrator::Orchestrator;
use table_server::session::GreetingRules;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Configuration drives the log filter, so it loads first.
    let config = Config::from_env().map_err(ServerError::from)?;

    init_tracing(&config);

    info!(
        bind_address = %config.bind_address,
        players_per_session = config.players_per_session,
        max_connections = config.max_connections,
        matchmaker_poll_ms = config.matchmaker_poll_interval.as_millis(),
        session_check_interval_ms = config.session_check_interval.as_millis(),
        shutdown_timeout_seconds = config.shutdown_timeout.as_secs(),
        "Configuration loaded successfully"
    );

    let prometheus_handle: PrometheusHandle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        ServerError::Internal(e)
    })?;

    let rules = GreetingRules::factory(config.session_turns);
    let orchestrator = Orchestrator::build(config, rules, Some(prometheus_handle));

    orchestrator.start().await.map_err(|e| {
        error!(error = %e, fatal = e.is_fatal(), "Failed to start table server");
        e
    })?;

    info!("Table server running - type 'q' or 'quit', or press Ctrl+C to shut down");
    orchestrator.wait().await;

    info!("Shutdown requested, stopping components...");
    orchestrator.end().await;

    info!("Table server shutdown complete");
    Ok(())
}

fn init_tracing(config: &Config) {
    // "table" covers both the crate's module paths and its `table.*` targets.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.observability.filter_directive("table").into());

    let registry = tracing_subscriber::registry().with(filter);
    if config.observability.json_logs {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
