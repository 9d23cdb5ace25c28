//! journal-relay agent daemon
//!
//! Runs on each managed host and streams the systemd journal to browsers
//! over WebSocket, either directly or through the relay server.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use jr_agent::journal::OsFlavor;
use jr_agent::server::{self, AgentState};
use jr_agent::{LogCollector, SessionTuning};
use jr_core::config::{self, AgentConfig};
use jr_core::lifecycle::shutdown_signal;
use jr_core::{Lifecycle, Severity};

/// Grace period for background tasks after the listener stops
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "jr-agent")]
#[command(about = "journal-relay agent daemon")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address (overrides config)
    #[arg(short, long)]
    listen: Option<String>,

    /// Run in foreground with verbose output
    #[arg(short, long)]
    foreground: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.foreground { "debug" } else { &args.log_level };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("journal-relay agent starting...");

    // Load configuration
    let config: AgentConfig = if let Some(config_path) = &args.config {
        config::load_config(config_path)
            .with_context(|| format!("Failed to load config from {:?}", config_path))?
    } else {
        let default_path = config::default_config_path("agent");
        if default_path.exists() {
            config::load_config(&default_path).unwrap_or_else(|e| {
                tracing::warn!("Failed to load config from {:?}: {}", default_path, e);
                AgentConfig::default()
            })
        } else {
            tracing::info!("Using default configuration");
            AgentConfig::default()
        }
    };

    let listen_addr = args.listen.unwrap_or_else(|| config.listen_address.clone());
    let lifecycle = Lifecycle::new();

    let flavor = OsFlavor::detect(&config.os_release_path).unwrap_or_else(|e| {
        lifecycle.reporter().warn("global", &e);
        OsFlavor::default()
    });
    tracing::info!("Unit listing flavor: {:?}", flavor);

    // Setup signal handlers
    let root = lifecycle.root().clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        root.cancel();
    });

    let collector = Arc::new(LogCollector::new());
    collector.spawn_heartbeat(&lifecycle, config.heartbeat_period);

    let state = Arc::new(AgentState {
        collector: Arc::clone(&collector),
        tuning: SessionTuning::from_config(&config, flavor),
        tls: config.tls.clone(),
        lifecycle: lifecycle.clone(),
    });

    let listener = match TcpListener::bind(&listen_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            let err = format!("failed to bind {}: {}", listen_addr, e);
            lifecycle
                .reporter()
                .report("global", Severity::Error, &err, true, false);
            anyhow::bail!(err);
        }
    };

    tracing::info!(
        "Serving {} on {} ({})",
        server::ENTRY_PATH,
        listen_addr,
        config.tls.scheme()
    );
    server::serve(listener, state, lifecycle.root().clone())
        .await
        .context("agent server failed")?;

    tracing::info!("Closing all sessions...");
    collector.close_all().await;
    lifecycle.shutdown(SHUTDOWN_GRACE).await;

    tracing::info!("Agent shutdown complete");
    Ok(())
}
