//! journal-relay server daemon
//!
//! Accepts browser connections and relays them to the agent named in each
//! connection's first message.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use jr_core::config::{self, ServerConfig};
use jr_core::lifecycle::shutdown_signal;
use jr_core::{Lifecycle, Severity};
use jr_server::server::{self, ServerState};
use jr_server::{RelayRegistry, WsConnector};

/// Grace period for background tasks after the listener stops
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "jr-server")]
#[command(about = "journal-relay server daemon")]
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

    tracing::info!("journal-relay server starting...");

    // Load configuration
    let config: ServerConfig = if let Some(config_path) = &args.config {
        config::load_config(config_path)
            .with_context(|| format!("Failed to load config from {:?}", config_path))?
    } else {
        let default_path = config::default_config_path("server");
        if default_path.exists() {
            config::load_config(&default_path).unwrap_or_else(|e| {
                tracing::warn!("Failed to load config from {:?}: {}", default_path, e);
                ServerConfig::default()
            })
        } else {
            tracing::info!("Using default configuration");
            ServerConfig::default()
        }
    };

    let listen_addr = args.listen.unwrap_or_else(|| config.listen_address.clone());
    let lifecycle = Lifecycle::new();

    let connector = WsConnector::new(&config).context("Failed to build target connector")?;

    // Setup signal handlers
    let root = lifecycle.root().clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        root.cancel();
    });

    let relays = Arc::new(RelayRegistry::new("relay"));
    lifecycle.spawn(Arc::clone(&relays).run_heartbeat(config.heartbeat_period));

    let state = Arc::new(ServerState {
        relays: Arc::clone(&relays),
        connector: Arc::new(connector),
        settle_delay: config.settle_delay,
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
        "Relaying {} on {} ({}) to agents at <addr>{}",
        server::PROXY_PATH,
        listen_addr,
        config.tls.scheme(),
        config.entry_path
    );
    server::serve(listener, state, lifecycle.root().clone())
        .await
        .context("relay server failed")?;

    tracing::info!("Closing all relays...");
    relays.close_all().await;
    lifecycle.shutdown(SHUTDOWN_GRACE).await;

    tracing::info!("Server shutdown complete");
    Ok(())
}
