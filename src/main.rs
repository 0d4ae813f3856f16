// src/main.rs

//! The main entry point for the gatewire client.

use anyhow::Result;
use gatewire::config::Config;
use gatewire::connection::ConnectionHandler;
use gatewire::core::EventSink;
use std::env;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::filter::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    const VERSION: &str = env!("CARGO_PKG_VERSION");

    // Collect command-line arguments to decide the execution mode.
    let args: Vec<String> = env::args().collect();

    // Handle the --version flag.
    if args.contains(&"--version".to_string()) {
        println!("gatewire version {VERSION}");
        return Ok(());
    }

    // Determine the configuration path.
    // It can be provided via a --config flag; otherwise, it defaults to "config.toml".
    let config_path = args
        .iter()
        .position(|arg| arg == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str())
        .unwrap_or("config.toml");

    // Load the client configuration from the determined path. Without a
    // valid configuration (and a token) there is nothing to connect with.
    let config = match Config::from_file(config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration from \"{config_path}\": {e:#}");
            std::process::exit(1);
        }
    };

    // Initialize logging: RUST_LOG wins, the config file provides the default.
    let log_level = env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(log_level))
        .compact()
        .with_ansi(true)
        .init();

    let config = Arc::new(config);

    // The event sink: the client publishes distilled application events
    // here; this consumer is the presentation layer.
    let (events, mut event_rx) = EventSink::new();
    let consumer = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            info!("Application event: {event:?}");
        }
    });

    // Ctrl-C cancels the session; teardown still runs to completion.
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Ctrl-C received, shutting down");
            let _ = shutdown_tx.send(());
        }
    });

    let handler = ConnectionHandler::new(config, events, shutdown_rx);
    if let Err(e) = handler.connect().await {
        error!("Connection error: {e}");
        return Err(e.into());
    }

    consumer.abort();
    Ok(())
}
