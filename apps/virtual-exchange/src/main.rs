//! Virtual Exchange Binary
//!
//! Starts the virtual exchange HTTP server.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin virtual-exchange
//! ```
//!
//! # Environment Variables
//!
//! - `VX_CONFIG`: path to the YAML config file (default: config.yaml)
//! - `VX_HTTP_PORT`: HTTP server port (default: 8700)
//! - `VX_DB_PATH`: snapshot database path (default: virtual-exchange.db)
//! - `VX_HISTORY_DIR`: directory of `<symbol>.json` candle files
//! - `RUST_LOG`: log level (default: info)

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use virtual_exchange::data::{InMemoryCandleSource, InMemoryNewsSource};
use virtual_exchange::models::Candle;
use virtual_exchange::orchestrator::{
    CoinMap, EXIT_BAD_INPUT, EXIT_DATA_GAP, EXIT_ENGINE_FAULT,
};
use virtual_exchange::persistence::SnapshotStore;
use virtual_exchange::server::{AppState, create_router};
use virtual_exchange::{AppConfig, load_config};

use tokio::net::TcpListener;
use tokio::signal;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file for local development.
    let _ = dotenvy::dotenv();

    // Initialize tracing
    // Static directive strings are guaranteed to parse successfully
    #[allow(clippy::unwrap_used)]
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("virtual_exchange=info".parse().unwrap()),
        )
        .init();

    tracing::info!("Starting Virtual Exchange");

    let config_path = std::env::var("VX_CONFIG").ok();
    let config = match load_config(config_path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Failed to load configuration: {e}");
            std::process::exit(EXIT_BAD_INPUT);
        }
    };

    let coins = match CoinMap::from_pairs(
        config
            .coins
            .iter()
            .map(|(coin, symbol)| (coin.clone(), symbol.clone())),
    ) {
        Ok(coins) => coins,
        Err(e) => {
            tracing::error!("Invalid coin map: {e}");
            std::process::exit(EXIT_BAD_INPUT);
        }
    };

    let candles = match load_history(&config) {
        Ok(source) => Arc::new(source),
        Err(e) => {
            tracing::error!("Failed to load candle history: {e}");
            std::process::exit(EXIT_DATA_GAP);
        }
    };

    let store = match SnapshotStore::new_local(&config.persistence.db_path).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            tracing::error!("Failed to open snapshot store: {e}");
            std::process::exit(EXIT_ENGINE_FAULT);
        }
    };

    let http_port = config.server.http_port;
    let state = AppState::new(
        Arc::new(config),
        coins,
        candles,
        Arc::new(InMemoryNewsSource::new()),
        Some(store),
    );

    let router = create_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], http_port));
    tracing::info!(addr = %addr, "HTTP server listening");

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server exited with an error")?;

    tracing::info!("Virtual Exchange stopped");
    Ok(())
}

/// Load candle history from `<history_dir>/<symbol>.json` files, one JSON
/// array of candles per configured symbol. Symbols without a file are
/// skipped; the exchange endpoints report them as unknown.
fn load_history(config: &AppConfig) -> Result<InMemoryCandleSource, std::io::Error> {
    let mut source = InMemoryCandleSource::new();
    let Some(dir) = &config.history_dir else {
        tracing::warn!("No history_dir configured; starting with empty candle history");
        return Ok(source);
    };

    for symbol in config.coins.values() {
        let path = std::path::Path::new(dir).join(format!("{symbol}.json"));
        if !path.exists() {
            tracing::warn!(symbol = %symbol, path = %path.display(), "No history file");
            continue;
        }
        let contents = std::fs::read_to_string(&path)?;
        let mut candles: Vec<Candle> = serde_json::from_str(&contents).map_err(|e| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("{}: {e}", path.display()),
            )
        })?;
        candles.sort_by_key(|c| c.open_time);
        tracing::info!(symbol = %symbol, bars = candles.len(), "History loaded");
        source.add_candles(symbol, candles);
    }

    Ok(source)
}

async fn shutdown_signal() {
    // Graceful shutdown on ctrl-c; errors here mean the signal handler
    // could not be installed, in which case we simply run until killed.
    if let Err(e) = signal::ctrl_c().await {
        tracing::error!("Failed to install shutdown handler: {e}");
    }
    tracing::info!("Shutdown signal received");
}
