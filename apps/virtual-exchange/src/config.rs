//! Application configuration.
//!
//! Loaded from a YAML file (path in `VX_CONFIG`, default `config.yaml`)
//! with environment-variable overrides for the operational knobs. Every
//! section has working defaults so the binary starts without a file.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::exchange::MarketFillPrice;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("Failed to read config file '{path}': {source}")]
    ReadError {
        /// Path to the config file.
        path: String,
        /// The underlying IO error.
        source: std::io::Error,
    },

    /// Failed to parse YAML configuration.
    #[error("Failed to parse config YAML: {0}")]
    ParseError(#[from] serde_yaml_bw::Error),

    /// Configuration validation failed.
    #[error("Config validation failed: {0}")]
    ValidationError(String),
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Port the HTTP API binds to.
    pub http_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { http_port: 8700 }
    }
}

/// Snapshot store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Path of the Turso database file.
    pub db_path: String,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            db_path: "virtual-exchange.db".to_string(),
        }
    }
}

/// Default engine parameters for runs that do not override them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeDefaults {
    /// Flat fee rate on fill notional.
    #[serde(with = "rust_decimal::serde::str")]
    pub fee_rate: Decimal,
    /// Starting cash for new sessions and runs.
    #[serde(with = "rust_decimal::serde::str")]
    pub starting_cash: Decimal,
    /// Market order fill price model.
    #[serde(default)]
    pub market_fill: MarketFillPrice,
}

impl Default for ExchangeDefaults {
    fn default() -> Self {
        Self {
            fee_rate: dec!(0.001),
            starting_cash: dec!(10000),
            market_fill: MarketFillPrice::Open,
        }
    }
}

/// Strategy collaborator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategySettings {
    /// Bounded timeout for one strategy call, in seconds.
    pub timeout_secs: u64,
}

impl Default for StrategySettings {
    fn default() -> Self {
        Self { timeout_secs: 60 }
    }
}

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,
    /// Snapshot store settings.
    #[serde(default)]
    pub persistence: PersistenceConfig,
    /// Engine defaults.
    #[serde(default)]
    pub exchange: ExchangeDefaults,
    /// Strategy collaborator settings.
    #[serde(default)]
    pub strategy: StrategySettings,
    /// Base asset ("coin") to symbol mapping. Must be injective.
    #[serde(default)]
    pub coins: BTreeMap<String, String>,
    /// Directory holding `<symbol>.json` candle history files.
    #[serde(default)]
    pub history_dir: Option<String>,
}

impl AppConfig {
    /// Validate cross-field constraints.
    ///
    /// # Errors
    ///
    /// `ConfigError::ValidationError` when two coins map to one symbol.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen: BTreeMap<&str, &str> = BTreeMap::new();
        for (coin, symbol) in &self.coins {
            if let Some(previous) = seen.insert(symbol.as_str(), coin.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "symbol {symbol} mapped from both {previous} and {coin}"
                )));
            }
        }
        Ok(())
    }

    /// Apply environment overrides (`VX_HTTP_PORT`, `VX_DB_PATH`,
    /// `VX_HISTORY_DIR`).
    pub fn apply_env_overrides(&mut self) {
        if let Ok(port) = std::env::var("VX_HTTP_PORT")
            && let Ok(port) = port.parse()
        {
            self.server.http_port = port;
        }
        if let Ok(path) = std::env::var("VX_DB_PATH") {
            self.persistence.db_path = path;
        }
        if let Ok(dir) = std::env::var("VX_HISTORY_DIR") {
            self.history_dir = Some(dir);
        }
    }
}

/// Load configuration from a YAML file, falling back to defaults when no
/// path is given and the default file does not exist.
///
/// # Errors
///
/// Read, parse, or validation failures. An explicitly named file must
/// exist.
pub fn load_config(path: Option<&str>) -> Result<AppConfig, ConfigError> {
    let (path, required) = match path {
        Some(p) => (p, true),
        None => ("config.yaml", false),
    };

    let mut config = match std::fs::read_to_string(path) {
        Ok(contents) => serde_yaml_bw::from_str(&contents)?,
        Err(e) if !required && e.kind() == std::io::ErrorKind::NotFound => AppConfig::default(),
        Err(source) => {
            return Err(ConfigError::ReadError {
                path: path.to_string(),
                source,
            });
        }
    };

    config.apply_env_overrides();
    config.validate()?;
    Ok(config)
}
