//! Run configuration.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use super::error::RunError;
use crate::exchange::MarketFillPrice;

/// Default decision interval: four hours.
pub const DEFAULT_DECISION_INTERVAL_SECS: i64 = 4 * 60 * 60;

/// Everything that parameterises a backtest run. Together with the data
/// hash this tuple identifies a run's expected output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Symbol to trade.
    pub symbol: String,
    /// Range start (Unix seconds, inclusive).
    pub start_time: i64,
    /// Range end (Unix seconds, exclusive).
    pub end_time: i64,
    /// Gap between strategy invocations, in seconds.
    pub decision_interval: i64,
    /// Flat fee rate on fill notional.
    #[serde(with = "rust_decimal::serde::str")]
    pub fee_rate: Decimal,
    /// Market order fill price model.
    pub market_fill: MarketFillPrice,
    /// Starting cash.
    #[serde(with = "rust_decimal::serde::str")]
    pub starting_cash: Decimal,
    /// Opaque engine version string, echoed into the report.
    pub engine_version: String,
    /// Verbatim strategy configuration, echoed into the report.
    #[serde(default)]
    pub strategy_config: serde_json::Value,
}

impl RunConfig {
    /// A config with the standard defaults for `[start, end)`.
    #[must_use]
    pub fn new(symbol: &str, start_time: i64, end_time: i64) -> Self {
        Self {
            symbol: symbol.to_string(),
            start_time,
            end_time,
            decision_interval: DEFAULT_DECISION_INTERVAL_SECS,
            fee_rate: Decimal::ZERO,
            market_fill: MarketFillPrice::Open,
            starting_cash: dec!(10000),
            engine_version: env!("CARGO_PKG_VERSION").to_string(),
            strategy_config: serde_json::Value::Null,
        }
    }

    /// Validate basic shape before touching any data.
    ///
    /// # Errors
    ///
    /// `RunError::InvalidRun` describing the first problem found.
    pub fn validate(&self) -> Result<(), RunError> {
        if self.symbol.is_empty() {
            return Err(RunError::InvalidRun("symbol must not be empty".to_string()));
        }
        if self.start_time >= self.end_time {
            return Err(RunError::InvalidRun(format!(
                "start_time {} must precede end_time {}",
                self.start_time, self.end_time
            )));
        }
        if self.decision_interval <= 0 {
            return Err(RunError::InvalidRun(
                "decision_interval must be positive".to_string(),
            ));
        }
        if self.fee_rate < Decimal::ZERO {
            return Err(RunError::InvalidRun(
                "fee_rate must not be negative".to_string(),
            ));
        }
        if self.starting_cash <= Decimal::ZERO {
            return Err(RunError::InvalidRun(
                "starting_cash must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
