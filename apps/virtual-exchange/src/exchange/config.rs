//! Engine configuration types.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Which bar price a market order fills at.
///
/// The simulator's reference behaviour is the bar open; filling at the close
/// is kept as an explicit configuration choice rather than an implicit code
/// path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MarketFillPrice {
    /// Fill market orders at the candle open.
    #[default]
    Open,
    /// Fill market orders at the candle close.
    Close,
}

/// Matching engine configuration.
///
/// `fee_rate` and the market-fill choice are part of a run's reproducibility
/// metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Flat fee applied to fill notional (e.g. 0.001 = 10 bps).
    #[serde(with = "rust_decimal::serde::str")]
    pub fee_rate: Decimal,
    /// Market order fill price model.
    #[serde(default)]
    pub market_fill: MarketFillPrice,
    /// Starting cash balance (quote currency).
    #[serde(with = "rust_decimal::serde::str")]
    pub starting_cash: Decimal,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fee_rate: Decimal::ZERO,
            market_fill: MarketFillPrice::Open,
            starting_cash: dec!(10000),
        }
    }
}

impl EngineConfig {
    /// Human-readable slippage model label for the reproducibility block.
    #[must_use]
    pub fn slippage_label(&self) -> String {
        let market = match self.market_fill {
            MarketFillPrice::Open => "open",
            MarketFillPrice::Close => "close",
        };
        format!("market:{market};limit:0")
    }
}
