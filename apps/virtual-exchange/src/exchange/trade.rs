//! Trade records emitted by the matching engine.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::OrderSide;

/// Where within the bar the fill price came from, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BarKind {
    /// Filled at the bar open (market orders under the open model).
    BarOpen,
    /// Filled within the bar range (limits, triggers).
    Intrabar,
    /// Filled at the bar close (market orders under the close model).
    BarClose,
}

/// A single fill, appended to the wallet's trade log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trade {
    /// Order that produced this fill.
    pub order_id: u64,
    /// Symbol.
    pub symbol: String,
    /// Fill side.
    pub side: OrderSide,
    /// Filled size.
    pub size: Decimal,
    /// Fill price.
    pub price: Decimal,
    /// Fee charged on notional.
    pub fee: Decimal,
    /// Bar close time (Unix seconds).
    pub timestamp: i64,
    /// Fill price provenance.
    pub bar_kind: BarKind,
}

impl Trade {
    /// Traded notional (price times size).
    #[must_use]
    pub fn notional(&self) -> Decimal {
        self.price * self.size
    }
}
