//! Position and account snapshot types.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::order::Order;

/// Netted position in one symbol. Positive size is long, negative is short.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    /// Symbol.
    pub symbol: String,
    /// Signed size.
    #[serde(with = "rust_decimal::serde::str")]
    pub size: Decimal,
    /// Volume-weighted average entry price.
    #[serde(with = "rust_decimal::serde::str")]
    pub avg_entry_price: Decimal,
    /// Realised PnL accumulator.
    #[serde(with = "rust_decimal::serde::str")]
    pub realized_pnl: Decimal,
}

impl Position {
    /// Create a flat position.
    #[must_use]
    pub fn flat(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            size: Decimal::ZERO,
            avg_entry_price: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
        }
    }

    /// Whether the position is flat.
    #[must_use]
    pub fn is_flat(&self) -> bool {
        self.size == Decimal::ZERO
    }

    /// Unrealised PnL against a mark price.
    #[must_use]
    pub fn unrealized_pnl(&self, mark: Decimal) -> Decimal {
        (mark - self.avg_entry_price) * self.size
    }

    /// Position value at a mark price.
    #[must_use]
    pub fn value(&self, mark: Decimal) -> Decimal {
        self.size * mark
    }
}

/// Wallet snapshot returned by the account-info read API.
///
/// Monetary and size amounts are decimal-as-string on the wire to avoid
/// float drift across language boundaries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountInfo {
    /// Equity: cash plus reservations plus positions at mark.
    #[serde(with = "rust_decimal::serde::str")]
    pub equity: Decimal,
    /// Free cash balance.
    #[serde(with = "rust_decimal::serde::str")]
    pub cash: Decimal,
    /// Sum of cash reserved by open orders.
    #[serde(with = "rust_decimal::serde::str")]
    pub total_margin_used: Decimal,
    /// All positions, including flat ones that traded this run.
    pub positions: Vec<Position>,
    /// Orders that can still fill.
    pub open_orders: Vec<Order>,
}
