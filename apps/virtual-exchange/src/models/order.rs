//! Order taxonomy and lifecycle types.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Order side (buy or sell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderSide {
    /// Buy order.
    Buy,
    /// Sell order.
    Sell,
}

impl OrderSide {
    /// The opposite side.
    #[must_use]
    pub const fn opposite(&self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }
}

/// Order kind. A closed set: unknown wire values reject at the API boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderKind {
    /// Execute at the next bar's fill price.
    Market,
    /// Execute at the limit price or better.
    Limit,
    /// Protective profit-taking order; fills at its trigger price.
    TakeProfit,
    /// Protective stop order; fills at the worse of trigger and bar close.
    StopLoss,
}

impl OrderKind {
    /// Whether this kind requires a price at placement.
    #[must_use]
    pub const fn requires_price(&self) -> bool {
        !matches!(self, Self::Market)
    }

    /// Whether this kind is a protective (trigger-driven) order.
    #[must_use]
    pub const fn is_protective(&self) -> bool {
        matches!(self, Self::TakeProfit | Self::StopLoss)
    }
}

/// Order status in the lifecycle. Terminal states never regress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Order created but not yet accepted.
    New,
    /// Order accepted and resting.
    Open,
    /// Order partially filled.
    PartiallyFilled,
    /// Order completely filled.
    Filled,
    /// Order cancelled.
    Cancelled,
    /// Order rejected at placement.
    Rejected,
}

impl OrderStatus {
    /// Returns true if the order is in a terminal state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Filled | Self::Cancelled | Self::Rejected)
    }

    /// Returns true if the order can still fill or be cancelled.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self, Self::New | Self::Open | Self::PartiallyFilled)
    }
}

/// Why an order was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CancelReason {
    /// Explicit cancel request.
    User,
    /// The OCO sibling filled (or was cancelled) first.
    Oco,
    /// Replaced through modify.
    Replaced,
    /// Reduce-only order left with no position to reduce.
    NoPosition,
}

/// Take-profit / stop-loss pair attached to a parent order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TpSl {
    /// Take-profit trigger price.
    #[serde(with = "rust_decimal::serde::str")]
    pub take_profit: Decimal,
    /// Stop-loss trigger price.
    #[serde(with = "rust_decimal::serde::str")]
    pub stop_loss: Decimal,
}

/// Validated input to `place`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    /// Symbol, e.g. "BTCUSDT".
    pub symbol: String,
    /// Order side.
    pub side: OrderSide,
    /// Order kind.
    pub kind: OrderKind,
    /// Order size (base asset units). Must be positive.
    pub size: Decimal,
    /// Limit or trigger price. Required for every kind except Market.
    pub price: Option<Decimal>,
    /// Only reduce an existing position, never open or extend one.
    #[serde(default)]
    pub reduce_only: bool,
    /// Limit only: reject at placement if the price would cross immediately.
    #[serde(default)]
    pub post_only: bool,
    /// Links OCO siblings to their parent order.
    #[serde(default)]
    pub parent_id: Option<u64>,
}

/// An accepted order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Monotonically increasing id, assigned at acceptance.
    pub id: u64,
    /// Symbol.
    pub symbol: String,
    /// Order side.
    pub side: OrderSide,
    /// Order kind.
    pub kind: OrderKind,
    /// Requested size.
    pub size: Decimal,
    /// Limit or trigger price.
    pub price: Option<Decimal>,
    /// Reduce-only flag.
    pub reduce_only: bool,
    /// Post-only flag.
    pub post_only: bool,
    /// OCO parent link.
    pub parent_id: Option<u64>,
    /// Current status.
    pub status: OrderStatus,
    /// Virtual-clock acceptance time (Unix seconds).
    pub created_at: i64,
    /// Virtual-clock time of the last state change (Unix seconds).
    pub last_update_at: i64,
    /// Cumulative filled size.
    pub filled_size: Decimal,
    /// Volume-weighted average fill price.
    pub avg_fill_price: Decimal,
    /// Cash debited from the wallet at placement.
    pub reserved_cash: Decimal,
    /// Position quantity committed by a reduce-only order.
    pub reserved_position: Decimal,
    /// Cancel reason, set when status is Cancelled.
    pub cancel_reason: Option<CancelReason>,
}

impl Order {
    /// Build a freshly accepted order from a request.
    #[must_use]
    pub fn accept(id: u64, request: &OrderRequest, now: i64) -> Self {
        Self {
            id,
            symbol: request.symbol.clone(),
            side: request.side,
            kind: request.kind,
            size: request.size,
            price: request.price,
            reduce_only: request.reduce_only,
            post_only: request.post_only,
            parent_id: request.parent_id,
            status: OrderStatus::Open,
            created_at: now,
            last_update_at: now,
            filled_size: Decimal::ZERO,
            avg_fill_price: Decimal::ZERO,
            reserved_cash: Decimal::ZERO,
            reserved_position: Decimal::ZERO,
            cancel_reason: None,
        }
    }

    /// Unfilled remainder.
    #[must_use]
    pub fn remaining(&self) -> Decimal {
        self.size - self.filled_size
    }

    /// Whether the order is in a terminal state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Record a fill, updating the VWAP and status.
    pub fn record_fill(&mut self, fill_size: Decimal, fill_price: Decimal, now: i64) {
        let prior_notional = self.filled_size * self.avg_fill_price;
        let fill_notional = fill_size * fill_price;
        self.filled_size += fill_size;
        if self.filled_size > Decimal::ZERO {
            self.avg_fill_price = (prior_notional + fill_notional) / self.filled_size;
        }
        self.status = if self.filled_size >= self.size {
            OrderStatus::Filled
        } else {
            OrderStatus::PartiallyFilled
        };
        self.last_update_at = now;
    }

    /// Transition to Cancelled with a reason.
    pub fn cancel(&mut self, reason: CancelReason, now: i64) {
        self.status = OrderStatus::Cancelled;
        self.cancel_reason = Some(reason);
        self.reserved_cash = Decimal::ZERO;
        self.reserved_position = Decimal::ZERO;
        self.last_update_at = now;
    }
}
