//! Exchange error taxonomy.

use rust_decimal::Decimal;
use thiserror::Error;

use crate::models::CandleError;

/// Errors raised by the matching engine and wallet.
///
/// Placement-time rejections (`InvalidOrder`, `InsufficientFunds`,
/// `UnknownSymbol`, `AlreadyTerminal`, `OrderNotFound`, `NotModifiable`)
/// are returned to the caller and leave the run alive. `MalformedCandle`
/// and `Invariant` are fatal to the run.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExchangeError {
    /// Order failed validation at placement.
    #[error("invalid order: {0}")]
    InvalidOrder(String),

    /// Wallet cannot cover the reservation.
    #[error("insufficient funds: required {required}, available {available}")]
    InsufficientFunds {
        /// Cash required to reserve.
        required: Decimal,
        /// Free cash available.
        available: Decimal,
    },

    /// Symbol is not part of the configured universe.
    #[error("unknown symbol: {0}")]
    UnknownSymbol(String),

    /// Cancel or modify hit an order already in a terminal state.
    #[error("order {0} is already terminal")]
    AlreadyTerminal(u64),

    /// No order with this id exists.
    #[error("order {0} not found")]
    OrderNotFound(u64),

    /// Modify requires an Open or PartiallyFilled order.
    #[error("order {0} is not modifiable")]
    NotModifiable(u64),

    /// A candle failed structural validation. Fatal.
    #[error(transparent)]
    MalformedCandle(#[from] CandleError),

    /// An engine invariant was violated. Fatal; no further state commits.
    #[error("engine invariant violated: {0}")]
    Invariant(String),
}

impl ExchangeError {
    /// Stable reason string for wire payloads and diagnostics.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::InvalidOrder(_) => "INVALID_ORDER",
            Self::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            Self::UnknownSymbol(_) => "UNKNOWN_SYMBOL",
            Self::AlreadyTerminal(_) => "ALREADY_TERMINAL",
            Self::OrderNotFound(_) => "ORDER_NOT_FOUND",
            Self::NotModifiable(_) => "NOT_MODIFIABLE",
            Self::MalformedCandle(_) => "MALFORMED_CANDLE",
            Self::Invariant(_) => "ENGINE_INVARIANT",
        }
    }

    /// Whether this error aborts the run.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::MalformedCandle(_) | Self::Invariant(_))
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn test_reasons_are_stable() {
        assert_eq!(
            ExchangeError::InvalidOrder("x".to_string()).reason(),
            "INVALID_ORDER"
        );
        assert_eq!(
            ExchangeError::InsufficientFunds {
                required: dec!(10),
                available: dec!(5),
            }
            .reason(),
            "INSUFFICIENT_FUNDS"
        );
        assert_eq!(ExchangeError::AlreadyTerminal(1).reason(), "ALREADY_TERMINAL");
    }

    #[test]
    fn test_fatality_split() {
        assert!(!ExchangeError::OrderNotFound(1).is_fatal());
        assert!(ExchangeError::Invariant("x".to_string()).is_fatal());
    }
}
