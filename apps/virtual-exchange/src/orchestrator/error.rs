//! Run-level error taxonomy and exit-code mapping.

use thiserror::Error;

use super::strategy::StrategyError;
use crate::data::DataError;
use crate::exchange::ExchangeError;
use crate::runner::RunnerError;

/// Process exit code for a successful run.
pub const EXIT_OK: i32 = 0;
/// Process exit code for rejected input.
pub const EXIT_BAD_INPUT: i32 = 2;
/// Process exit code for an uncovered data range.
pub const EXIT_DATA_GAP: i32 = 3;
/// Process exit code when the strategy service is unreachable.
pub const EXIT_STRATEGY_UNREACHABLE: i32 = 4;
/// Process exit code for internal engine faults.
pub const EXIT_ENGINE_FAULT: i32 = 5;

/// Errors that end (or prevent) a run.
#[derive(Debug, Error)]
pub enum RunError {
    /// The run request itself is invalid.
    #[error("invalid run: {0}")]
    InvalidRun(String),

    /// History loading or validation failed.
    #[error(transparent)]
    Data(#[from] DataError),

    /// Virtual clock or windowing fault.
    #[error(transparent)]
    Runner(#[from] RunnerError),

    /// Engine fault.
    #[error(transparent)]
    Exchange(#[from] ExchangeError),

    /// Strategy collaborator fault (soft per step; fatal only when
    /// escalated by the caller).
    #[error(transparent)]
    Strategy(#[from] StrategyError),

    /// Snapshot or report persistence failed.
    #[error("persistence error: {0}")]
    Persistence(String),
}

impl RunError {
    /// Stable reason string for wire payloads and diagnostics.
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            Self::InvalidRun(_) => "INVALID_RUN",
            Self::Data(DataError::Malformed(_)) => "MALFORMED_CANDLE",
            Self::Data(_) => "DATA_GAP",
            Self::Runner(RunnerError::ClockRegression { .. }) => "CLOCK_REGRESSION",
            Self::Runner(RunnerError::UnknownSymbol(_)) => "UNKNOWN_SYMBOL",
            Self::Exchange(e) => e.reason(),
            Self::Strategy(StrategyError::Timeout) => "STRATEGY_TIMEOUT",
            Self::Strategy(_) => "STRATEGY_UNAVAILABLE",
            Self::Persistence(_) => "PERSISTENCE",
        }
    }

    /// CLI exit code for this error class.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::InvalidRun(_) => EXIT_BAD_INPUT,
            Self::Data(DataError::Malformed(_)) => EXIT_ENGINE_FAULT,
            Self::Data(_) => EXIT_DATA_GAP,
            Self::Strategy(_) => EXIT_STRATEGY_UNREACHABLE,
            Self::Runner(_) | Self::Exchange(_) | Self::Persistence(_) => EXIT_ENGINE_FAULT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(
            RunError::InvalidRun("x".to_string()).exit_code(),
            EXIT_BAD_INPUT
        );
        assert_eq!(
            RunError::Data(DataError::NoData("BTCUSDT".to_string())).exit_code(),
            EXIT_DATA_GAP
        );
        assert_eq!(
            RunError::Strategy(StrategyError::Timeout).exit_code(),
            EXIT_STRATEGY_UNREACHABLE
        );
        assert_eq!(
            RunError::Exchange(ExchangeError::Invariant("x".to_string())).exit_code(),
            EXIT_ENGINE_FAULT
        );
    }

    #[test]
    fn test_reasons() {
        assert_eq!(
            RunError::Data(DataError::NoData("BTCUSDT".to_string())).reason(),
            "DATA_GAP"
        );
        assert_eq!(
            RunError::Runner(RunnerError::ClockRegression {
                attempted: 1,
                current: 2,
            })
            .reason(),
            "CLOCK_REGRESSION"
        );
        assert_eq!(
            RunError::Strategy(StrategyError::Timeout).reason(),
            "STRATEGY_TIMEOUT"
        );
    }
}
