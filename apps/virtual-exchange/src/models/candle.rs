//! OHLCV candle types keyed by Unix-second bar times.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Seconds in one minute, the canonical matching interval.
pub const MINUTE_SECS: i64 = 60;

/// Candle aggregation interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Interval {
    /// One minute, the matching primitive.
    OneMinute,
    /// Fifteen minutes, derived.
    FifteenMinutes,
    /// Four hours, derived.
    FourHours,
    /// One day, derived.
    OneDay,
}

impl Interval {
    /// Interval width in seconds.
    #[must_use]
    pub const fn secs(&self) -> i64 {
        match self {
            Self::OneMinute => MINUTE_SECS,
            Self::FifteenMinutes => 15 * MINUTE_SECS,
            Self::FourHours => 4 * 60 * MINUTE_SECS,
            Self::OneDay => 24 * 60 * MINUTE_SECS,
        }
    }

    /// Short code used in request paths ("1m", "15m", "4h", "1d").
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::OneMinute => "1m",
            Self::FifteenMinutes => "15m",
            Self::FourHours => "4h",
            Self::OneDay => "1d",
        }
    }

    /// Parse a short interval code.
    #[must_use]
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "1m" => Some(Self::OneMinute),
            "15m" => Some(Self::FifteenMinutes),
            "4h" => Some(Self::FourHours),
            "1d" => Some(Self::OneDay),
            _ => None,
        }
    }
}

/// Structural defect in a candle. Fatal to a run.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CandleError {
    /// High is below low.
    #[error("candle at {open_time} has high {high} below low {low}")]
    HighBelowLow {
        /// Bar start time.
        open_time: i64,
        /// High price.
        high: Decimal,
        /// Low price.
        low: Decimal,
    },

    /// Open or close outside the high/low range.
    #[error("candle at {open_time} has open/close outside [low, high]")]
    RangeViolation {
        /// Bar start time.
        open_time: i64,
    },

    /// A price is zero or negative.
    #[error("candle at {open_time} has non-positive price")]
    NonPositivePrice {
        /// Bar start time.
        open_time: i64,
    },

    /// Close time does not follow open time.
    #[error("candle at {open_time} has close_time {close_time} not after open_time")]
    BadTimes {
        /// Bar start time.
        open_time: i64,
        /// Bar close time.
        close_time: i64,
    },
}

/// OHLCV candle over a fixed interval.
///
/// `open_time` is the bar start, `close_time` the bar end; both are Unix
/// seconds UTC. A candle covers `[open_time, close_time)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candle {
    /// Bar start (Unix seconds).
    pub open_time: i64,
    /// Bar end (Unix seconds).
    pub close_time: i64,
    /// Open price.
    pub open: Decimal,
    /// High price.
    pub high: Decimal,
    /// Low price.
    pub low: Decimal,
    /// Close price.
    pub close: Decimal,
    /// Traded volume.
    pub volume: Decimal,
}

impl Candle {
    /// Create a one-minute candle starting at `open_time`.
    #[must_use]
    pub const fn minute(
        open_time: i64,
        open: Decimal,
        high: Decimal,
        low: Decimal,
        close: Decimal,
        volume: Decimal,
    ) -> Self {
        Self {
            open_time,
            close_time: open_time + MINUTE_SECS,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// Check if a price level lies within this candle's range (inclusive).
    #[must_use]
    pub fn price_touched(&self, price: Decimal) -> bool {
        price >= self.low && price <= self.high
    }

    /// Validate structural integrity.
    ///
    /// # Errors
    ///
    /// Returns the first structural defect found. A defective candle must
    /// abort the run rather than produce fills.
    pub fn validate(&self) -> Result<(), CandleError> {
        if self.close_time <= self.open_time {
            return Err(CandleError::BadTimes {
                open_time: self.open_time,
                close_time: self.close_time,
            });
        }
        if self.open <= Decimal::ZERO
            || self.high <= Decimal::ZERO
            || self.low <= Decimal::ZERO
            || self.close <= Decimal::ZERO
        {
            return Err(CandleError::NonPositivePrice {
                open_time: self.open_time,
            });
        }
        if self.high < self.low {
            return Err(CandleError::HighBelowLow {
                open_time: self.open_time,
                high: self.high,
                low: self.low,
            });
        }
        if !self.price_touched(self.open) || !self.price_touched(self.close) {
            return Err(CandleError::RangeViolation {
                open_time: self.open_time,
            });
        }
        Ok(())
    }
}
