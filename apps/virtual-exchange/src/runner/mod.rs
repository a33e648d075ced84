//! Backtest runner: the virtual clock and as-of-time data windowing.
//!
//! The runner owns the virtual clock `T` and makes every read API answer
//! "as if now were `T`": candle windows only contain bars that closed at or
//! before `T`, news is filtered by publication time, and the indicator
//! bundle is computed from the windowed series. Derived intervals (15m, 4h,
//! 1d) are resampled from one-minute data on demand and cached.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::data::{
    BollingerBands, CandleSource, DataError, Macd, NewsItem, NewsSource, atr, bollinger, ema,
    macd, resample, rsi, sma, validate_coverage,
};
use crate::models::{Candle, Interval};

/// Errors from the runner's clock and read APIs.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RunnerError {
    /// The virtual clock only moves forward.
    #[error("clock regression: attempted {attempted}, current {current}")]
    ClockRegression {
        /// Rejected timestamp.
        attempted: i64,
        /// Current clock value.
        current: i64,
    },

    /// Symbol not loaded in this run.
    #[error("unknown symbol: {0}")]
    UnknownSymbol(String),
}

/// Indicator values for one timeframe. Values are absent while the window
/// is still too short for the indicator's period.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeframeIndicators {
    /// Timeframe these values were computed on.
    pub interval: Interval,
    /// Latest closed price on this timeframe.
    pub close: Option<Decimal>,
    /// 20-period simple moving average.
    pub sma_20: Option<Decimal>,
    /// 20-period exponential moving average.
    pub ema_20: Option<Decimal>,
    /// 14-period RSI.
    pub rsi_14: Option<Decimal>,
    /// MACD(12, 26, 9).
    pub macd: Option<Macd>,
    /// Bollinger bands (20, 2 sigma).
    pub bollinger: Option<BollingerBands>,
    /// 14-period ATR.
    pub atr_14: Option<Decimal>,
}

/// Multi-timeframe indicator payload served by the read API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorBundle {
    /// Symbol.
    pub symbol: String,
    /// Virtual time the bundle answers for (Unix seconds).
    pub as_of: i64,
    /// Per-timeframe indicator values.
    pub timeframes: Vec<TimeframeIndicators>,
}

/// The runner: virtual clock plus per-symbol historical windows.
pub struct BacktestRunner {
    start: i64,
    end: i64,
    clock: Option<i64>,
    candles: BTreeMap<String, Arc<Vec<Candle>>>,
    derived: HashMap<(String, Interval), Arc<Vec<Candle>>>,
    news: Arc<dyn NewsSource>,
}

impl std::fmt::Debug for BacktestRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BacktestRunner")
            .field("start", &self.start)
            .field("end", &self.end)
            .field("clock", &self.clock)
            .field("symbols", &self.candles.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl BacktestRunner {
    /// Load and validate the historical window `[start, end)` for each
    /// symbol. Coverage must be complete: any missing one-minute bar fails
    /// the construction before a single order can be accepted.
    ///
    /// # Errors
    ///
    /// `DataError::Gap` or `DataError::NoData` when the range is not fully
    /// covered, `DataError::Malformed` for broken candles.
    pub fn new(
        source: &dyn CandleSource,
        news: Arc<dyn NewsSource>,
        symbols: &[String],
        start: i64,
        end: i64,
    ) -> Result<Self, DataError> {
        let mut candles = BTreeMap::new();
        for symbol in symbols {
            let window = source.load_candles(symbol, start, end)?;
            validate_coverage(symbol, &window, start, end)?;
            debug!(symbol = %symbol, bars = window.len(), "Loaded candle window");
            candles.insert(symbol.clone(), Arc::new(window));
        }

        info!(
            source = source.name(),
            symbols = symbols.len(),
            start,
            end,
            "Backtest runner initialised"
        );

        Ok(Self {
            start,
            end,
            clock: None,
            candles,
            derived: HashMap::new(),
            news,
        })
    }

    /// Start of the loaded range.
    #[must_use]
    pub const fn start(&self) -> i64 {
        self.start
    }

    /// End of the loaded range.
    #[must_use]
    pub const fn end(&self) -> i64 {
        self.end
    }

    /// Set the virtual clock. Monotonic within a run: moving to a value at
    /// or before the current clock fails and changes nothing.
    ///
    /// # Errors
    ///
    /// `RunnerError::ClockRegression` when `t` does not advance the clock.
    pub fn set_current_time(&mut self, t: i64) -> Result<(), RunnerError> {
        if let Some(current) = self.clock
            && t <= current
        {
            return Err(RunnerError::ClockRegression {
                attempted: t,
                current,
            });
        }
        self.clock = Some(t);
        Ok(())
    }

    /// Current virtual time. Before the first `set_current_time` this is
    /// the range start.
    #[must_use]
    pub fn current_time(&self) -> i64 {
        self.clock.unwrap_or(self.start)
    }

    /// The full one-minute feed for a symbol, shared with the engine.
    #[must_use]
    pub fn candle_feed(&self, symbol: &str) -> Option<Arc<Vec<Candle>>> {
        self.candles.get(symbol).cloned()
    }

    /// The most recent `limit` closed candles of `interval` whose close
    /// time is at or before the virtual clock. Partial in-progress buckets
    /// are never returned.
    ///
    /// # Errors
    ///
    /// `RunnerError::UnknownSymbol` when the symbol is not loaded.
    pub fn get_candles(
        &mut self,
        symbol: &str,
        interval: Interval,
        limit: usize,
    ) -> Result<Vec<Candle>, RunnerError> {
        let as_of = self.current_time();
        self.get_candles_at(symbol, interval, limit, as_of)
    }

    /// As [`Self::get_candles`], but for an explicit as-of time. Used by
    /// read endpoints that carry their own timestamp parameter.
    pub fn get_candles_at(
        &mut self,
        symbol: &str,
        interval: Interval,
        limit: usize,
        as_of: i64,
    ) -> Result<Vec<Candle>, RunnerError> {
        let series = self.interval_series(symbol, interval)?;
        let closed: Vec<Candle> = series
            .iter()
            .filter(|c| c.close_time <= as_of)
            .cloned()
            .collect();
        let skip = closed.len().saturating_sub(limit);
        Ok(closed[skip..].to_vec())
    }

    /// Close of the latest one-minute candle at or before the clock.
    #[must_use]
    pub fn last_close(&self, symbol: &str) -> Option<Decimal> {
        let as_of = self.current_time();
        self.candles
            .get(symbol)?
            .iter()
            .take_while(|c| c.close_time <= as_of)
            .last()
            .map(|c| c.close)
    }

    /// Mark price as of the clock: the latest closed candle's close, or the
    /// in-progress candle's open when no bar has closed yet (the open has
    /// printed once the bar starts). This primes the engine's equity
    /// accounting ahead of a decision step.
    #[must_use]
    pub fn mark_price(&self, symbol: &str) -> Option<Decimal> {
        let as_of = self.current_time();
        let mut mark = None;
        for candle in self.candles.get(symbol)?.iter() {
            if candle.close_time <= as_of {
                mark = Some(candle.close);
            } else {
                if candle.open_time <= as_of && mark.is_none() {
                    mark = Some(candle.open);
                }
                break;
            }
        }
        mark
    }

    /// Top `k` news items as of the clock.
    #[must_use]
    pub fn top_news(&self, k: usize) -> Vec<NewsItem> {
        self.news.top_news(self.current_time(), k)
    }

    /// Top `k` news items as of an explicit time.
    #[must_use]
    pub fn top_news_at(&self, before: i64, k: usize) -> Vec<NewsItem> {
        self.news.top_news(before, k)
    }

    /// Multi-timeframe indicator bundle as of an explicit time.
    ///
    /// # Errors
    ///
    /// `RunnerError::UnknownSymbol` when the symbol is not loaded.
    pub fn indicator_bundle_at(
        &mut self,
        symbol: &str,
        as_of: i64,
    ) -> Result<IndicatorBundle, RunnerError> {
        let mut timeframes = Vec::new();
        for interval in [Interval::FifteenMinutes, Interval::FourHours, Interval::OneDay] {
            let window = self.get_candles_at(symbol, interval, usize::MAX, as_of)?;
            let closes: Vec<Decimal> = window.iter().map(|c| c.close).collect();
            timeframes.push(TimeframeIndicators {
                interval,
                close: closes.last().copied(),
                sma_20: sma(&closes, 20),
                ema_20: ema(&closes, 20),
                rsi_14: rsi(&closes, 14),
                macd: macd(&closes, 12, 26, 9),
                bollinger: bollinger(&closes, 20, Decimal::TWO),
                atr_14: atr(&window, 14),
            });
        }
        Ok(IndicatorBundle {
            symbol: symbol.to_string(),
            as_of,
            timeframes,
        })
    }

    /// Multi-timeframe indicator bundle as of the clock.
    ///
    /// # Errors
    ///
    /// `RunnerError::UnknownSymbol` when the symbol is not loaded.
    pub fn indicator_bundle(&mut self, symbol: &str) -> Result<IndicatorBundle, RunnerError> {
        let as_of = self.current_time();
        self.indicator_bundle_at(symbol, as_of)
    }

    /// Full derived series for an interval, resampled once and cached.
    fn interval_series(
        &mut self,
        symbol: &str,
        interval: Interval,
    ) -> Result<Arc<Vec<Candle>>, RunnerError> {
        if interval == Interval::OneMinute {
            return self
                .candles
                .get(symbol)
                .cloned()
                .ok_or_else(|| RunnerError::UnknownSymbol(symbol.to_string()));
        }

        let key = (symbol.to_string(), interval);
        if let Some(cached) = self.derived.get(&key) {
            return Ok(cached.clone());
        }

        let minutes = self
            .candles
            .get(symbol)
            .ok_or_else(|| RunnerError::UnknownSymbol(symbol.to_string()))?;
        let series = Arc::new(resample(minutes, interval));
        self.derived.insert(key, series.clone());
        Ok(series)
    }
}
