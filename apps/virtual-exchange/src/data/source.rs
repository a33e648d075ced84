//! Data source traits and in-memory implementations.
//!
//! Sources are read-only and safe for concurrent reads across runs; every
//! run loads its own window up front so a mid-run data problem can never
//! surface after orders were accepted.

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{Candle, CandleError, MINUTE_SECS};

/// Errors from history loading and validation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DataError {
    /// No data at all for the symbol.
    #[error("no candle data for {0}")]
    NoData(String),

    /// The requested range is not fully covered by one-minute candles.
    #[error("data gap for {symbol}: expected bar at {expected}, found {found:?}")]
    Gap {
        /// Symbol affected.
        symbol: String,
        /// Bar start that should exist (Unix seconds).
        expected: i64,
        /// Bar start actually found, if any.
        found: Option<i64>,
    },

    /// A candle in the range is structurally broken.
    #[error(transparent)]
    Malformed(#[from] CandleError),
}

/// Source of one-minute candle history.
pub trait CandleSource: Send + Sync {
    /// Load the one-minute candles for `symbol` with
    /// `start <= open_time < end`, sorted chronologically.
    ///
    /// # Errors
    ///
    /// Returns an error if the symbol is unknown or the data cannot be read.
    fn load_candles(&self, symbol: &str, start: i64, end: i64) -> Result<Vec<Candle>, DataError>;

    /// Full `[first_open, last_close]` range available for a symbol.
    fn available_range(&self, symbol: &str) -> Option<(i64, i64)>;

    /// Name of this source, for logging.
    fn name(&self) -> &'static str;
}

/// Validate that `candles` contiguously cover `[start, end)` in one-minute
/// bars and that every bar is structurally sound.
///
/// # Errors
///
/// `DataError::Gap` on the first missing or misaligned bar,
/// `DataError::Malformed` on the first broken candle.
pub fn validate_coverage(
    symbol: &str,
    candles: &[Candle],
    start: i64,
    end: i64,
) -> Result<(), DataError> {
    let mut expected = start;
    let mut iter = candles.iter();
    while expected < end {
        match iter.next() {
            Some(candle) if candle.open_time == expected => {
                candle.validate()?;
                expected += MINUTE_SECS;
            }
            other => {
                return Err(DataError::Gap {
                    symbol: symbol.to_string(),
                    expected,
                    found: other.map(|c| c.open_time),
                });
            }
        }
    }
    Ok(())
}

/// In-memory candle source for tests and canned runs.
#[derive(Debug, Default)]
pub struct InMemoryCandleSource {
    data: HashMap<String, Vec<Candle>>,
}

impl InMemoryCandleSource {
    /// Create an empty source.
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: HashMap::new(),
        }
    }

    /// Add candles for a symbol. Candles must be sorted by open time.
    pub fn add_candles(&mut self, symbol: &str, candles: Vec<Candle>) {
        self.data.insert(symbol.to_string(), candles);
    }
}

impl CandleSource for InMemoryCandleSource {
    fn load_candles(&self, symbol: &str, start: i64, end: i64) -> Result<Vec<Candle>, DataError> {
        let candles = self
            .data
            .get(symbol)
            .ok_or_else(|| DataError::NoData(symbol.to_string()))?;
        Ok(candles
            .iter()
            .filter(|c| c.open_time >= start && c.open_time < end)
            .cloned()
            .collect())
    }

    fn available_range(&self, symbol: &str) -> Option<(i64, i64)> {
        let candles = self.data.get(symbol)?;
        let first = candles.first()?;
        let last = candles.last()?;
        Some((first.open_time, last.close_time))
    }

    fn name(&self) -> &'static str {
        "InMemory"
    }
}

/// A news item with its source-assigned importance score.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewsItem {
    /// Stable identifier.
    pub id: String,
    /// Headline.
    pub title: String,
    /// Publishing source.
    pub source: String,
    /// Importance score assigned upstream; higher is more important.
    #[serde(with = "rust_decimal::serde::str")]
    pub importance: Decimal,
    /// Publication time (Unix seconds).
    pub published_at: i64,
}

/// Source of time-indexed news.
pub trait NewsSource: Send + Sync {
    /// The top `k` items published at or before `before`, ordered by
    /// importance descending, then publication time descending.
    fn top_news(&self, before: i64, k: usize) -> Vec<NewsItem>;
}

/// In-memory news source.
#[derive(Debug, Default)]
pub struct InMemoryNewsSource {
    items: Vec<NewsItem>,
}

impl InMemoryNewsSource {
    /// Create an empty source.
    #[must_use]
    pub fn new() -> Self {
        Self { items: Vec::new() }
    }

    /// Add a news item.
    pub fn add(&mut self, item: NewsItem) {
        self.items.push(item);
    }
}

impl NewsSource for InMemoryNewsSource {
    fn top_news(&self, before: i64, k: usize) -> Vec<NewsItem> {
        let mut matching: Vec<NewsItem> = self
            .items
            .iter()
            .filter(|n| n.published_at <= before)
            .cloned()
            .collect();
        matching.sort_by(|a, b| {
            b.importance
                .cmp(&a.importance)
                .then(b.published_at.cmp(&a.published_at))
        });
        matching.truncate(k);
        matching
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    fn contiguous_candles(start: i64, count: usize) -> Vec<Candle> {
        (0..count)
            .map(|i| {
                Candle::minute(
                    start + (i as i64) * 60,
                    dec!(100),
                    dec!(101),
                    dec!(99),
                    dec!(100),
                    dec!(10),
                )
            })
            .collect()
    }

    #[test]
    fn test_coverage_accepts_contiguous_range() {
        let start = 1_700_000_000;
        let candles = contiguous_candles(start, 10);
        assert!(validate_coverage("BTCUSDT", &candles, start, start + 600).is_ok());
    }

    #[test]
    fn test_coverage_detects_missing_bar() {
        let start = 1_700_000_000;
        let mut candles = contiguous_candles(start, 10);
        candles.remove(4);

        let err = validate_coverage("BTCUSDT", &candles, start, start + 600).unwrap_err();
        assert_eq!(
            err,
            DataError::Gap {
                symbol: "BTCUSDT".to_string(),
                expected: start + 4 * 60,
                found: Some(start + 5 * 60),
            }
        );
    }

    #[test]
    fn test_coverage_detects_truncated_range() {
        let start = 1_700_000_000;
        let candles = contiguous_candles(start, 5);
        assert!(matches!(
            validate_coverage("BTCUSDT", &candles, start, start + 600),
            Err(DataError::Gap { found: None, .. })
        ));
    }

    #[test]
    fn test_in_memory_source_filters_range() {
        let start = 1_700_000_000;
        let mut source = InMemoryCandleSource::new();
        source.add_candles("BTCUSDT", contiguous_candles(start, 10));

        let window = source
            .load_candles("BTCUSDT", start + 120, start + 300)
            .unwrap();
        assert_eq!(window.len(), 3);
        assert_eq!(window[0].open_time, start + 120);

        assert!(matches!(
            source.load_candles("ETHUSDT", start, start + 60),
            Err(DataError::NoData(_))
        ));
    }

    #[test]
    fn test_available_range() {
        let start = 1_700_000_000;
        let mut source = InMemoryCandleSource::new();
        source.add_candles("BTCUSDT", contiguous_candles(start, 10));
        assert_eq!(
            source.available_range("BTCUSDT"),
            Some((start, start + 600))
        );
        assert_eq!(source.available_range("ETHUSDT"), None);
    }

    #[test]
    fn test_top_news_ordering() {
        let mut source = InMemoryNewsSource::new();
        source.add(NewsItem {
            id: "a".to_string(),
            title: "minor".to_string(),
            source: "wire".to_string(),
            importance: dec!(1),
            published_at: 100,
        });
        source.add(NewsItem {
            id: "b".to_string(),
            title: "major-old".to_string(),
            source: "wire".to_string(),
            importance: dec!(9),
            published_at: 50,
        });
        source.add(NewsItem {
            id: "c".to_string(),
            title: "major-new".to_string(),
            source: "wire".to_string(),
            importance: dec!(9),
            published_at: 90,
        });
        source.add(NewsItem {
            id: "d".to_string(),
            title: "future".to_string(),
            source: "wire".to_string(),
            importance: dec!(10),
            published_at: 500,
        });

        let top = source.top_news(100, 2);
        assert_eq!(top.len(), 2);
        // Importance first, then recency; the future item is invisible.
        assert_eq!(top[0].id, "c");
        assert_eq!(top[1].id, "b");
    }
}
