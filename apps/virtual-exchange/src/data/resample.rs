//! Resampling one-minute candles into derived intervals.

use rust_decimal::Decimal;

use crate::models::{Candle, Interval};

/// Resample one-minute candles into `interval` buckets.
///
/// Buckets align to `interval.secs()` boundaries. The resampled bar uses
/// `open = first.open`, `high = max.high`, `low = min.low`,
/// `close = last.close`, `volume = sum`. Partial (incomplete) buckets are
/// never emitted, so a derived candle only exists once every one of its
/// minutes closed.
#[must_use]
pub fn resample(minutes: &[Candle], interval: Interval) -> Vec<Candle> {
    if interval == Interval::OneMinute {
        return minutes.to_vec();
    }

    let width = interval.secs();
    let expected_bars = width / crate::models::MINUTE_SECS;
    let mut out = Vec::new();

    let mut bucket_start: Option<i64> = None;
    let mut open = Decimal::ZERO;
    let mut high = Decimal::ZERO;
    let mut low = Decimal::ZERO;
    let mut close = Decimal::ZERO;
    let mut volume = Decimal::ZERO;
    let mut count: i64 = 0;

    for candle in minutes {
        let aligned = candle.open_time - candle.open_time.rem_euclid(width);

        if bucket_start != Some(aligned) {
            bucket_start = Some(aligned);
            open = candle.open;
            high = candle.high;
            low = candle.low;
            volume = Decimal::ZERO;
            count = 0;
        }

        high = high.max(candle.high);
        low = low.min(candle.low);
        close = candle.close;
        volume += candle.volume;
        count += 1;

        if count == expected_bars
            && let Some(start) = bucket_start
        {
            out.push(Candle {
                open_time: start,
                close_time: start + width,
                open,
                high,
                low,
                close,
                volume,
            });
            bucket_start = None;
        }
    }

    out
}
