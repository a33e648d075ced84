//! Technical indicators over decimal price series.
//!
//! One shared set of routines serves both the read API and the report
//! path: identical input series always produce identical outputs (strict
//! decimal equality, no floating point involved).

use rust_decimal::Decimal;

use crate::models::Candle;

const HUNDRED: Decimal = Decimal::from_parts(100, 0, 0, false, 0);
const TWO: Decimal = Decimal::from_parts(2, 0, 0, false, 0);
const SQRT_TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 12);

/// Mean of a series. `None` when empty.
#[must_use]
pub fn mean(values: &[Decimal]) -> Option<Decimal> {
    if values.is_empty() {
        return None;
    }
    let sum: Decimal = values.iter().sum();
    Some(sum / Decimal::from(values.len() as u64))
}

/// Sample standard deviation. `None` below two points.
#[must_use]
pub fn std_dev(values: &[Decimal]) -> Option<Decimal> {
    if values.len() < 2 {
        return None;
    }
    let avg = mean(values)?;
    let variance_sum: Decimal = values.iter().map(|v| (*v - avg) * (*v - avg)).sum();
    let variance = variance_sum / Decimal::from((values.len() - 1) as u64);
    sqrt_decimal(variance)
}

/// Square root by Newton's method. `None` for negative input.
#[must_use]
pub fn sqrt_decimal(value: Decimal) -> Option<Decimal> {
    if value < Decimal::ZERO {
        return None;
    }
    if value == Decimal::ZERO {
        return Some(Decimal::ZERO);
    }

    let mut guess = value / TWO;
    if guess == Decimal::ZERO {
        guess = value;
    }
    for _ in 0..64 {
        let next = (guess + value / guess) / TWO;
        if (next - guess).abs() < SQRT_TOLERANCE {
            return Some(next);
        }
        guess = next;
    }
    Some(guess)
}

/// Simple moving average of the trailing `period` values.
#[must_use]
pub fn sma(values: &[Decimal], period: usize) -> Option<Decimal> {
    if period == 0 || values.len() < period {
        return None;
    }
    mean(&values[values.len() - period..])
}

/// Exponential moving average series, seeded with the SMA of the first
/// `period` values. The output is aligned so that `out[i]` corresponds to
/// `values[i + period - 1]`.
#[must_use]
pub fn ema_series(values: &[Decimal], period: usize) -> Vec<Decimal> {
    if period == 0 || values.len() < period {
        return Vec::new();
    }
    let Some(seed) = mean(&values[..period]) else {
        return Vec::new();
    };

    let multiplier = TWO / Decimal::from((period + 1) as u64);
    let mut out = Vec::with_capacity(values.len() - period + 1);
    let mut current = seed;
    out.push(current);

    for value in &values[period..] {
        current = (*value - current) * multiplier + current;
        out.push(current);
    }
    out
}

/// Latest exponential moving average value.
#[must_use]
pub fn ema(values: &[Decimal], period: usize) -> Option<Decimal> {
    ema_series(values, period).last().copied()
}

/// Relative Strength Index with Wilder smoothing.
#[must_use]
pub fn rsi(closes: &[Decimal], period: usize) -> Option<Decimal> {
    if period == 0 || closes.len() < period + 1 {
        return None;
    }

    let mut gains = Decimal::ZERO;
    let mut losses = Decimal::ZERO;
    for window in closes[..=period].windows(2) {
        let change = window[1] - window[0];
        if change > Decimal::ZERO {
            gains += change;
        } else {
            losses -= change;
        }
    }

    let period_dec = Decimal::from(period as u64);
    let mut avg_gain = gains / period_dec;
    let mut avg_loss = losses / period_dec;

    for window in closes[period..].windows(2) {
        let change = window[1] - window[0];
        let (gain, loss) = if change > Decimal::ZERO {
            (change, Decimal::ZERO)
        } else {
            (Decimal::ZERO, -change)
        };
        avg_gain = (avg_gain * (period_dec - Decimal::ONE) + gain) / period_dec;
        avg_loss = (avg_loss * (period_dec - Decimal::ONE) + loss) / period_dec;
    }

    if avg_loss == Decimal::ZERO {
        return Some(HUNDRED);
    }
    let rs = avg_gain / avg_loss;
    Some(HUNDRED - HUNDRED / (Decimal::ONE + rs))
}

/// MACD line, signal line and histogram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Macd {
    /// Fast EMA minus slow EMA.
    pub macd: Decimal,
    /// EMA of the MACD line.
    pub signal: Decimal,
    /// MACD minus signal.
    pub histogram: Decimal,
}

/// MACD with the conventional (fast, slow, signal) periods, e.g. (12, 26, 9).
#[must_use]
pub fn macd(closes: &[Decimal], fast: usize, slow: usize, signal: usize) -> Option<Macd> {
    if fast >= slow || closes.len() < slow + signal - 1 {
        return None;
    }

    let fast_series = ema_series(closes, fast);
    let slow_series = ema_series(closes, slow);
    // Align: slow_series[i] pairs with fast_series[i + slow - fast].
    let offset = slow - fast;
    let macd_series: Vec<Decimal> = slow_series
        .iter()
        .enumerate()
        .map(|(i, slow_val)| fast_series[i + offset] - *slow_val)
        .collect();

    let signal_series = ema_series(&macd_series, signal);
    let signal_value = *signal_series.last()?;
    let macd_value = *macd_series.last()?;

    Some(Macd {
        macd: macd_value,
        signal: signal_value,
        histogram: macd_value - signal_value,
    })
}

/// Bollinger bands around an SMA.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct BollingerBands {
    /// Middle band (SMA).
    pub middle: Decimal,
    /// Upper band.
    pub upper: Decimal,
    /// Lower band.
    pub lower: Decimal,
}

/// Bollinger bands over the trailing `period` closes with width `k` sigmas.
#[must_use]
pub fn bollinger(closes: &[Decimal], period: usize, k: Decimal) -> Option<BollingerBands> {
    if period < 2 || closes.len() < period {
        return None;
    }
    let window = &closes[closes.len() - period..];
    let middle = mean(window)?;
    let sigma = std_dev(window)?;
    Some(BollingerBands {
        middle,
        upper: middle + k * sigma,
        lower: middle - k * sigma,
    })
}

/// Average True Range with Wilder smoothing.
#[must_use]
pub fn atr(candles: &[Candle], period: usize) -> Option<Decimal> {
    if period == 0 || candles.len() < period + 1 {
        return None;
    }

    let true_ranges: Vec<Decimal> = candles
        .windows(2)
        .map(|pair| {
            let prev_close = pair[0].close;
            let candle = &pair[1];
            let range = candle.high - candle.low;
            range
                .max((candle.high - prev_close).abs())
                .max((candle.low - prev_close).abs())
        })
        .collect();

    let period_dec = Decimal::from(period as u64);
    let mut value = mean(&true_ranges[..period])?;
    for tr in &true_ranges[period..] {
        value = (value * (period_dec - Decimal::ONE) + *tr) / period_dec;
    }
    Some(value)
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    fn series(values: &[i64]) -> Vec<Decimal> {
        values.iter().map(|v| Decimal::from(*v)).collect()
    }

    #[test]
    fn test_mean_and_std_dev() {
        let values = series(&[10, 20, 30, 40]);
        assert_eq!(mean(&values), Some(dec!(25)));

        let std = std_dev(&values).unwrap();
        assert!(std > dec!(12) && std < dec!(14));
    }

    #[test]
    fn test_sqrt() {
        let sqrt4 = sqrt_decimal(dec!(4)).unwrap();
        assert!((sqrt4 - dec!(2)).abs() < dec!(0.0001));
        assert_eq!(sqrt_decimal(dec!(-1)), None);
        assert_eq!(sqrt_decimal(Decimal::ZERO), Some(Decimal::ZERO));
    }

    #[test]
    fn test_sma() {
        let values = series(&[1, 2, 3, 4, 5]);
        assert_eq!(sma(&values, 3), Some(dec!(4)));
        assert_eq!(sma(&values, 5), Some(dec!(3)));
        assert_eq!(sma(&values, 6), None);
    }

    #[test]
    fn test_ema_constant_series_is_flat() {
        let values = vec![dec!(50); 30];
        assert_eq!(ema(&values, 10), Some(dec!(50)));
    }

    #[test]
    fn test_ema_reacts_faster_than_sma_to_a_jump() {
        let values = series(&[100, 100, 100, 100, 100, 100, 100, 100, 100, 200]);
        let ema5 = ema(&values, 5).unwrap();
        let sma5 = sma(&values, 5).unwrap();
        // SMA of the last five is 120; the EMA weights the jump harder.
        assert_eq!(sma5, dec!(120));
        assert!(ema5 > sma5);
    }

    #[test]
    fn test_rsi_all_gains_is_hundred() {
        let values = series(&[1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15]);
        assert_eq!(rsi(&values, 14), Some(dec!(100)));
    }

    #[test]
    fn test_rsi_balanced_series_is_midscale() {
        // Alternating +1/-1 changes: equal average gain and loss, RSI = 50.
        let mut values = Vec::new();
        for i in 0..30 {
            values.push(if i % 2 == 0 { dec!(100) } else { dec!(101) });
        }
        let value = rsi(&values, 14).unwrap();
        assert!((value - dec!(50)).abs() < dec!(1));
    }

    #[test]
    fn test_rsi_insufficient_data() {
        assert_eq!(rsi(&series(&[1, 2, 3]), 14), None);
    }

    #[test]
    fn test_macd_flat_series_is_zero() {
        let values = vec![dec!(100); 60];
        let result = macd(&values, 12, 26, 9).unwrap();
        assert_eq!(result.macd, Decimal::ZERO);
        assert_eq!(result.signal, Decimal::ZERO);
        assert_eq!(result.histogram, Decimal::ZERO);
    }

    #[test]
    fn test_macd_rising_series_is_positive() {
        let values: Vec<Decimal> = (1..=60).map(Decimal::from).collect();
        let result = macd(&values, 12, 26, 9).unwrap();
        assert!(result.macd > Decimal::ZERO);
    }

    #[test]
    fn test_bollinger_flat_series() {
        let values = vec![dec!(100); 20];
        let bands = bollinger(&values, 20, dec!(2)).unwrap();
        assert_eq!(bands.middle, dec!(100));
        assert_eq!(bands.upper, dec!(100));
        assert_eq!(bands.lower, dec!(100));
    }

    #[test]
    fn test_bollinger_bands_bracket_the_mean() {
        let values = series(&[95, 98, 100, 102, 105, 99, 101, 97, 103, 100,
                              96, 104, 99, 101, 98, 102, 100, 97, 103, 100]);
        let bands = bollinger(&values, 20, dec!(2)).unwrap();
        assert!(bands.lower < bands.middle && bands.middle < bands.upper);
    }

    #[test]
    fn test_atr_constant_range() {
        let candles: Vec<Candle> = (0..20)
            .map(|i| {
                Candle::minute(
                    1_700_000_000 + i * 60,
                    dec!(100),
                    dec!(101),
                    dec!(99),
                    dec!(100),
                    dec!(1),
                )
            })
            .collect();
        // Every true range is high - low = 2.
        assert_eq!(atr(&candles, 14), Some(dec!(2)));
    }

    #[test]
    fn test_shared_routine_consistency_across_resample_paths() {
        // Same series fed twice must give identical values; this is the
        // equality contract between the read API and the report path.
        let values: Vec<Decimal> = (1..=40).map(Decimal::from).collect();
        assert_eq!(rsi(&values, 14), rsi(&values.clone(), 14));
        assert_eq!(ema(&values, 20), ema(&values.clone(), 20));
    }
}
