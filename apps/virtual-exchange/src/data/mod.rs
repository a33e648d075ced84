//! Time-indexed history: candle and news sources, resampling, indicators.

mod indicators;
mod resample;
mod source;

pub use indicators::{
    BollingerBands, Macd, atr, bollinger, ema, ema_series, macd, mean, rsi, sma, sqrt_decimal,
    std_dev,
};
pub use resample::resample;
pub use source::{
    CandleSource, DataError, InMemoryCandleSource, InMemoryNewsSource, NewsItem, NewsSource,
    validate_coverage,
};
