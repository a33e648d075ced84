//! Virtual exchange: deterministic matching engine plus wallet.
//!
//! Orders fill against one-minute OHLC candles. Within a candle, events run
//! in a fixed sequence that is part of the observable contract:
//!
//! 1. Snapshot the open orders eligible for the candle (orders placed within
//!    the candle wait for the next one)
//! 2. Market orders fill at the configured bar price
//! 3. Triggered protective orders (stop-loss / take-profit) fill, with the
//!    take-profit winning an OCO race and cancelling its sibling
//! 4. Limit orders whose price lies within the bar range fill at their price
//! 5. Positions update by VWAP on entries, realised PnL on exits
//! 6. A flat `fee_rate` applies to every fill's notional
//!
//! Ties among equally-eligible orders break by id ascending. Replaying the
//! same candle stream with the same accepted orders yields a byte-identical
//! trade log.

mod config;
mod engine;
mod error;
mod fills;
mod trade;
mod wallet;

pub use config::{EngineConfig, MarketFillPrice};
pub use engine::{EngineSnapshot, MatchingEngine};
pub use error::ExchangeError;
pub use fills::{
    limit_crosses, market_fill_price, post_only_crosses, protective_triggered, stop_fill_price,
};
pub use trade::{BarKind, Trade};
pub use wallet::{Wallet, WalletSnapshot};
