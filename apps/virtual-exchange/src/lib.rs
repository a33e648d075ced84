// Allow unwrap/expect in tests - tests should panic on unexpected errors
#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::default_trait_access,
        clippy::items_after_statements
    )
)]

//! Virtual Exchange - Rust Core Library
//!
//! A deterministic, time-travelling order-book simulator with its backtest
//! orchestrator:
//!
//! - **`exchange`**: the matching engine and wallet. Orders fill against
//!   one-minute OHLC candles under a fixed, observable event order; the
//!   wallet tracks cash, netted positions and the append-only trade log.
//! - **`runner`**: the virtual clock. Every read API answers "as of `T`";
//!   derived intervals (15m/4h/1d) are resampled on demand.
//! - **`orchestrator`**: the outer loop. Advances the clock in fixed
//!   decision intervals, extracts intended orders from an external
//!   strategy service's structured reply, and produces a reproducible
//!   performance report.
//! - **`server`**: the HTTP surface shared by virtual and live frontends.
//! - **`persistence`**: one snapshot blob per run, overwritten atomically.
//!
//! Determinism is the core contract: replaying the same candle stream with
//! the same accepted orders yields a byte-identical trade log, and the
//! report carries a SHA-256 hash over the candle rows actually consumed.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

/// Application configuration.
pub mod config;

/// Candle and news sources, resampling, indicators.
pub mod data;

/// HTTP-facing error adapter.
pub mod error;

/// Matching engine and wallet.
pub mod exchange;

/// Domain and wire primitives.
pub mod models;

/// Backtest orchestrator.
pub mod orchestrator;

/// Snapshot persistence.
pub mod persistence;

/// Virtual clock and data windowing.
pub mod runner;

/// HTTP server.
pub mod server;

pub use config::{AppConfig, ConfigError, load_config};
pub use data::{CandleSource, DataError, InMemoryCandleSource, InMemoryNewsSource, NewsSource};
pub use error::ApiError;
pub use exchange::{EngineConfig, ExchangeError, MarketFillPrice, MatchingEngine, Wallet};
pub use models::{Candle, Interval, Order, OrderKind, OrderRequest, OrderSide, OrderStatus};
pub use orchestrator::{
    CoinMap, HttpStrategy, Orchestrator, Report, RunConfig, RunError, RunStatus, ScriptedStep,
    ScriptedStrategy, StrategyProvider, ToolCall,
};
pub use persistence::SnapshotStore;
pub use runner::BacktestRunner;
pub use server::{AppState, create_router};
