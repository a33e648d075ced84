//! Shared server state: per-run exchange bundles.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::info;

use crate::config::AppConfig;
use crate::data::{CandleSource, NewsSource};
use crate::error::ApiError;
use crate::exchange::{EngineConfig, MatchingEngine};
use crate::orchestrator::CoinMap;
use crate::persistence::SnapshotStore;
use crate::runner::BacktestRunner;

/// Run id of the interactive session targeted when a request carries none.
pub const DEFAULT_SESSION: &str = "default";

/// One isolated `{Runner, Wallet, Engine}` bundle. Exactly one logical
/// actor mutates it at a time (the session mutex).
#[derive(Debug)]
pub struct ExchangeSession {
    /// Run id this session persists under.
    pub run_id: String,
    /// The session's virtual clock and data windows.
    pub runner: BacktestRunner,
    /// The session's matching engine (which owns the wallet).
    pub engine: MatchingEngine,
}

/// Shared state behind the HTTP router.
#[derive(Clone)]
pub struct AppState {
    config: Arc<AppConfig>,
    coins: CoinMap,
    candles: Arc<dyn CandleSource>,
    news: Arc<dyn NewsSource>,
    store: Option<Arc<SnapshotStore>>,
    sessions: Arc<RwLock<HashMap<String, Arc<Mutex<ExchangeSession>>>>>,
}

impl AppState {
    /// Assemble the server state.
    #[must_use]
    pub fn new(
        config: Arc<AppConfig>,
        coins: CoinMap,
        candles: Arc<dyn CandleSource>,
        news: Arc<dyn NewsSource>,
        store: Option<Arc<SnapshotStore>>,
    ) -> Self {
        Self {
            config,
            coins,
            candles,
            news,
            store,
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Application configuration.
    #[must_use]
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// The coin to symbol mapping.
    #[must_use]
    pub const fn coins(&self) -> &CoinMap {
        &self.coins
    }

    /// The shared candle source.
    #[must_use]
    pub fn candles(&self) -> &dyn CandleSource {
        self.candles.as_ref()
    }

    /// A clone of the news source handle.
    #[must_use]
    pub fn news(&self) -> Arc<dyn NewsSource> {
        self.news.clone()
    }

    /// The snapshot store, when persistence is enabled.
    #[must_use]
    pub fn store(&self) -> Option<Arc<SnapshotStore>> {
        self.store.clone()
    }

    /// Resolve a session by run id. The default interactive session is
    /// created lazily on first use; other ids must already exist.
    ///
    /// # Errors
    ///
    /// `ApiError::not_found` for unknown run ids or when no historical
    /// data is loaded for the default session.
    pub async fn session(
        &self,
        run_id: Option<&str>,
    ) -> Result<Arc<Mutex<ExchangeSession>>, ApiError> {
        let key = run_id.unwrap_or(DEFAULT_SESSION);

        if let Some(session) = self.sessions.read().await.get(key) {
            return Ok(session.clone());
        }
        if key != DEFAULT_SESSION {
            return Err(ApiError::not_found(format!("no session for run {key}")));
        }

        let mut sessions = self.sessions.write().await;
        // Double-check under the write lock.
        if let Some(session) = sessions.get(key) {
            return Ok(session.clone());
        }

        let session = Arc::new(Mutex::new(self.build_default_session()?));
        sessions.insert(key.to_string(), session.clone());
        Ok(session)
    }

    /// Build the interactive session over the intersection of the
    /// configured symbols' available history.
    fn build_default_session(&self) -> Result<ExchangeSession, ApiError> {
        let mut symbols = Vec::new();
        let mut start = i64::MIN;
        let mut end = i64::MAX;

        for symbol in self.coins.symbols() {
            if let Some((first, last)) = self.candles.available_range(symbol) {
                symbols.push(symbol.to_string());
                start = start.max(first);
                end = end.min(last);
            }
        }

        if symbols.is_empty() || start >= end {
            return Err(ApiError::not_found(
                "no historical data loaded for the configured symbols",
            ));
        }

        let runner = BacktestRunner::new(
            self.candles.as_ref(),
            self.news.clone(),
            &symbols,
            start,
            end,
        )
        .map_err(ApiError::from)?;

        let defaults = &self.config.exchange;
        let mut engine = MatchingEngine::new(EngineConfig {
            fee_rate: defaults.fee_rate,
            market_fill: defaults.market_fill,
            starting_cash: defaults.starting_cash,
        });
        for symbol in &symbols {
            if let Some(feed) = runner.candle_feed(symbol) {
                engine.add_feed(symbol, feed);
            }
            if let Some(mark) = runner.mark_price(symbol) {
                engine.set_mark(symbol, mark);
            }
        }
        engine.set_time(runner.current_time());

        info!(
            symbols = symbols.len(),
            start, end, "Interactive exchange session created"
        );

        Ok(ExchangeSession {
            run_id: DEFAULT_SESSION.to_string(),
            runner,
            engine,
        })
    }
}
