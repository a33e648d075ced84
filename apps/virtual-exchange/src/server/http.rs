//! HTTP/JSON API for the virtual exchange.
//!
//! Both the virtual exchange and a live frontend honour these shapes:
//! monetary and size fields are decimal-as-string, structured timestamps
//! are integer Unix seconds, and human-facing request fields are ISO-8601
//! UTC.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::DateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::state::AppState;
use crate::data::NewsItem;
use crate::error::ApiError;
use crate::exchange::MarketFillPrice;
use crate::models::{Order, OrderKind, OrderRequest, OrderSide, TpSl};
use crate::orchestrator::{
    HttpStrategy, Orchestrator, Report, RunConfig, ScriptedStep, ScriptedStrategy,
    StrategyProvider,
};
use crate::runner::IndicatorBundle;

/// Create the Axum router with all endpoints.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/exchange/order", post(place_order))
        .route("/exchange/cancel", post(cancel_order))
        .route("/exchange/modify", post(modify_order))
        .route("/info", post(account_info))
        .route("/gpt-latest/{symbol}", get(gpt_latest))
        .route("/top-news", get(top_news))
        .route("/backtest/orchestrate", post(orchestrate))
        .route("/backtest/run", post(backtest_run))
        .with_state(state)
}

/// Health check endpoint.
async fn health() -> &'static str {
    "OK"
}

fn parse_order_kind(raw: &str) -> Result<OrderKind, ApiError> {
    match raw.to_uppercase().as_str() {
        "MARKET" => Ok(OrderKind::Market),
        "LIMIT" => Ok(OrderKind::Limit),
        "TAKE_PROFIT" => Ok(OrderKind::TakeProfit),
        "STOP_LOSS" => Ok(OrderKind::StopLoss),
        other => Err(ApiError::new(
            axum::http::StatusCode::BAD_REQUEST,
            "INVALID_ORDER",
            format!("unknown order type {other}"),
        )),
    }
}

fn parse_iso(field: &str, raw: &str) -> Result<i64, ApiError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.timestamp())
        .map_err(|e| {
            ApiError::bad_request(format!("invalid {field}: {e}")).with_detail("value", raw)
        })
}

/// Request to place an order.
#[derive(Debug, Deserialize)]
pub struct PlaceOrderRequest {
    /// Run to target; the interactive session when omitted.
    pub run_id: Option<String>,
    /// Base asset, resolved through the coin map.
    pub coin: String,
    /// Buy (true) or sell (false).
    pub is_buy: bool,
    /// Order size.
    pub sz: Decimal,
    /// Limit or trigger price.
    pub limit_px: Option<Decimal>,
    /// Order type (MARKET, LIMIT, TAKE_PROFIT, STOP_LOSS).
    pub order_type: String,
    /// Reduce-only flag.
    #[serde(default)]
    pub reduce_only: bool,
    /// Post-only flag (limit only).
    #[serde(default)]
    pub post_only: bool,
    /// OCO parent link for protective orders.
    #[serde(default)]
    pub parent_id: Option<u64>,
    /// Optional TP/SL bracket, expanded into an OCO pair.
    pub tpsl: Option<TpSl>,
}

/// Response to a successful placement.
#[derive(Debug, Serialize, Deserialize)]
pub struct PlaceOrderResponse {
    /// The accepted order.
    pub order: Order,
    /// OCO children created from `tpsl`, if any.
    pub children: Vec<Order>,
}

/// Place an order (and optionally its OCO bracket) on a session.
///
/// The bracket is atomic: if a child is rejected, the parent and any
/// already-placed sibling are cancelled and the rejection is returned.
async fn place_order(
    State(state): State<AppState>,
    Json(request): Json<PlaceOrderRequest>,
) -> Result<Json<PlaceOrderResponse>, ApiError> {
    let symbol = state
        .coins()
        .symbol_for(&request.coin)
        .ok_or_else(|| {
            ApiError::new(
                axum::http::StatusCode::BAD_REQUEST,
                "UNKNOWN_SYMBOL",
                format!("unknown coin {}", request.coin),
            )
        })?
        .to_string();
    let kind = parse_order_kind(&request.order_type)?;

    let session = state.session(request.run_id.as_deref()).await?;
    let mut session = session.lock().await;

    let order_request = OrderRequest {
        symbol,
        side: if request.is_buy {
            OrderSide::Buy
        } else {
            OrderSide::Sell
        },
        kind,
        size: request.sz,
        price: request.limit_px,
        reduce_only: request.reduce_only,
        post_only: request.post_only,
        parent_id: request.parent_id,
    };

    let now = session.runner.current_time();
    session.engine.set_time(now);
    let order = session.engine.place(&order_request)?;

    let mut children = Vec::new();
    if let Some(tpsl) = request.tpsl {
        let exit_side = order.side.opposite();
        for (kind, price) in [
            (OrderKind::TakeProfit, tpsl.take_profit),
            (OrderKind::StopLoss, tpsl.stop_loss),
        ] {
            let child_request = OrderRequest {
                symbol: order.symbol.clone(),
                side: exit_side,
                kind,
                size: order.size,
                price: Some(price),
                reduce_only: true,
                post_only: false,
                parent_id: Some(order.id),
            };
            match session.engine.place(&child_request) {
                Ok(child) => children.push(child),
                Err(e) => {
                    // Bracket is all-or-nothing; unwind what was placed.
                    for placed in &children {
                        let _ = session.engine.cancel(placed.id);
                    }
                    let _ = session.engine.cancel(order.id);
                    return Err(e.into());
                }
            }
        }
    }

    persist_session(&state, &session).await?;
    Ok(Json(PlaceOrderResponse { order, children }))
}

/// Request to cancel an order.
#[derive(Debug, Deserialize)]
pub struct CancelRequest {
    /// Run to target.
    pub run_id: Option<String>,
    /// Order id.
    pub oid: u64,
}

/// Cancel an order. Cancelling one OCO leg cancels both.
async fn cancel_order(
    State(state): State<AppState>,
    Json(request): Json<CancelRequest>,
) -> Result<Json<Order>, ApiError> {
    let session = state.session(request.run_id.as_deref()).await?;
    let mut session = session.lock().await;

    let now = session.runner.current_time();
    session.engine.set_time(now);
    session.engine.cancel(request.oid)?;

    let order = session
        .engine
        .wallet()
        .order(request.oid)
        .cloned()
        .ok_or_else(|| ApiError::not_found(format!("order {} not found", request.oid)))?;

    persist_session(&state, &session).await?;
    Ok(Json(order))
}

/// Request to modify an order.
#[derive(Debug, Deserialize)]
pub struct ModifyRequest {
    /// Run to target.
    pub run_id: Option<String>,
    /// Order id.
    pub oid: u64,
    /// Replacement price.
    pub new_price: Option<Decimal>,
    /// Replacement size.
    pub new_size: Option<Decimal>,
}

/// Replace an order's price/size under a fresh id.
async fn modify_order(
    State(state): State<AppState>,
    Json(request): Json<ModifyRequest>,
) -> Result<Json<Order>, ApiError> {
    let session = state.session(request.run_id.as_deref()).await?;
    let mut session = session.lock().await;

    let now = session.runner.current_time();
    session.engine.set_time(now);
    let order = session
        .engine
        .modify(request.oid, request.new_price, request.new_size)?;

    persist_session(&state, &session).await?;
    Ok(Json(order))
}

/// Request for the account snapshot.
#[derive(Debug, Default, Deserialize)]
pub struct InfoRequest {
    /// Run to target.
    pub run_id: Option<String>,
}

/// Account info as of the session's virtual clock.
async fn account_info(
    State(state): State<AppState>,
    Json(request): Json<InfoRequest>,
) -> Result<Json<crate::models::AccountInfo>, ApiError> {
    let session = state.session(request.run_id.as_deref()).await?;
    let session = session.lock().await;
    Ok(Json(session.engine.account_info()))
}

/// Query parameters for the indicator bundle.
#[derive(Debug, Deserialize)]
pub struct GptLatestQuery {
    /// As-of time (Unix seconds); the session clock when omitted.
    pub timestamp: Option<i64>,
}

/// Multi-timeframe indicator bundle as of a timestamp.
async fn gpt_latest(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
    Query(query): Query<GptLatestQuery>,
) -> Result<Json<IndicatorBundle>, ApiError> {
    let session = state.session(None).await?;
    let mut session = session.lock().await;

    let as_of = query.timestamp.unwrap_or(session.runner.current_time());
    let bundle = session.runner.indicator_bundle_at(&symbol, as_of)?;
    Ok(Json(bundle))
}

/// Query parameters for the news read API.
#[derive(Debug, Deserialize)]
pub struct TopNewsQuery {
    /// Only items published at or before this time (Unix seconds).
    pub before_timestamp: Option<i64>,
    /// Maximum items to return.
    pub k: Option<usize>,
}

/// Top news as of a timestamp.
async fn top_news(
    State(state): State<AppState>,
    Query(query): Query<TopNewsQuery>,
) -> Json<Vec<NewsItem>> {
    let before = query.before_timestamp.unwrap_or(i64::MAX);
    let k = query.k.unwrap_or(10);
    Json(state.news().top_news(before, k))
}

/// Request to orchestrate a full backtest run.
#[derive(Debug, Deserialize)]
pub struct OrchestrateRequest {
    /// Symbol to trade.
    pub symbol: String,
    /// Range start, ISO-8601 UTC.
    pub start_time: String,
    /// Range end, ISO-8601 UTC.
    pub end_time: String,
    /// Decision interval in hours; defaults to 4.
    pub meeting_interval_hours: Option<i64>,
    /// External strategy service; when absent each step places no orders.
    pub strategy_agent_url: Option<String>,
    /// Fee rate override.
    pub fee_rate: Option<Decimal>,
    /// Starting cash override.
    pub starting_cash: Option<Decimal>,
    /// Market fill model override.
    pub market_fill: Option<MarketFillPrice>,
    /// Engine version string for the reproducibility block.
    pub engine_version: Option<String>,
    /// Verbatim strategy configuration for the reproducibility block.
    pub strategy_config: Option<serde_json::Value>,
}

/// Envelope for backtest responses.
#[derive(Debug, Serialize, Deserialize)]
pub struct BacktestResponse {
    /// "ok" when the run produced a report.
    pub status: String,
    /// The report.
    pub response: Report,
}

#[allow(clippy::too_many_arguments)]
fn build_run_config(
    state: &AppState,
    symbol: String,
    start_time: i64,
    end_time: i64,
    interval_hours: Option<i64>,
    fee_rate: Option<Decimal>,
    starting_cash: Option<Decimal>,
    market_fill: Option<MarketFillPrice>,
    engine_version: Option<String>,
    strategy_config: Option<serde_json::Value>,
) -> RunConfig {
    let defaults = &state.config().exchange;
    let mut config = RunConfig::new(&symbol, start_time, end_time);
    if let Some(hours) = interval_hours {
        config.decision_interval = hours * 3600;
    }
    config.fee_rate = fee_rate.unwrap_or(defaults.fee_rate);
    config.starting_cash = starting_cash.unwrap_or(defaults.starting_cash);
    config.market_fill = market_fill.unwrap_or(defaults.market_fill);
    if let Some(version) = engine_version {
        config.engine_version = version;
    }
    config.strategy_config = strategy_config.unwrap_or(serde_json::Value::Null);
    config
}

/// Run a strategy-driven backtest and return its report.
async fn orchestrate(
    State(state): State<AppState>,
    Json(request): Json<OrchestrateRequest>,
) -> Result<Json<BacktestResponse>, ApiError> {
    let start_time = parse_iso("start_time", &request.start_time)?;
    let end_time = parse_iso("end_time", &request.end_time)?;

    let config = build_run_config(
        &state,
        request.symbol,
        start_time,
        end_time,
        request.meeting_interval_hours,
        request.fee_rate,
        request.starting_cash,
        request.market_fill,
        request.engine_version,
        request.strategy_config,
    );

    let strategy: Option<Arc<dyn StrategyProvider>> = match request.strategy_agent_url {
        Some(url) => {
            let timeout = Duration::from_secs(state.config().strategy.timeout_secs);
            Some(Arc::new(
                HttpStrategy::new(url, timeout).map_err(crate::orchestrator::RunError::from)?,
            ))
        }
        None => None,
    };

    let orchestrator = Orchestrator::new(
        config,
        state.candles(),
        state.news(),
        state.coins().clone(),
        strategy,
        state.store(),
    )?;

    let report = orchestrator.run().await;
    Ok(Json(BacktestResponse {
        status: "ok".to_string(),
        response: report,
    }))
}

/// Request for a matching-only run over a pre-built order script.
#[derive(Debug, Deserialize)]
pub struct BacktestRunRequest {
    /// Symbol to trade.
    pub symbol: String,
    /// Range start, ISO-8601 UTC.
    pub start_time: String,
    /// Range end, ISO-8601 UTC.
    pub end_time: String,
    /// Decision interval in seconds; defaults to one hour.
    pub step_secs: Option<i64>,
    /// Fee rate override.
    pub fee_rate: Option<Decimal>,
    /// Starting cash override.
    pub starting_cash: Option<Decimal>,
    /// Scripted decision steps.
    pub steps: Vec<ScriptedStep>,
}

/// Run matching only, over a pre-built order list.
async fn backtest_run(
    State(state): State<AppState>,
    Json(request): Json<BacktestRunRequest>,
) -> Result<Json<BacktestResponse>, ApiError> {
    let start_time = parse_iso("start_time", &request.start_time)?;
    let end_time = parse_iso("end_time", &request.end_time)?;

    let mut config = build_run_config(
        &state,
        request.symbol,
        start_time,
        end_time,
        None,
        request.fee_rate,
        request.starting_cash,
        None,
        None,
        None,
    );
    config.decision_interval = request.step_secs.unwrap_or(3600);

    let strategy: Arc<dyn StrategyProvider> = Arc::new(ScriptedStrategy::new(request.steps));
    let orchestrator = Orchestrator::new(
        config,
        state.candles(),
        state.news(),
        state.coins().clone(),
        Some(strategy),
        state.store(),
    )?;

    let report = orchestrator.run().await;
    Ok(Json(BacktestResponse {
        status: "ok".to_string(),
        response: report,
    }))
}

async fn persist_session(
    state: &AppState,
    session: &super::state::ExchangeSession,
) -> Result<(), ApiError> {
    if let Some(store) = state.store() {
        store
            .save_snapshot(&session.run_id, &session.engine.snapshot())
            .await?;
    }
    Ok(())
}
