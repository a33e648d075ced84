//! Orchestrator behaviour against a real (mocked) strategy HTTP service.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use virtual_exchange::data::{InMemoryCandleSource, InMemoryNewsSource};
use virtual_exchange::models::Candle;
use virtual_exchange::orchestrator::{
    CoinMap, HttpStrategy, Orchestrator, Report, RunStatus, StrategyProvider,
};
use virtual_exchange::RunConfig;

const START: i64 = 1_700_000_100;

fn candles(minutes: i64) -> Vec<Candle> {
    (0..minutes)
        .map(|i| {
            // A gently oscillating series so limits and marks vary.
            let px = Decimal::from(100 + (i % 5));
            Candle::minute(START + i * 60, px, px + dec!(0.5), px - dec!(0.5), px, dec!(50))
        })
        .collect()
}

fn source(minutes: i64) -> InMemoryCandleSource {
    let mut source = InMemoryCandleSource::new();
    source.add_candles("BTCUSDT", candles(minutes));
    source
}

fn coin_map() -> CoinMap {
    CoinMap::from_pairs([("BTC".to_string(), "BTCUSDT".to_string())]).unwrap()
}

async fn run_against(url: &str, timeout: Duration, minutes: i64) -> Report {
    let mut config = RunConfig::new("BTCUSDT", START, START + minutes * 60);
    config.decision_interval = 300;

    let strategy: Arc<dyn StrategyProvider> =
        Arc::new(HttpStrategy::new(url, timeout).unwrap());

    let source = source(minutes);
    let orchestrator = Orchestrator::new(
        config,
        &source,
        Arc::new(InMemoryNewsSource::new()),
        coin_map(),
        Some(strategy),
        None,
    )
    .unwrap();

    orchestrator.run().await
}

#[tokio::test]
async fn identical_replies_give_identical_runs() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/decide"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "tool_calls": [{
                "tool": "placeOrder",
                "arguments": {"coin": "BTC", "is_buy": true, "sz": "0.1"}
            }]
        })))
        .mount(&server)
        .await;

    let url = format!("{}/decide", server.uri());
    let first = run_against(&url, Duration::from_secs(5), 30).await;
    let second = run_against(&url, Duration::from_secs(5), 30).await;

    assert_eq!(first.status, RunStatus::Completed);
    assert_eq!(
        first.reproducibility.data_hash,
        second.reproducibility.data_hash
    );
    assert_eq!(first.equity_curve, second.equity_curve);
    assert_eq!(first.trades, second.trades);
    // The runs actually traded: one market buy per decision step.
    assert!(first.equity_curve.last().unwrap().equity != dec!(10000));
}

#[tokio::test]
async fn timeout_step_mutates_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/decide"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_secs(5))
                .set_body_json(json!({
                    "tool_calls": [{
                        "tool": "placeOrder",
                        "arguments": {"coin": "BTC", "is_buy": true, "sz": "1"}
                    }]
                })),
        )
        .mount(&server)
        .await;

    let url = format!("{}/decide", server.uri());
    let report = run_against(&url, Duration::from_millis(100), 10).await;

    // Every step timed out: the run completes with zero trades, a flat
    // equity curve, and one timeout diagnostic per step.
    assert_eq!(report.status, RunStatus::Completed);
    assert!(report.trades.is_empty());
    for point in &report.equity_curve {
        assert_eq!(point.equity, dec!(10000));
    }
    assert!(!report.diagnostics.is_empty());
    assert!(
        report
            .diagnostics
            .iter()
            .all(|d| d.reason == "STRATEGY_TIMEOUT")
    );
}

#[tokio::test]
async fn unreachable_service_is_soft_per_step() {
    // Nothing listens on this port.
    let report = run_against(
        "http://127.0.0.1:9/decide",
        Duration::from_millis(200),
        10,
    )
    .await;

    assert_eq!(report.status, RunStatus::Completed);
    assert!(report.trades.is_empty());
    assert!(
        report
            .diagnostics
            .iter()
            .all(|d| d.reason == "STRATEGY_UNAVAILABLE" || d.reason == "STRATEGY_TIMEOUT")
    );
}

#[tokio::test]
async fn malformed_reply_is_soft_per_step() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/decide"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let url = format!("{}/decide", server.uri());
    let report = run_against(&url, Duration::from_secs(5), 10).await;

    assert_eq!(report.status, RunStatus::Completed);
    assert!(report.trades.is_empty());
    assert!(!report.diagnostics.is_empty());
}
