//! Strategy collaborator port and tool-call extraction.
//!
//! The external strategy service is a message peer, never a shared-memory
//! collaborator: it returns a structured reply naming intended actions, and
//! only the extraction below turns those into engine calls. The service is
//! not trusted to mutate the wallet directly.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::models::{OrderKind, OrderRequest, OrderSide, TpSl};

/// One tool invocation from a strategy reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Tool name; only `placeOrder` and `cancelOrder` produce engine calls.
    pub tool: String,
    /// Tool arguments, shape depending on the tool.
    #[serde(default)]
    pub arguments: serde_json::Value,
}

/// The structured strategy reply. Unknown fields are ignored; intended
/// trading actions live in the `tool_calls` channel.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StrategyReply {
    /// Declared tool invocations, in declaration order.
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
}

/// Per-step soft failures from the strategy collaborator.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StrategyError {
    /// The call exceeded its bounded timeout.
    #[error("strategy call timed out")]
    Timeout,

    /// The service was unreachable or returned a failure status.
    #[error("strategy unavailable: {0}")]
    Unavailable(String),

    /// The reply could not be parsed.
    #[error("malformed strategy reply: {0}")]
    Malformed(String),
}

/// Source of per-step strategy decisions.
#[async_trait]
pub trait StrategyProvider: Send + Sync {
    /// Ask for decisions as of `backtest_timestamp`. The timestamp is
    /// passed explicitly on every call, so concurrent runs can never
    /// interfere through service-side session state.
    async fn decide(
        &self,
        symbol: &str,
        backtest_timestamp: i64,
    ) -> Result<Vec<ToolCall>, StrategyError>;
}

#[derive(Debug, Serialize)]
struct StrategyRequest<'a> {
    symbol: &'a str,
    backtest_timestamp: i64,
}

/// HTTP strategy client with a bounded per-call timeout.
#[derive(Debug, Clone)]
pub struct HttpStrategy {
    client: reqwest::Client,
    url: String,
}

impl HttpStrategy {
    /// Build a client for `url` with the given call timeout.
    ///
    /// # Errors
    ///
    /// `StrategyError::Unavailable` when the HTTP client cannot be built.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, StrategyError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StrategyError::Unavailable(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl StrategyProvider for HttpStrategy {
    async fn decide(
        &self,
        symbol: &str,
        backtest_timestamp: i64,
    ) -> Result<Vec<ToolCall>, StrategyError> {
        let request = StrategyRequest {
            symbol,
            backtest_timestamp,
        };

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    StrategyError::Timeout
                } else {
                    StrategyError::Unavailable(e.to_string())
                }
            })?;

        let response = response
            .error_for_status()
            .map_err(|e| StrategyError::Unavailable(e.to_string()))?;

        let reply: StrategyReply = response
            .json()
            .await
            .map_err(|e| StrategyError::Malformed(e.to_string()))?;

        debug!(
            symbol = %symbol,
            backtest_timestamp,
            tool_calls = reply.tool_calls.len(),
            "Strategy reply received"
        );

        Ok(reply.tool_calls)
    }
}

/// A pre-scripted decision step, used by the matching-only entry point and
/// by tests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptedStep {
    /// Virtual time at which these calls become due (Unix seconds).
    pub at: i64,
    /// Tool calls to apply.
    pub tool_calls: Vec<ToolCall>,
}

/// Strategy provider replaying a fixed script. Each step is handed out
/// once, as soon as the clock reaches its `at` time.
#[derive(Debug)]
pub struct ScriptedStrategy {
    steps: Vec<ScriptedStep>,
    cursor: Mutex<usize>,
}

impl ScriptedStrategy {
    /// Create from steps sorted by `at` ascending.
    #[must_use]
    pub fn new(mut steps: Vec<ScriptedStep>) -> Self {
        steps.sort_by_key(|s| s.at);
        Self {
            steps,
            cursor: Mutex::new(0),
        }
    }
}

#[async_trait]
impl StrategyProvider for ScriptedStrategy {
    async fn decide(
        &self,
        _symbol: &str,
        backtest_timestamp: i64,
    ) -> Result<Vec<ToolCall>, StrategyError> {
        let mut cursor = self
            .cursor
            .lock()
            .map_err(|_| StrategyError::Unavailable("script cursor poisoned".to_string()))?;

        let mut calls = Vec::new();
        while let Some(step) = self.steps.get(*cursor) {
            if step.at > backtest_timestamp {
                break;
            }
            calls.extend(step.tool_calls.iter().cloned());
            *cursor += 1;
        }
        Ok(calls)
    }
}

/// Injective base-asset ("coin") to symbol mapping.
#[derive(Debug, Clone, Default)]
pub struct CoinMap {
    map: BTreeMap<String, String>,
}

impl CoinMap {
    /// Build from coin/symbol pairs.
    ///
    /// # Errors
    ///
    /// Returns the offending symbol when two coins map to it (the mapping
    /// must be injective).
    pub fn from_pairs<I>(pairs: I) -> Result<Self, String>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut map = BTreeMap::new();
        let mut seen = BTreeMap::new();
        for (coin, symbol) in pairs {
            if let Some(previous) = seen.insert(symbol.clone(), coin.clone()) {
                return Err(format!(
                    "symbol {symbol} mapped from both {previous} and {coin}"
                ));
            }
            map.insert(coin, symbol);
        }
        Ok(Self { map })
    }

    /// Resolve a coin to its symbol.
    #[must_use]
    pub fn symbol_for(&self, coin: &str) -> Option<&str> {
        self.map.get(coin).map(String::as_str)
    }

    /// All symbols in the map.
    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.map.values().map(String::as_str)
    }
}

/// An engine call extracted from a strategy reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCommand {
    /// Place an order, optionally bracketed by an OCO pair.
    Place {
        /// The parent order request.
        request: OrderRequest,
        /// TP/SL pair to attach once the parent is accepted.
        tpsl: Option<TpSl>,
    },
    /// Cancel an order by id.
    Cancel {
        /// Order id.
        id: u64,
    },
}

/// A tool call that could not be turned into an engine command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionIssue {
    /// The offending tool name.
    pub tool: String,
    /// Stable code ("UNKNOWN_SYMBOL" or "INVALID_TOOL_CALL").
    pub code: String,
    /// Why it was dropped.
    pub reason: String,
}

#[derive(Debug, Deserialize)]
struct PlaceOrderArgs {
    coin: String,
    is_buy: bool,
    sz: Decimal,
    limit_px: Option<Decimal>,
    #[serde(default)]
    reduce_only: bool,
    #[serde(default)]
    post_only: bool,
    tpsl: Option<TpSl>,
}

#[derive(Debug, Deserialize)]
struct CancelOrderArgs {
    oid: u64,
}

/// Turn tool calls into engine commands, in declaration order.
///
/// Only `placeOrder` and `cancelOrder` act; other tools are ignored.
/// Unknown coins and unparsable arguments become issues rather than
/// commands.
#[must_use]
pub fn extract_commands(
    calls: &[ToolCall],
    coins: &CoinMap,
) -> (Vec<EngineCommand>, Vec<ExtractionIssue>) {
    let mut commands = Vec::new();
    let mut issues = Vec::new();

    for call in calls {
        match call.tool.as_str() {
            "placeOrder" => match serde_json::from_value::<PlaceOrderArgs>(call.arguments.clone())
            {
                Ok(args) => {
                    let Some(symbol) = coins.symbol_for(&args.coin) else {
                        warn!(coin = %args.coin, "Unknown coin in placeOrder");
                        issues.push(ExtractionIssue {
                            tool: call.tool.clone(),
                            code: "UNKNOWN_SYMBOL".to_string(),
                            reason: format!("unknown coin {}", args.coin),
                        });
                        continue;
                    };

                    let kind = if args.limit_px.is_some() {
                        OrderKind::Limit
                    } else {
                        OrderKind::Market
                    };
                    commands.push(EngineCommand::Place {
                        request: OrderRequest {
                            symbol: symbol.to_string(),
                            side: if args.is_buy {
                                OrderSide::Buy
                            } else {
                                OrderSide::Sell
                            },
                            kind,
                            size: args.sz,
                            price: args.limit_px,
                            reduce_only: args.reduce_only,
                            post_only: args.post_only,
                            parent_id: None,
                        },
                        tpsl: args.tpsl,
                    });
                }
                Err(e) => issues.push(ExtractionIssue {
                    tool: call.tool.clone(),
                    code: "INVALID_TOOL_CALL".to_string(),
                    reason: format!("bad arguments: {e}"),
                }),
            },
            "cancelOrder" => match serde_json::from_value::<CancelOrderArgs>(call.arguments.clone())
            {
                Ok(args) => commands.push(EngineCommand::Cancel { id: args.oid }),
                Err(e) => issues.push(ExtractionIssue {
                    tool: call.tool.clone(),
                    code: "INVALID_TOOL_CALL".to_string(),
                    reason: format!("bad arguments: {e}"),
                }),
            },
            other => {
                debug!(tool = %other, "Ignoring non-trading tool call");
            }
        }
    }

    (commands, issues)
}
