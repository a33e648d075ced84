//! Backtest orchestrator: the outer loop driving a whole run.
//!
//! The orchestrator owns one isolated `{Runner, Engine}` bundle per run.
//! It advances the virtual clock in fixed decision intervals; at each step
//! it invokes the strategy collaborator, extracts intended orders from the
//! reply's `tool_calls` channel, hands them to the engine, and lets the
//! engine chew through candles up to the next decision tick. A run is
//! single-threaded and cooperative: the engine is idle and read-only while
//! the strategy call is in flight, and cancellation takes effect at
//! decision boundaries only, never mid-candle.

mod config;
mod error;
mod report;
mod strategy;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

pub use config::{DEFAULT_DECISION_INTERVAL_SECS, RunConfig};
pub use error::{
    EXIT_BAD_INPUT, EXIT_DATA_GAP, EXIT_ENGINE_FAULT, EXIT_OK, EXIT_STRATEGY_UNREACHABLE,
    RunError,
};
pub use report::{
    DataHasher, EquityPoint, Report, Reproducibility, RunStatus, StepDiagnostic, TradeSummary,
    max_drawdown, trade_summaries,
};
pub use strategy::{
    CoinMap, EngineCommand, ExtractionIssue, HttpStrategy, ScriptedStep, ScriptedStrategy,
    StrategyError, StrategyProvider, StrategyReply, ToolCall, extract_commands,
};

use tracing::{error, info, warn};
use uuid::Uuid;

use crate::data::{CandleSource, NewsSource};
use crate::exchange::{EngineConfig, ExchangeError, MatchingEngine};
use crate::models::{OrderKind, OrderRequest, TpSl};
use crate::persistence::{SnapshotStore, StepFragment};
use crate::runner::BacktestRunner;

/// Cooperative cancellation handle. Observed at decision boundaries.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// Fresh, uncancelled flag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Drives an entire backtest run.
pub struct Orchestrator {
    config: RunConfig,
    run_id: String,
    runner: BacktestRunner,
    engine: MatchingEngine,
    coins: CoinMap,
    strategy: Option<Arc<dyn StrategyProvider>>,
    store: Option<Arc<SnapshotStore>>,
    cancel: CancelFlag,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("run_id", &self.run_id)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Initialise a run: validate the config and load the historical
    /// window. A range not fully covered by the candle source is rejected
    /// here, before any order can be accepted.
    ///
    /// # Errors
    ///
    /// `RunError::InvalidRun` for a malformed config, `RunError::Data` for
    /// coverage problems (`DataGap`) or broken candles.
    pub fn new(
        config: RunConfig,
        source: &dyn CandleSource,
        news: Arc<dyn NewsSource>,
        coins: CoinMap,
        strategy: Option<Arc<dyn StrategyProvider>>,
        store: Option<Arc<SnapshotStore>>,
    ) -> Result<Self, RunError> {
        config.validate()?;

        let symbols = vec![config.symbol.clone()];
        let runner = BacktestRunner::new(
            source,
            news,
            &symbols,
            config.start_time,
            config.end_time,
        )?;

        let mut engine = MatchingEngine::new(EngineConfig {
            fee_rate: config.fee_rate,
            market_fill: config.market_fill,
            starting_cash: config.starting_cash,
        });
        let feed = runner.candle_feed(&config.symbol).ok_or_else(|| {
            RunError::InvalidRun(format!("no feed loaded for {}", config.symbol))
        })?;
        engine.add_feed(&config.symbol, feed);

        let run_id = Uuid::new_v4().to_string();
        info!(
            run_id = %run_id,
            symbol = %config.symbol,
            start = config.start_time,
            end = config.end_time,
            decision_interval = config.decision_interval,
            "Run initialised"
        );

        Ok(Self {
            config,
            run_id,
            runner,
            engine,
            coins,
            strategy,
            store,
            cancel: CancelFlag::new(),
        })
    }

    /// This run's identifier.
    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Handle for cooperative cancellation.
    #[must_use]
    pub fn cancel_handle(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Drive the run to completion and produce the report.
    ///
    /// Per-step strategy failures are soft: logged, recorded as
    /// diagnostics, and the step proceeds with zero new orders. Fatal
    /// errors (malformed candles, invariant violations, persistence
    /// failures) end the run early with a partial report flagged `Failed`.
    pub async fn run(mut self) -> Report {
        let mut equity_curve: Vec<EquityPoint> = Vec::new();
        let mut diagnostics: Vec<StepDiagnostic> = Vec::new();
        let mut status = RunStatus::Completed;
        let mut failure: Option<String> = None;

        let symbol = self.config.symbol.clone();
        let end = self.config.end_time;
        let mut t = self.config.start_time;
        let mut step: i64 = 0;

        while t < end {
            if self.cancel.is_cancelled() {
                info!(run_id = %self.run_id, at = t, "Run cancelled at decision boundary");
                status = RunStatus::Cancelled;
                break;
            }

            if let Err(e) = self.runner.set_current_time(t) {
                let run_error = RunError::from(e);
                failure = Some(format!("{}: {run_error}", run_error.reason()));
                status = RunStatus::Failed;
                break;
            }
            self.engine.set_time(t);
            if let Some(mark) = self.runner.mark_price(&symbol) {
                self.engine.set_mark(&symbol, mark);
            }

            let mut orders_placed = 0u32;
            let mut soft_failures = 0u32;

            if let Some(strategy) = self.strategy.clone() {
                match strategy.decide(&symbol, t).await {
                    Ok(calls) => {
                        let (commands, issues) = extract_commands(&calls, &self.coins);
                        for issue in issues {
                            soft_failures += 1;
                            diagnostics.push(StepDiagnostic {
                                at: t,
                                reason: issue.code,
                                detail: format!("{}: {}", issue.tool, issue.reason),
                            });
                        }
                        for command in commands {
                            orders_placed += self.apply_command(command, t, &mut diagnostics);
                            // Snapshot after every state-changing call.
                            if let Err(e) = self.persist_snapshot().await {
                                failure = Some(format!("{}: {e}", e.reason()));
                                status = RunStatus::Failed;
                                break;
                            }
                        }
                        if status == RunStatus::Failed {
                            break;
                        }
                    }
                    Err(e) => {
                        soft_failures += 1;
                        warn!(run_id = %self.run_id, at = t, error = %e, "Strategy step failed");
                        let reason = match e {
                            StrategyError::Timeout => "STRATEGY_TIMEOUT",
                            _ => "STRATEGY_UNAVAILABLE",
                        };
                        diagnostics.push(StepDiagnostic {
                            at: t,
                            reason: reason.to_string(),
                            detail: e.to_string(),
                        });
                    }
                }
            }

            let t_next = (t + self.config.decision_interval).min(end);
            if let Err(e) = self.engine.advance_to(t_next) {
                error!(run_id = %self.run_id, at = t, error = %e, "Engine fault, aborting run");
                let run_error = RunError::from(e);
                failure = Some(format!("{}: {run_error}", run_error.reason()));
                status = RunStatus::Failed;
                break;
            }

            let equity = self.engine.equity();
            equity_curve.push(EquityPoint {
                timestamp: t_next,
                equity,
            });

            if let Err(e) = self
                .persist_step(step, t_next, equity, orders_placed, soft_failures)
                .await
            {
                error!(run_id = %self.run_id, error = %e, "Persistence failed, aborting run");
                failure = Some(format!("{}: {e}", e.reason()));
                status = RunStatus::Failed;
                break;
            }

            step += 1;
            t = t_next;
        }

        let mut hasher = DataHasher::new();
        for (candle_symbol, candle) in self.engine.consumed_candles() {
            hasher.absorb(candle_symbol, candle);
        }

        let report = Report::build(
            self.run_id.clone(),
            &self.config,
            self.engine.wallet(),
            equity_curve,
            diagnostics,
            status,
            failure,
            self.engine.bars_processed(),
            self.engine.bars_in_position(),
            hasher.finish(),
            self.engine.config().slippage_label(),
        );

        info!(
            run_id = %self.run_id,
            status = ?report.status,
            trades = report.trades.len(),
            "Run finished"
        );
        report
    }

    /// Apply one extracted command. Returns how many orders were accepted.
    /// Placement failures are annotated with the virtual time and the
    /// intended order, and never abort the run.
    fn apply_command(
        &mut self,
        command: EngineCommand,
        t: i64,
        diagnostics: &mut Vec<StepDiagnostic>,
    ) -> u32 {
        match command {
            EngineCommand::Place { request, tpsl } => {
                let parent = match self.engine.place(&request) {
                    Ok(order) => order,
                    Err(e) => {
                        self.push_rejection(diagnostics, t, &e, &request);
                        return 0;
                    }
                };
                let mut accepted = 1;

                if let Some(tpsl) = tpsl {
                    accepted += self.place_oco_children(parent.id, &request, tpsl, t, diagnostics);
                }
                accepted
            }
            EngineCommand::Cancel { id } => {
                if let Err(e) = self.engine.cancel(id) {
                    diagnostics.push(StepDiagnostic {
                        at: t,
                        reason: e.reason().to_string(),
                        detail: format!("cancel {id}: {e}"),
                    });
                }
                0
            }
        }
    }

    /// Expand a `tpsl` into the parent's OCO pair. The children are only
    /// placed because the parent was accepted; a child rejection cancels
    /// its already-placed sibling.
    fn place_oco_children(
        &mut self,
        parent_id: u64,
        parent_request: &OrderRequest,
        tpsl: TpSl,
        t: i64,
        diagnostics: &mut Vec<StepDiagnostic>,
    ) -> u32 {
        let exit_side = parent_request.side.opposite();
        let mut accepted = 0;
        let mut first_child: Option<u64> = None;

        for (kind, price) in [
            (OrderKind::TakeProfit, tpsl.take_profit),
            (OrderKind::StopLoss, tpsl.stop_loss),
        ] {
            let child = OrderRequest {
                symbol: parent_request.symbol.clone(),
                side: exit_side,
                kind,
                size: parent_request.size,
                price: Some(price),
                reduce_only: true,
                post_only: false,
                parent_id: Some(parent_id),
            };
            match self.engine.place(&child) {
                Ok(order) => {
                    accepted += 1;
                    if first_child.is_none() {
                        first_child = Some(order.id);
                    }
                }
                Err(e) => {
                    self.push_rejection(diagnostics, t, &e, &child);
                    if let Some(sibling) = first_child.take()
                        && let Err(cancel_err) = self.engine.cancel(sibling)
                    {
                        warn!(order_id = sibling, error = %cancel_err, "Orphan OCO leg cancel failed");
                    }
                }
            }
        }
        accepted
    }

    fn push_rejection(
        &self,
        diagnostics: &mut Vec<StepDiagnostic>,
        t: i64,
        error: &ExchangeError,
        intended: &OrderRequest,
    ) {
        warn!(run_id = %self.run_id, at = t, error = %error, "Order rejected");
        let intended_json =
            serde_json::to_string(intended).unwrap_or_else(|_| "<unserialisable>".to_string());
        diagnostics.push(StepDiagnostic {
            at: t,
            reason: error.reason().to_string(),
            detail: format!("{error}; intended_order={intended_json}"),
        });
    }

    async fn persist_snapshot(&self) -> Result<(), RunError> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        store
            .save_snapshot(&self.run_id, &self.engine.snapshot())
            .await
            .map_err(|e| RunError::Persistence(e.to_string()))
    }

    async fn persist_step(
        &self,
        step: i64,
        at: i64,
        equity: rust_decimal::Decimal,
        orders_placed: u32,
        soft_failures: u32,
    ) -> Result<(), RunError> {
        self.persist_snapshot().await?;
        let Some(store) = &self.store else {
            return Ok(());
        };
        store
            .append_fragment(
                &self.run_id,
                &StepFragment {
                    step,
                    at,
                    equity,
                    orders_placed,
                    soft_failures,
                },
            )
            .await
            .map_err(|e| RunError::Persistence(e.to_string()))?;
        Ok(())
    }
}
