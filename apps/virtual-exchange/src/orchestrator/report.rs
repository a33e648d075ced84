//! End-of-run report: per-trade rows, portfolio metrics, reproducibility.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::config::RunConfig;
use crate::exchange::Wallet;
use crate::models::{Candle, OrderKind, OrderSide};

/// Final state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    /// The run consumed its whole range.
    Completed,
    /// A fatal error ended the run early; the report is partial.
    Failed,
    /// The run was cancelled at a decision boundary.
    Cancelled,
}

/// One sample of the equity curve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EquityPoint {
    /// Sample time (Unix seconds).
    pub timestamp: i64,
    /// Equity at that time.
    #[serde(with = "rust_decimal::serde::str")]
    pub equity: Decimal,
}

/// A closed round trip reconstructed from the fill log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeSummary {
    /// First entry fill time.
    pub entry_time: i64,
    /// Time the position returned to flat.
    pub exit_time: i64,
    /// Total quantity entered over the trip.
    #[serde(with = "rust_decimal::serde::str")]
    pub qty: Decimal,
    /// Fees across every fill in the trip.
    #[serde(with = "rust_decimal::serde::str")]
    pub fees: Decimal,
    /// Slippage paid versus the model's reference price.
    #[serde(with = "rust_decimal::serde::str")]
    pub slippage: Decimal,
    /// Net PnL (after fees).
    #[serde(with = "rust_decimal::serde::str")]
    pub pnl: Decimal,
    /// PnL in initial-risk units, when a protective stop defined the risk.
    pub r_multiple: Option<Decimal>,
}

/// A non-fatal problem recorded during the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDiagnostic {
    /// Virtual time of the step.
    pub at: i64,
    /// Stable reason string.
    pub reason: String,
    /// Human-readable detail, including the intended order where relevant.
    pub detail: String,
}

/// The tuple that, together with the data hash, identifies a run's
/// expected output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reproducibility {
    /// SHA-256 over the canonicalised candle rows actually consumed.
    pub data_hash: String,
    /// Verbatim strategy configuration.
    pub strategy_config: serde_json::Value,
    /// Opaque engine version supplied by the caller.
    pub engine_version: String,
    /// Fee rate used.
    #[serde(with = "rust_decimal::serde::str")]
    pub fee_rate: Decimal,
    /// Free-form slippage model label.
    pub slippage_model: String,
}

/// The end-of-run performance report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    /// Run identifier.
    pub run_id: String,
    /// Symbol traded.
    pub symbol: String,
    /// Range start (Unix seconds).
    pub start_time: i64,
    /// Range end (Unix seconds).
    pub end_time: i64,
    /// Final run state.
    pub status: RunStatus,
    /// Failure reason when the run did not complete.
    pub failure: Option<String>,
    /// Closed round trips.
    pub trades: Vec<TradeSummary>,
    /// Equity samples, one per decision step.
    pub equity_curve: Vec<EquityPoint>,
    /// Maximum peak-to-trough drawdown as a fraction of the peak.
    #[serde(with = "rust_decimal::serde::str")]
    pub max_drawdown: Decimal,
    /// Longest time spent below a previous equity peak, in seconds.
    pub mdd_duration_secs: i64,
    /// Fraction of closed trips with positive PnL.
    #[serde(with = "rust_decimal::serde::str")]
    pub win_rate: Decimal,
    /// Average winning trip PnL.
    #[serde(with = "rust_decimal::serde::str")]
    pub avg_win: Decimal,
    /// Average losing trip PnL (positive value).
    #[serde(with = "rust_decimal::serde::str")]
    pub avg_loss: Decimal,
    /// Gross profit over gross loss; absent without losses.
    pub profit_factor: Option<Decimal>,
    /// Fraction of processed bars with a non-zero position.
    #[serde(with = "rust_decimal::serde::str")]
    pub exposure: Decimal,
    /// Total traded notional over starting equity.
    #[serde(with = "rust_decimal::serde::str")]
    pub turnover: Decimal,
    /// Per-step soft failures.
    pub diagnostics: Vec<StepDiagnostic>,
    /// Reproducibility block.
    pub reproducibility: Reproducibility,
}

/// Incremental SHA-256 over canonicalised candle rows.
///
/// A row is `symbol|close_ts|open|high|low|close|volume` with every decimal
/// at a fixed eight-decimal precision, one row per line, fed in
/// chronological order.
#[derive(Debug, Default)]
pub struct DataHasher {
    hasher: Sha256,
}

impl DataHasher {
    /// Create an empty hasher.
    #[must_use]
    pub fn new() -> Self {
        Self {
            hasher: Sha256::new(),
        }
    }

    /// Absorb one candle row.
    pub fn absorb(&mut self, symbol: &str, candle: &Candle) {
        let row = format!(
            "{}|{}|{}|{}|{}|{}|{}\n",
            symbol,
            candle.close_time,
            candle.open.round_dp(8),
            candle.high.round_dp(8),
            candle.low.round_dp(8),
            candle.close.round_dp(8),
            candle.volume.round_dp(8),
        );
        self.hasher.update(row.as_bytes());
    }

    /// Finish and hex-encode the digest.
    #[must_use]
    pub fn finish(self) -> String {
        let digest = self.hasher.finalize();
        digest.iter().map(|b| format!("{b:02x}")).collect()
    }
}

/// Maximum drawdown over an equity curve.
///
/// Returns the largest peak-to-trough fraction and the longest time spent
/// below a previous peak (including an unrecovered drawdown at the end).
#[must_use]
pub fn max_drawdown(curve: &[EquityPoint], initial_equity: Decimal, start_time: i64) -> (Decimal, i64) {
    let mut peak = initial_equity;
    let mut peak_time = start_time;
    let mut max_dd = Decimal::ZERO;
    let mut max_duration = 0i64;

    for point in curve {
        if point.equity >= peak {
            peak = point.equity;
            peak_time = point.timestamp;
        } else {
            if peak > Decimal::ZERO {
                max_dd = max_dd.max((peak - point.equity) / peak);
            }
            max_duration = max_duration.max(point.timestamp - peak_time);
        }
    }

    (max_dd, max_duration)
}

#[derive(Debug)]
struct OpenTrip {
    entry_time: i64,
    position: Decimal,
    entered_qty: Decimal,
    buy_notional: Decimal,
    sell_notional: Decimal,
    fees: Decimal,
    entry_vwap: Decimal,
    last_order_id: u64,
}

/// Reconstruct closed round trips from the wallet's fill log.
///
/// A trip opens when the position leaves zero and closes when it returns
/// (a sign flip closes one trip and opens the next at the same fill). The
/// trip's risk, and hence its r-multiple, is taken from the stop-loss
/// guarding the position where one exists.
#[must_use]
pub fn trade_summaries(wallet: &Wallet) -> Vec<TradeSummary> {
    let mut trips: Vec<TradeSummary> = Vec::new();
    let mut open: Option<OpenTrip> = None;

    for trade in wallet.trades() {
        let signed = match trade.side {
            OrderSide::Buy => trade.size,
            OrderSide::Sell => -trade.size,
        };

        let mut remaining = signed;
        let mut remaining_fee = trade.fee;

        while remaining != Decimal::ZERO {
            let mut trip_closed = false;

            match open.as_mut() {
                None => {
                    open = Some(OpenTrip {
                        entry_time: trade.timestamp,
                        position: remaining,
                        entered_qty: remaining.abs(),
                        buy_notional: if remaining > Decimal::ZERO {
                            trade.price * remaining.abs()
                        } else {
                            Decimal::ZERO
                        },
                        sell_notional: if remaining < Decimal::ZERO {
                            trade.price * remaining.abs()
                        } else {
                            Decimal::ZERO
                        },
                        fees: remaining_fee,
                        entry_vwap: trade.price,
                        last_order_id: trade.order_id,
                    });
                    remaining = Decimal::ZERO;
                }
                Some(trip) => {
                    let same_direction = (trip.position > Decimal::ZERO)
                        == (remaining > Decimal::ZERO);

                    if same_direction {
                        let add = remaining.abs();
                        let prior = trip.entered_qty;
                        trip.entry_vwap = (trip.entry_vwap * prior + trade.price * add)
                            / (prior + add);
                        trip.entered_qty += add;
                        trip.position += remaining;
                        apply_notional(trip, remaining, trade.price);
                        trip.fees += remaining_fee;
                        trip.last_order_id = trade.order_id;
                        remaining = Decimal::ZERO;
                    } else {
                        // Closing (part of) the trip.
                        let closing = remaining.abs().min(trip.position.abs());
                        let closing_signed = if remaining > Decimal::ZERO {
                            closing
                        } else {
                            -closing
                        };
                        let fee_share = if remaining.abs() > Decimal::ZERO {
                            remaining_fee * (closing / remaining.abs())
                        } else {
                            Decimal::ZERO
                        };

                        apply_notional(trip, closing_signed, trade.price);
                        trip.fees += fee_share;
                        trip.position += closing_signed;
                        trip.last_order_id = trade.order_id;
                        remaining -= closing_signed;
                        remaining_fee -= fee_share;
                        trip_closed = trip.position == Decimal::ZERO;
                    }
                }
            }

            if trip_closed
                && let Some(done) = open.take()
            {
                trips.push(close_trip(wallet, done, trade.timestamp));
            }
        }
    }

    trips
}

fn apply_notional(trip: &mut OpenTrip, signed_qty: Decimal, price: Decimal) {
    if signed_qty > Decimal::ZERO {
        trip.buy_notional += price * signed_qty;
    } else {
        trip.sell_notional += price * -signed_qty;
    }
}

fn close_trip(wallet: &Wallet, trip: OpenTrip, exit_time: i64) -> TradeSummary {
    let pnl = trip.sell_notional - trip.buy_notional - trip.fees;
    let r_multiple = stop_distance(wallet, trip.last_order_id, trip.entry_vwap)
        .map(|distance| distance * trip.entered_qty)
        .filter(|risk| *risk > Decimal::ZERO)
        .map(|risk| pnl / risk);

    TradeSummary {
        entry_time: trip.entry_time,
        exit_time,
        qty: trip.entered_qty,
        fees: trip.fees,
        slippage: Decimal::ZERO,
        pnl,
        r_multiple,
    }
}

/// Distance from entry to the protective stop tied to the exit order's OCO
/// group, when one exists.
fn stop_distance(wallet: &Wallet, exit_order_id: u64, entry_vwap: Decimal) -> Option<Decimal> {
    let exit_order = wallet.order(exit_order_id)?;
    let stop_price = if exit_order.kind == OrderKind::StopLoss {
        exit_order.price?
    } else {
        let parent = exit_order.parent_id?;
        wallet
            .orders()
            .find(|o| o.parent_id == Some(parent) && o.kind == OrderKind::StopLoss)?
            .price?
    };
    Some((entry_vwap - stop_price).abs())
}

impl Report {
    /// Assemble the report from run outputs.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn build(
        run_id: String,
        config: &RunConfig,
        wallet: &Wallet,
        equity_curve: Vec<EquityPoint>,
        diagnostics: Vec<StepDiagnostic>,
        status: RunStatus,
        failure: Option<String>,
        bars_processed: u64,
        bars_in_position: u64,
        data_hash: String,
        slippage_model: String,
    ) -> Self {
        let trades = trade_summaries(wallet);

        let winners: Vec<Decimal> = trades
            .iter()
            .filter(|t| t.pnl > Decimal::ZERO)
            .map(|t| t.pnl)
            .collect();
        let losers: Vec<Decimal> = trades
            .iter()
            .filter(|t| t.pnl < Decimal::ZERO)
            .map(|t| t.pnl.abs())
            .collect();

        let total = Decimal::from(trades.len() as u64);
        let win_rate = if trades.is_empty() {
            Decimal::ZERO
        } else {
            Decimal::from(winners.len() as u64) / total
        };
        let gross_profit: Decimal = winners.iter().sum();
        let gross_loss: Decimal = losers.iter().sum();
        let avg_win = if winners.is_empty() {
            Decimal::ZERO
        } else {
            gross_profit / Decimal::from(winners.len() as u64)
        };
        let avg_loss = if losers.is_empty() {
            Decimal::ZERO
        } else {
            gross_loss / Decimal::from(losers.len() as u64)
        };
        let profit_factor = if gross_loss > Decimal::ZERO {
            Some(gross_profit / gross_loss)
        } else {
            None
        };

        let (max_dd, mdd_duration) =
            max_drawdown(&equity_curve, config.starting_cash, config.start_time);

        let exposure = if bars_processed == 0 {
            Decimal::ZERO
        } else {
            Decimal::from(bars_in_position) / Decimal::from(bars_processed)
        };

        let traded_notional: Decimal = wallet
            .trades()
            .iter()
            .map(crate::exchange::Trade::notional)
            .sum();
        let turnover = if config.starting_cash > Decimal::ZERO {
            traded_notional / config.starting_cash
        } else {
            Decimal::ZERO
        };

        Self {
            run_id,
            symbol: config.symbol.clone(),
            start_time: config.start_time,
            end_time: config.end_time,
            status,
            failure,
            trades,
            equity_curve,
            max_drawdown: max_dd,
            mdd_duration_secs: mdd_duration,
            win_rate,
            avg_win,
            avg_loss,
            profit_factor,
            exposure,
            turnover,
            diagnostics,
            reproducibility: Reproducibility {
                data_hash,
                strategy_config: config.strategy_config.clone(),
                engine_version: config.engine_version.clone(),
                fee_rate: config.fee_rate,
                slippage_model,
            },
        }
    }
}
