//! The matching engine: applies the order book to candle streams.

use std::collections::BTreeMap;
use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::config::{EngineConfig, MarketFillPrice};
use super::error::ExchangeError;
use super::fills::{
    limit_crosses, market_fill_price, post_only_crosses, protective_triggered, stop_fill_price,
};
use super::trade::BarKind;
use super::wallet::{Wallet, WalletSnapshot};
use crate::models::{AccountInfo, Candle, CancelReason, Order, OrderKind, OrderRequest, OrderSide};

/// A symbol's one-minute candle feed with a consumption cursor.
#[derive(Debug, Clone)]
struct Feed {
    candles: Arc<Vec<Candle>>,
    cursor: usize,
}

impl Feed {
    fn peek(&self) -> Option<&Candle> {
        self.candles.get(self.cursor)
    }

    fn advance(&mut self) -> Option<Candle> {
        let candle = self.candles.get(self.cursor).cloned();
        if candle.is_some() {
            self.cursor += 1;
        }
        candle
    }

    /// The candle most recently consumed, if any.
    fn last_consumed(&self) -> Option<&Candle> {
        self.cursor.checked_sub(1).and_then(|i| self.candles.get(i))
    }
}

/// Serialisable engine state: the wallet blob plus replay cursors.
///
/// Candle feeds themselves are not persisted; recovery reattaches them from
/// the (read-only) candle source and restores the cursors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSnapshot {
    /// Complete wallet state.
    pub wallet: WalletSnapshot,
    /// Next order id to assign.
    pub next_order_id: u64,
    /// Engine's virtual time.
    pub current_time: i64,
    /// Feed cursor per symbol.
    pub cursors: Vec<(String, usize)>,
    /// Total candles processed.
    pub bars_processed: u64,
    /// Candles processed while holding a position.
    pub bars_in_position: u64,
}

/// Deterministic candle-driven matching engine.
///
/// The engine exclusively owns its [`Wallet`]; nothing outside mutates
/// orders or positions. All operations are synchronous with respect to the
/// virtual clock.
#[derive(Debug)]
pub struct MatchingEngine {
    config: EngineConfig,
    wallet: Wallet,
    feeds: BTreeMap<String, Feed>,
    next_order_id: u64,
    current_time: i64,
    bars_processed: u64,
    bars_in_position: u64,
}

impl MatchingEngine {
    /// Create an engine with a fresh wallet.
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        let wallet = Wallet::new(config.starting_cash);
        Self {
            config,
            wallet,
            feeds: BTreeMap::new(),
            next_order_id: 1,
            current_time: 0,
            bars_processed: 0,
            bars_in_position: 0,
        }
    }

    /// Attach a symbol's one-minute candle feed.
    ///
    /// The candles must be chronologically sorted; the engine consumes them
    /// in `advance_to`.
    pub fn add_feed(&mut self, symbol: &str, candles: Arc<Vec<Candle>>) {
        self.feeds.insert(
            symbol.to_string(),
            Feed {
                candles,
                cursor: 0,
            },
        );
    }

    /// Engine configuration.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The wallet (read-only).
    #[must_use]
    pub const fn wallet(&self) -> &Wallet {
        &self.wallet
    }

    /// Set the engine's virtual time. Placement timestamps come from here.
    pub const fn set_time(&mut self, now: i64) {
        self.current_time = now;
    }

    /// Engine's virtual time.
    #[must_use]
    pub const fn current_time(&self) -> i64 {
        self.current_time
    }

    /// Prime the mark price used for equity accounting.
    pub fn set_mark(&mut self, symbol: &str, price: Decimal) {
        self.wallet.set_mark(symbol, price);
    }

    /// Current equity.
    #[must_use]
    pub fn equity(&self) -> Decimal {
        self.wallet.equity()
    }

    /// Wallet snapshot for the account-info read API.
    #[must_use]
    pub fn account_info(&self) -> AccountInfo {
        self.wallet.account_info()
    }

    /// Total candles processed so far.
    #[must_use]
    pub const fn bars_processed(&self) -> u64 {
        self.bars_processed
    }

    /// Candles processed while a position was open.
    #[must_use]
    pub const fn bars_in_position(&self) -> u64 {
        self.bars_in_position
    }

    /// Candles consumed so far, in processing order, for the
    /// reproducibility hash.
    #[must_use]
    pub fn consumed_candles(&self) -> Vec<(&str, &Candle)> {
        let mut rows: Vec<(&str, &Candle)> = self
            .feeds
            .iter()
            .flat_map(|(symbol, feed)| {
                feed.candles[..feed.cursor]
                    .iter()
                    .map(move |candle| (symbol.as_str(), candle))
            })
            .collect();
        rows.sort_by(|a, b| (a.1.close_time, a.0).cmp(&(b.1.close_time, b.0)));
        rows
    }

    /// Validate and accept an order, debiting its reservation.
    ///
    /// # Errors
    ///
    /// `UnknownSymbol`, `InvalidOrder` or `InsufficientFunds`; the wallet is
    /// unchanged on rejection.
    pub fn place(&mut self, request: &OrderRequest) -> Result<Order, ExchangeError> {
        let feed = self
            .feeds
            .get(&request.symbol)
            .ok_or_else(|| ExchangeError::UnknownSymbol(request.symbol.clone()))?;

        if request.size <= Decimal::ZERO {
            return Err(ExchangeError::InvalidOrder(format!(
                "size must be positive, got {}",
                request.size
            )));
        }

        let mut request = request.clone();
        match request.kind {
            OrderKind::Market => {
                // A market order carries no price of its own.
                request.price = None;
            }
            _ => match request.price {
                Some(price) if price > Decimal::ZERO => {}
                _ => {
                    return Err(ExchangeError::InvalidOrder(format!(
                        "{:?} orders require a positive price",
                        request.kind
                    )));
                }
            },
        }

        if request.post_only && request.kind != OrderKind::Limit {
            return Err(ExchangeError::InvalidOrder(
                "post_only applies to limit orders only".to_string(),
            ));
        }

        if request.post_only
            && let (Some(limit), Some(last)) = (request.price, feed.last_consumed())
            && post_only_crosses(request.side, limit, last)
        {
            return Err(ExchangeError::InvalidOrder(format!(
                "post-only {:?} at {} would cross immediately",
                request.side, limit
            )));
        }

        let mut reserved_cash = Decimal::ZERO;
        let mut reserved_position = Decimal::ZERO;

        if request.reduce_only {
            if request.parent_id.is_some() {
                // An OCO child rides on its parent's acceptance: the
                // position it protects may not exist until the parent
                // fills, so the sign check happens at trigger time instead.
                reserved_position = Decimal::ZERO;
            } else {
                let position_size = self
                    .wallet
                    .position(&request.symbol)
                    .map_or(Decimal::ZERO, |p| p.size);
                let reducible = match request.side {
                    OrderSide::Sell if position_size > Decimal::ZERO => position_size,
                    OrderSide::Buy if position_size < Decimal::ZERO => -position_size,
                    _ => {
                        return Err(ExchangeError::InvalidOrder(format!(
                            "reduce-only {:?} incompatible with position {}",
                            request.side, position_size
                        )));
                    }
                };
                let committed = self.wallet.reduce_only_committed_with(
                    &request.symbol,
                    request.parent_id,
                    request.size,
                );
                if committed > reducible {
                    return Err(ExchangeError::InvalidOrder(format!(
                        "reduce-only size {} exceeds reducible position {}",
                        request.size, reducible
                    )));
                }
                reserved_position = request.size;
            }
        } else {
            let reserve_price = match request.price {
                Some(price) => price,
                None => self
                    .wallet
                    .mark(&request.symbol)
                    .or_else(|| self.feeds[&request.symbol].last_consumed().map(|c| c.close))
                    .ok_or_else(|| {
                        ExchangeError::InvalidOrder(
                            "no mark price available for market order".to_string(),
                        )
                    })?,
            };
            reserved_cash = reserve_price * request.size * (Decimal::ONE + self.config.fee_rate);
            self.wallet.try_reserve_cash(reserved_cash)?;
        }

        let id = self.next_order_id;
        self.next_order_id += 1;

        let mut order = Order::accept(id, &request, self.current_time);
        order.reserved_cash = reserved_cash;
        order.reserved_position = reserved_position;

        info!(
            order_id = id,
            symbol = %order.symbol,
            side = ?order.side,
            kind = ?order.kind,
            size = %order.size,
            "Order accepted"
        );

        self.wallet.insert_order(order.clone());
        Ok(order)
    }

    /// Cancel an order, refunding its reservation. Cancelling one leg of an
    /// OCO pair cancels both.
    ///
    /// # Errors
    ///
    /// `OrderNotFound` for unknown ids, `AlreadyTerminal` for orders that
    /// already finished.
    pub fn cancel(&mut self, id: u64) -> Result<(), ExchangeError> {
        let sibling = self.oco_sibling(id);
        self.wallet
            .refund_and_cancel(id, CancelReason::User, self.current_time)?;
        if let Some(sibling_id) = sibling {
            self.wallet
                .refund_and_cancel(sibling_id, CancelReason::Oco, self.current_time)?;
        }
        Ok(())
    }

    /// Replace an order's price and/or size.
    ///
    /// Equivalent to cancel-then-place with a fresh id; `parent_id` is
    /// preserved so OCO coupling survives the replacement.
    ///
    /// # Errors
    ///
    /// `NotModifiable` unless the order is Open or PartiallyFilled; any
    /// placement error from the replacement.
    pub fn modify(
        &mut self,
        id: u64,
        new_price: Option<Decimal>,
        new_size: Option<Decimal>,
    ) -> Result<Order, ExchangeError> {
        let order = self
            .wallet
            .order(id)
            .ok_or(ExchangeError::OrderNotFound(id))?;
        if !order.status.is_active() {
            return Err(ExchangeError::NotModifiable(id));
        }

        let request = OrderRequest {
            symbol: order.symbol.clone(),
            side: order.side,
            kind: order.kind,
            size: new_size.unwrap_or(order.size),
            price: new_price.or(order.price),
            reduce_only: order.reduce_only,
            post_only: order.post_only,
            parent_id: order.parent_id,
        };

        self.wallet
            .refund_and_cancel(id, CancelReason::Replaced, self.current_time)?;
        self.place(&request)
    }

    /// Feed every one-minute candle with `close_time <= t_next` through the
    /// matching algorithm, in strict chronological order (symbol ascending
    /// on shared timestamps).
    ///
    /// # Errors
    ///
    /// `MalformedCandle` or `Invariant`; both are fatal to the run.
    pub fn advance_to(&mut self, t_next: i64) -> Result<(), ExchangeError> {
        loop {
            let next_symbol = self
                .feeds
                .iter()
                .filter_map(|(symbol, feed)| {
                    feed.peek()
                        .filter(|c| c.close_time <= t_next)
                        .map(|c| (c.close_time, symbol.clone()))
                })
                .min()
                .map(|(_, symbol)| symbol);

            let Some(symbol) = next_symbol else { break };
            let candle = self
                .feeds
                .get_mut(&symbol)
                .and_then(Feed::advance)
                .ok_or_else(|| ExchangeError::Invariant("feed cursor out of sync".to_string()))?;

            self.process_candle(&symbol, &candle)?;
        }

        self.current_time = self.current_time.max(t_next);
        self.wallet.check_invariants()
    }

    /// Apply one candle to the book in the contractual event order.
    fn process_candle(&mut self, symbol: &str, candle: &Candle) -> Result<(), ExchangeError> {
        candle.validate()?;

        // Snapshot the orders eligible for this candle. Orders placed within
        // the candle first become eligible from the next one, which keeps
        // matching independent of when within a step they were inserted.
        let eligible: Vec<u64> = self
            .wallet
            .open_orders()
            .iter()
            .filter(|o| o.symbol == symbol && o.created_at < candle.open_time)
            .map(|o| o.id)
            .collect();

        let market_kind = match self.config.market_fill {
            MarketFillPrice::Open => BarKind::BarOpen,
            MarketFillPrice::Close => BarKind::BarClose,
        };

        // Market fills.
        for &id in &eligible {
            let Some(order) = self.wallet.order(id) else {
                continue;
            };
            if order.status.is_active() && order.kind == OrderKind::Market {
                let price = market_fill_price(candle, &self.config);
                self.fill(id, price, market_kind, candle)?;
            }
        }

        // Protective triggers, with OCO resolution.
        let mut triggered: Vec<u64> = Vec::new();
        for &id in &eligible {
            let Some(order) = self.wallet.order(id) else {
                continue;
            };
            if order.status.is_active()
                && order.kind.is_protective()
                && let Some(trigger) = order.price
                && protective_triggered(order.kind, order.side, trigger, candle)
            {
                triggered.push(id);
            }
        }
        self.drop_losing_oco_legs(&mut triggered);

        for id in triggered {
            let Some(order) = self.wallet.order(id) else {
                continue;
            };
            // The OCO sibling of an earlier fill may already be cancelled.
            if !order.status.is_active() {
                continue;
            }
            let Some(trigger) = order.price else { continue };
            let price = match order.kind {
                OrderKind::StopLoss => stop_fill_price(order.side, trigger, candle),
                _ => trigger,
            };
            self.fill(id, price, BarKind::Intrabar, candle)?;
        }

        // Limit fills.
        for &id in &eligible {
            let Some(order) = self.wallet.order(id) else {
                continue;
            };
            if order.status.is_active()
                && order.kind == OrderKind::Limit
                && let Some(limit) = order.price
                && limit_crosses(order.side, limit, candle)
            {
                self.fill(id, limit, BarKind::Intrabar, candle)?;
            }
        }

        self.wallet.set_mark(symbol, candle.close);

        self.bars_processed += 1;
        let in_position = self.wallet.positions().any(|p| !p.is_flat());
        if in_position {
            self.bars_in_position += 1;
        }

        Ok(())
    }

    /// When both siblings of an OCO pair triggered in the same candle, the
    /// take-profit wins; drop the stop-loss from the triggered set.
    fn drop_losing_oco_legs(&self, triggered: &mut Vec<u64>) {
        let mut tp_parents: Vec<u64> = Vec::new();
        for &id in triggered.iter() {
            if let Some(order) = self.wallet.order(id)
                && order.kind == OrderKind::TakeProfit
                && let Some(parent) = order.parent_id
            {
                tp_parents.push(parent);
            }
        }
        triggered.retain(|&id| {
            self.wallet.order(id).is_none_or(|order| {
                !(order.kind == OrderKind::StopLoss
                    && order.parent_id.is_some_and(|p| tp_parents.contains(&p)))
            })
        });
    }

    /// Fill an order at `price`, capping reduce-only orders at the
    /// remaining position, then cancel any OCO sibling.
    fn fill(
        &mut self,
        id: u64,
        price: Decimal,
        bar_kind: BarKind,
        candle: &Candle,
    ) -> Result<(), ExchangeError> {
        let order = self
            .wallet
            .order(id)
            .ok_or(ExchangeError::OrderNotFound(id))?;
        let remaining = order.remaining();
        let side = order.side;
        let symbol = order.symbol.clone();

        let fill_size = if order.reduce_only {
            let position_size = self
                .wallet
                .position(&symbol)
                .map_or(Decimal::ZERO, |p| p.size);
            let reducible = match side {
                OrderSide::Sell if position_size > Decimal::ZERO => position_size,
                OrderSide::Buy if position_size < Decimal::ZERO => -position_size,
                _ => Decimal::ZERO,
            };
            if reducible <= Decimal::ZERO {
                if self.wallet.order(id).is_some_and(|o| o.parent_id.is_some()) {
                    // OCO child waiting for its parent to fill: stay open.
                    return Ok(());
                }
                warn!(order_id = id, "Reduce-only order has no position left");
                self.wallet.refund_and_cancel(
                    id,
                    CancelReason::NoPosition,
                    candle.close_time,
                )?;
                return Ok(());
            }
            remaining.min(reducible)
        } else {
            remaining
        };

        self.wallet.apply_fill(
            id,
            fill_size,
            price,
            self.config.fee_rate,
            candle.close_time,
            bar_kind,
        )?;

        debug!(
            order_id = id,
            price = %price,
            size = %fill_size,
            bar_kind = ?bar_kind,
            "Order filled"
        );

        // One-cancels-other: a filled leg cancels its sibling before the
        // engine moves to the next order.
        let filled = self
            .wallet
            .order(id)
            .is_some_and(|o| o.status == crate::models::OrderStatus::Filled);
        if filled && let Some(sibling_id) = self.oco_sibling(id) {
            self.wallet
                .refund_and_cancel(sibling_id, CancelReason::Oco, candle.close_time)?;
        }

        Ok(())
    }

    /// Find the active OCO sibling of an order, if any.
    fn oco_sibling(&self, id: u64) -> Option<u64> {
        let parent = self.wallet.order(id)?.parent_id?;
        self.wallet
            .open_orders()
            .iter()
            .find(|o| o.id != id && o.parent_id == Some(parent))
            .map(|o| o.id)
    }

    /// Serialise the engine state to a snapshot blob.
    #[must_use]
    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            wallet: self.wallet.snapshot(),
            next_order_id: self.next_order_id,
            current_time: self.current_time,
            cursors: self
                .feeds
                .iter()
                .map(|(symbol, feed)| (symbol.clone(), feed.cursor))
                .collect(),
            bars_processed: self.bars_processed,
            bars_in_position: self.bars_in_position,
        }
    }

    /// Restore an engine from a snapshot, reattaching candle feeds.
    #[must_use]
    pub fn restore(
        config: EngineConfig,
        snapshot: EngineSnapshot,
        feeds: BTreeMap<String, Arc<Vec<Candle>>>,
    ) -> Self {
        let cursors: BTreeMap<String, usize> = snapshot.cursors.into_iter().collect();
        let feeds = feeds
            .into_iter()
            .map(|(symbol, candles)| {
                let cursor = cursors.get(&symbol).copied().unwrap_or(0);
                (symbol, Feed { candles, cursor })
            })
            .collect();
        Self {
            config,
            wallet: Wallet::restore(snapshot.wallet),
            feeds,
            next_order_id: snapshot.next_order_id,
            current_time: snapshot.current_time,
            bars_processed: snapshot.bars_processed,
            bars_in_position: snapshot.bars_in_position,
        }
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;
    use crate::models::OrderStatus;

    fn minute_candles(start: i64, closes: &[i64]) -> Vec<Candle> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| {
                let px = Decimal::from(close);
                Candle::minute(
                    start + (i as i64) * 60,
                    px,
                    px + dec!(0.5),
                    px - dec!(0.5),
                    px,
                    dec!(1000),
                )
            })
            .collect()
    }

    fn make_engine(candles: Vec<Candle>) -> MatchingEngine {
        let mut engine = MatchingEngine::new(EngineConfig::default());
        engine.add_feed("BTCUSDT", Arc::new(candles));
        engine
    }

    fn market_buy(size: Decimal) -> OrderRequest {
        OrderRequest {
            symbol: "BTCUSDT".to_string(),
            side: OrderSide::Buy,
            kind: OrderKind::Market,
            size,
            price: None,
            reduce_only: false,
            post_only: false,
            parent_id: None,
        }
    }

    fn limit_buy(size: Decimal, price: Decimal) -> OrderRequest {
        OrderRequest {
            symbol: "BTCUSDT".to_string(),
            side: OrderSide::Buy,
            kind: OrderKind::Limit,
            size,
            price: Some(price),
            reduce_only: false,
            post_only: false,
            parent_id: None,
        }
    }

    #[test]
    fn test_market_up_single_long() {
        // Candles closing 100..104; market buy at T0 fills at the first
        // candle's open (100) and final equity is 10,004.
        let start = 1_700_000_000;
        let mut engine = make_engine(minute_candles(start, &[100, 101, 102, 103, 104]));
        engine.set_time(start - 60);
        engine.set_mark("BTCUSDT", dec!(100));

        engine.place(&market_buy(dec!(1))).unwrap();
        engine.advance_to(start + 5 * 60).unwrap();

        let wallet = engine.wallet();
        assert_eq!(wallet.trades().len(), 1);
        assert_eq!(wallet.trades()[0].price, dec!(100));
        assert_eq!(wallet.trades()[0].bar_kind, BarKind::BarOpen);
        assert_eq!(engine.equity(), dec!(10004));
        let position = wallet.position("BTCUSDT").unwrap();
        assert_eq!(position.size, dec!(1));
    }

    #[test]
    fn test_limit_miss_leaves_order_open() {
        let start = 1_700_000_000;
        let mut engine = make_engine(minute_candles(start, &[100, 101, 102, 103, 104]));
        engine.set_time(start - 60);

        let order = engine.place(&limit_buy(dec!(1), dec!(90))).unwrap();
        engine.advance_to(start + 5 * 60).unwrap();

        let order = engine.wallet().order(order.id).unwrap();
        assert_eq!(order.status, OrderStatus::Open);
        assert!(engine.wallet().trades().is_empty());
        assert_eq!(engine.equity(), dec!(10000));
    }

    #[test]
    fn test_order_waits_for_next_candle() {
        // An order placed within a candle's time span must not participate
        // in that candle.
        let start = 1_700_000_000;
        let mut engine = make_engine(minute_candles(start, &[100, 105]));
        engine.set_time(start); // placement falls inside the first candle
        engine.set_mark("BTCUSDT", dec!(100));

        engine.place(&market_buy(dec!(1))).unwrap();
        engine.advance_to(start + 2 * 60).unwrap();

        // Fill happens on the second candle's open (105), not the first.
        assert_eq!(engine.wallet().trades()[0].price, dec!(105));
    }

    #[test]
    fn test_oco_take_profit_wins() {
        let start = 1_700_000_000;
        // Wide candle crossing both TP (105) and SL (95).
        let candle = Candle::minute(start, dec!(100), dec!(106), dec!(94), dec!(100), dec!(5000));
        let mut engine = make_engine(vec![candle]);
        engine.set_time(start - 120);
        engine.set_mark("BTCUSDT", dec!(100));

        // Open a long at 100 first.
        let parent = engine.place(&market_buy(dec!(1))).unwrap();
        // Manually settle the entry so the protective pair guards a live
        // position before the wide candle arrives.
        engine
            .wallet
            .apply_fill(parent.id, dec!(1), dec!(100), Decimal::ZERO, start - 60, BarKind::BarOpen)
            .unwrap();

        let tp = engine
            .place(&OrderRequest {
                symbol: "BTCUSDT".to_string(),
                side: OrderSide::Sell,
                kind: OrderKind::TakeProfit,
                size: dec!(1),
                price: Some(dec!(105)),
                reduce_only: true,
                post_only: false,
                parent_id: Some(parent.id),
            })
            .unwrap();
        let sl = engine
            .place(&OrderRequest {
                symbol: "BTCUSDT".to_string(),
                side: OrderSide::Sell,
                kind: OrderKind::StopLoss,
                size: dec!(1),
                price: Some(dec!(95)),
                reduce_only: true,
                post_only: false,
                parent_id: Some(parent.id),
            })
            .unwrap();

        engine.advance_to(start + 60).unwrap();

        let wallet = engine.wallet();
        let tp_order = wallet.order(tp.id).unwrap();
        let sl_order = wallet.order(sl.id).unwrap();
        assert_eq!(tp_order.status, OrderStatus::Filled);
        assert_eq!(tp_order.avg_fill_price, dec!(105));
        assert_eq!(sl_order.status, OrderStatus::Cancelled);
        assert_eq!(sl_order.cancel_reason, Some(CancelReason::Oco));

        let position = wallet.position("BTCUSDT").unwrap();
        assert!(position.is_flat());
        assert_eq!(position.realized_pnl, dec!(5));
    }

    #[test]
    fn test_stop_loss_fills_at_worse_of_trigger_and_close() {
        let start = 1_700_000_000;
        // Bar gaps down through the stop: trigger 95, close 92.
        let candle = Candle::minute(start, dec!(96), dec!(97), dec!(91), dec!(92), dec!(5000));
        let mut engine = make_engine(vec![candle]);
        engine.set_time(start - 120);
        engine.set_mark("BTCUSDT", dec!(100));

        let entry = engine.place(&market_buy(dec!(1))).unwrap();
        engine
            .wallet
            .apply_fill(entry.id, dec!(1), dec!(100), Decimal::ZERO, start - 60, BarKind::BarOpen)
            .unwrap();

        let sl = engine
            .place(&OrderRequest {
                symbol: "BTCUSDT".to_string(),
                side: OrderSide::Sell,
                kind: OrderKind::StopLoss,
                size: dec!(1),
                price: Some(dec!(95)),
                reduce_only: true,
                post_only: false,
                parent_id: None,
            })
            .unwrap();

        engine.advance_to(start + 60).unwrap();

        let order = engine.wallet().order(sl.id).unwrap();
        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(order.avg_fill_price, dec!(92));
    }

    #[test]
    fn test_stop_fill_cancels_take_profit_sibling() {
        let start = 1_700_000_000;
        // Bar touches only the stop side; trigger equals the bar low.
        let candle = Candle::minute(start, dec!(98), dec!(99), dec!(95), dec!(96), dec!(5000));
        let mut engine = make_engine(vec![candle]);
        engine.set_time(start - 120);
        engine.set_mark("BTCUSDT", dec!(100));

        let entry = engine.place(&market_buy(dec!(1))).unwrap();
        engine
            .wallet
            .apply_fill(entry.id, dec!(1), dec!(100), Decimal::ZERO, start - 60, BarKind::BarOpen)
            .unwrap();

        let tp = engine
            .place(&OrderRequest {
                symbol: "BTCUSDT".to_string(),
                side: OrderSide::Sell,
                kind: OrderKind::TakeProfit,
                size: dec!(1),
                price: Some(dec!(110)),
                reduce_only: true,
                post_only: false,
                parent_id: Some(entry.id),
            })
            .unwrap();
        let sl = engine
            .place(&OrderRequest {
                symbol: "BTCUSDT".to_string(),
                side: OrderSide::Sell,
                kind: OrderKind::StopLoss,
                size: dec!(1),
                price: Some(dec!(95)),
                reduce_only: true,
                post_only: false,
                parent_id: Some(entry.id),
            })
            .unwrap();

        engine.advance_to(start + 60).unwrap();

        let wallet = engine.wallet();
        let sl_order = wallet.order(sl.id).unwrap();
        assert_eq!(sl_order.status, OrderStatus::Filled);
        // Stop fills at the worse of trigger (95) and close (96).
        assert_eq!(sl_order.avg_fill_price, dec!(95));

        let tp_order = wallet.order(tp.id).unwrap();
        assert_eq!(tp_order.status, OrderStatus::Cancelled);
        assert_eq!(tp_order.cancel_reason, Some(CancelReason::Oco));
    }

    #[test]
    fn test_cancel_refunds_and_cancels_oco_pair() {
        let start = 1_700_000_000;
        let mut engine = make_engine(minute_candles(start, &[100]));
        engine.set_time(start - 60);
        engine.set_mark("BTCUSDT", dec!(100));

        let entry = engine.place(&market_buy(dec!(1))).unwrap();
        engine
            .wallet
            .apply_fill(entry.id, dec!(1), dec!(100), Decimal::ZERO, start - 60, BarKind::BarOpen)
            .unwrap();

        let tp = engine
            .place(&OrderRequest {
                symbol: "BTCUSDT".to_string(),
                side: OrderSide::Sell,
                kind: OrderKind::TakeProfit,
                size: dec!(1),
                price: Some(dec!(110)),
                reduce_only: true,
                post_only: false,
                parent_id: Some(entry.id),
            })
            .unwrap();
        let sl = engine
            .place(&OrderRequest {
                symbol: "BTCUSDT".to_string(),
                side: OrderSide::Sell,
                kind: OrderKind::StopLoss,
                size: dec!(1),
                price: Some(dec!(90)),
                reduce_only: true,
                post_only: false,
                parent_id: Some(entry.id),
            })
            .unwrap();

        engine.cancel(tp.id).unwrap();

        let wallet = engine.wallet();
        assert_eq!(wallet.order(tp.id).unwrap().status, OrderStatus::Cancelled);
        let sl_order = wallet.order(sl.id).unwrap();
        assert_eq!(sl_order.status, OrderStatus::Cancelled);
        assert_eq!(sl_order.cancel_reason, Some(CancelReason::Oco));
    }

    #[test]
    fn test_modify_preserves_parent_and_assigns_fresh_id() {
        let start = 1_700_000_000;
        let mut engine = make_engine(minute_candles(start, &[100]));
        engine.set_time(start - 60);

        let original = engine.place(&limit_buy(dec!(1), dec!(90))).unwrap();
        let replaced = engine
            .modify(original.id, Some(dec!(92)), None)
            .unwrap();

        assert!(replaced.id > original.id);
        assert_eq!(replaced.price, Some(dec!(92)));
        let old = engine.wallet().order(original.id).unwrap();
        assert_eq!(old.status, OrderStatus::Cancelled);
        assert_eq!(old.cancel_reason, Some(CancelReason::Replaced));
    }

    #[test]
    fn test_modify_rejects_terminal_order() {
        let start = 1_700_000_000;
        let mut engine = make_engine(minute_candles(start, &[100]));
        engine.set_time(start - 60);

        let order = engine.place(&limit_buy(dec!(1), dec!(90))).unwrap();
        engine.cancel(order.id).unwrap();

        assert_eq!(
            engine.modify(order.id, Some(dec!(91)), None),
            Err(ExchangeError::NotModifiable(order.id))
        );
    }

    #[test]
    fn test_unknown_symbol_rejected() {
        let start = 1_700_000_000;
        let mut engine = make_engine(minute_candles(start, &[100]));
        let mut request = market_buy(dec!(1));
        request.symbol = "DOGEUSDT".to_string();
        assert!(matches!(
            engine.place(&request),
            Err(ExchangeError::UnknownSymbol(_))
        ));
    }

    #[test]
    fn test_insufficient_funds_rejected() {
        let start = 1_700_000_000;
        let mut engine = make_engine(minute_candles(start, &[100]));
        engine.set_time(start - 60);
        // 10,000 starting cash cannot reserve 200 * 100.
        assert!(matches!(
            engine.place(&limit_buy(dec!(200), dec!(100))),
            Err(ExchangeError::InsufficientFunds { .. })
        ));
    }

    #[test]
    fn test_malformed_candle_is_fatal() {
        let start = 1_700_000_000;
        let mut candle = Candle::minute(start, dec!(100), dec!(99), dec!(101), dec!(100), dec!(1));
        candle.open = dec!(100);
        let mut engine = make_engine(vec![candle]);
        engine.set_time(start - 60);

        let err = engine.advance_to(start + 60).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_ids_strictly_increase() {
        let start = 1_700_000_000;
        let mut engine = make_engine(minute_candles(start, &[100]));
        engine.set_time(start - 60);

        let a = engine.place(&limit_buy(dec!(1), dec!(90))).unwrap();
        let b = engine.place(&limit_buy(dec!(1), dec!(91))).unwrap();
        let c = engine.place(&limit_buy(dec!(1), dec!(92))).unwrap();
        assert!(a.id < b.id && b.id < c.id);
    }

    #[test]
    fn test_replay_is_deterministic() {
        let start = 1_700_000_000;
        let candles = minute_candles(start, &[100, 103, 99, 104, 101, 98]);

        let run = |candles: Vec<Candle>| {
            let mut engine = make_engine(candles);
            engine.set_time(start - 60);
            engine.set_mark("BTCUSDT", dec!(100));
            engine.place(&market_buy(dec!(2))).unwrap();
            engine.place(&limit_buy(dec!(1), dec!(99))).unwrap();
            engine.advance_to(start + 6 * 60).unwrap();
            engine.wallet().trades().to_vec()
        };

        let first = run(candles.clone());
        let second = run(candles);
        assert_eq!(first, second);
    }

    #[test]
    fn test_snapshot_restore_round_trip() {
        let start = 1_700_000_000;
        let candles = minute_candles(start, &[100, 101, 102]);
        let mut engine = make_engine(candles.clone());
        engine.set_time(start - 60);
        engine.set_mark("BTCUSDT", dec!(100));
        engine.place(&market_buy(dec!(1))).unwrap();
        engine.advance_to(start + 120).unwrap();

        let snapshot = engine.snapshot();
        let mut feeds = BTreeMap::new();
        feeds.insert("BTCUSDT".to_string(), Arc::new(candles));
        let restored = MatchingEngine::restore(EngineConfig::default(), snapshot, feeds);

        assert_eq!(restored.equity(), engine.equity());
        assert_eq!(restored.wallet().trades(), engine.wallet().trades());
        assert_eq!(restored.bars_processed(), engine.bars_processed());
    }
}
