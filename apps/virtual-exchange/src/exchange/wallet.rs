//! Virtual wallet: cash, netted positions, reservations and the trade log.
//!
//! Reservation policy is immediate: `place` debits the cash balance (or
//! commits position quantity for reduce-only orders), `cancel` refunds
//! exactly what was reserved, and a fill converts the reservation into a
//! settled cash change plus a position delta. There is no separate frozen
//! bucket: reserved funds leave the cash balance entirely, and equity counts
//! them back in.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::error::ExchangeError;
use super::trade::{BarKind, Trade};
use crate::models::{AccountInfo, CancelReason, Order, OrderSide, OrderStatus, Position};

/// The wallet: single cash balance, one netted position per symbol, the set
/// of orders and the append-only trade log.
#[derive(Debug, Clone)]
pub struct Wallet {
    cash: Decimal,
    positions: BTreeMap<String, Position>,
    orders: BTreeMap<u64, Order>,
    trades: Vec<Trade>,
    marks: BTreeMap<String, Decimal>,
}

/// Serialisable wallet state, persisted as a single blob per run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletSnapshot {
    /// Free cash balance.
    #[serde(with = "rust_decimal::serde::str")]
    pub cash: Decimal,
    /// All positions.
    pub positions: Vec<Position>,
    /// All orders, terminal ones included.
    pub orders: Vec<Order>,
    /// The full trade log.
    pub trades: Vec<Trade>,
    /// Last known mark price per symbol.
    pub marks: Vec<(String, Decimal)>,
}

impl Wallet {
    /// Create a wallet holding `starting_cash` quote currency.
    #[must_use]
    pub fn new(starting_cash: Decimal) -> Self {
        Self {
            cash: starting_cash,
            positions: BTreeMap::new(),
            orders: BTreeMap::new(),
            trades: Vec::new(),
            marks: BTreeMap::new(),
        }
    }

    /// Free cash balance.
    #[must_use]
    pub const fn cash(&self) -> Decimal {
        self.cash
    }

    /// Record the latest mark price for a symbol.
    pub fn set_mark(&mut self, symbol: &str, price: Decimal) {
        self.marks.insert(symbol.to_string(), price);
    }

    /// Last known mark price for a symbol.
    #[must_use]
    pub fn mark(&self, symbol: &str) -> Option<Decimal> {
        self.marks.get(symbol).copied()
    }

    /// Position for a symbol, if it ever traded.
    #[must_use]
    pub fn position(&self, symbol: &str) -> Option<&Position> {
        self.positions.get(symbol)
    }

    /// All positions in symbol order.
    pub fn positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    /// Look up an order by id.
    #[must_use]
    pub fn order(&self, id: u64) -> Option<&Order> {
        self.orders.get(&id)
    }

    /// All orders in id order, terminal ones included.
    pub fn orders(&self) -> impl Iterator<Item = &Order> {
        self.orders.values()
    }

    /// Orders that can still fill, in id order.
    #[must_use]
    pub fn open_orders(&self) -> Vec<&Order> {
        self.orders
            .values()
            .filter(|o| o.status.is_active())
            .collect()
    }

    /// The append-only trade log.
    #[must_use]
    pub fn trades(&self) -> &[Trade] {
        &self.trades
    }

    /// Total cash reserved by open orders.
    #[must_use]
    pub fn reserved_cash_total(&self) -> Decimal {
        self.orders
            .values()
            .filter(|o| o.status.is_active())
            .map(|o| o.reserved_cash)
            .sum()
    }

    /// Position quantity already committed by reduce-only orders on a
    /// symbol. OCO siblings guard the same exposure, so a shared parent
    /// counts once at its larger leg.
    #[must_use]
    pub fn reserved_position_total(&self, symbol: &str) -> Decimal {
        self.reduce_only_committed_with(symbol, None, Decimal::ZERO)
    }

    /// Committed reduce-only quantity if a new order of `size` under
    /// `parent` were added.
    pub(crate) fn reduce_only_committed_with(
        &self,
        symbol: &str,
        parent: Option<u64>,
        size: Decimal,
    ) -> Decimal {
        let mut grouped: BTreeMap<u64, Decimal> = BTreeMap::new();
        let mut standalone = Decimal::ZERO;

        for order in self
            .orders
            .values()
            .filter(|o| o.status.is_active() && o.symbol == symbol)
        {
            match order.parent_id {
                Some(p) => {
                    let entry = grouped.entry(p).or_default();
                    *entry = (*entry).max(order.reserved_position);
                }
                None => standalone += order.reserved_position,
            }
        }

        match parent {
            Some(p) => {
                let entry = grouped.entry(p).or_default();
                *entry = (*entry).max(size);
            }
            None => standalone += size,
        }

        standalone + grouped.values().copied().sum::<Decimal>()
    }

    /// Equity: cash plus open-order reservations plus positions at mark.
    ///
    /// Symbols without a mark fall back to their average entry price.
    #[must_use]
    pub fn equity(&self) -> Decimal {
        let positions_value: Decimal = self
            .positions
            .values()
            .map(|p| {
                let mark = self
                    .marks
                    .get(&p.symbol)
                    .copied()
                    .unwrap_or(p.avg_entry_price);
                p.value(mark)
            })
            .sum();
        self.cash + self.reserved_cash_total() + positions_value
    }

    /// Snapshot for the account-info read API.
    #[must_use]
    pub fn account_info(&self) -> AccountInfo {
        AccountInfo {
            equity: self.equity(),
            cash: self.cash,
            total_margin_used: self.reserved_cash_total(),
            positions: self.positions.values().cloned().collect(),
            open_orders: self.open_orders().into_iter().cloned().collect(),
        }
    }

    /// Debit a cash reservation.
    pub(crate) fn try_reserve_cash(&mut self, amount: Decimal) -> Result<(), ExchangeError> {
        if amount > self.cash {
            return Err(ExchangeError::InsufficientFunds {
                required: amount,
                available: self.cash,
            });
        }
        self.cash -= amount;
        Ok(())
    }

    /// Insert an accepted order. Its reservation must already be debited.
    pub(crate) fn insert_order(&mut self, order: Order) {
        self.orders.insert(order.id, order);
    }

    /// Cancel an order, refunding exactly what it reserved.
    pub(crate) fn refund_and_cancel(
        &mut self,
        id: u64,
        reason: CancelReason,
        now: i64,
    ) -> Result<(), ExchangeError> {
        let order = self
            .orders
            .get_mut(&id)
            .ok_or(ExchangeError::OrderNotFound(id))?;
        if order.is_terminal() {
            return Err(ExchangeError::AlreadyTerminal(id));
        }
        let refund = order.reserved_cash;
        order.cancel(reason, now);
        self.cash += refund;
        debug!(order_id = id, refund = %refund, reason = ?reason, "Order cancelled");
        Ok(())
    }

    /// Apply a fill: settle cash, update the position, log the trade.
    ///
    /// `fill_size` is the quantity actually filled (reduce-only orders may
    /// be capped by the engine), `bar_close` stamps the trade.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn apply_fill(
        &mut self,
        id: u64,
        fill_size: Decimal,
        price: Decimal,
        fee_rate: Decimal,
        bar_close: i64,
        bar_kind: BarKind,
    ) -> Result<(), ExchangeError> {
        let order = self
            .orders
            .get_mut(&id)
            .ok_or(ExchangeError::OrderNotFound(id))?;
        if order.is_terminal() {
            return Err(ExchangeError::Invariant(format!(
                "fill applied to terminal order {id}"
            )));
        }

        let notional = price * fill_size;
        let fee = notional * fee_rate;

        // The full reservation converts on fill; cash-reserved orders always
        // fill their entire size, reduce-only orders reserve no cash.
        let released = order.reserved_cash;
        order.reserved_cash = Decimal::ZERO;
        if order.reserved_position > Decimal::ZERO {
            order.reserved_position = (order.reserved_position - fill_size).max(Decimal::ZERO);
        }

        let side = order.side;
        let symbol = order.symbol.clone();
        order.record_fill(fill_size, price, bar_close);

        match side {
            OrderSide::Buy => self.cash += released - notional - fee,
            OrderSide::Sell => self.cash += released + notional - fee,
        }

        self.update_position(&symbol, side, fill_size, price);

        self.trades.push(Trade {
            order_id: id,
            symbol,
            side,
            size: fill_size,
            price,
            fee,
            timestamp: bar_close,
            bar_kind,
        });

        Ok(())
    }

    /// Net a fill into the position: VWAP on entries, realised PnL on exits,
    /// flipping sign when the fill exceeds the remaining position.
    fn update_position(&mut self, symbol: &str, side: OrderSide, quantity: Decimal, price: Decimal) {
        let position = self
            .positions
            .entry(symbol.to_string())
            .or_insert_with(|| Position::flat(symbol));

        let qty_change = match side {
            OrderSide::Buy => quantity,
            OrderSide::Sell => -quantity,
        };

        let old_qty = position.size;
        let same_direction = (old_qty >= Decimal::ZERO && qty_change > Decimal::ZERO)
            || (old_qty <= Decimal::ZERO && qty_change < Decimal::ZERO);

        if same_direction {
            let old_value = old_qty.abs() * position.avg_entry_price;
            let new_value = qty_change.abs() * price;
            let total_qty = old_qty.abs() + qty_change.abs();
            if total_qty > Decimal::ZERO {
                position.avg_entry_price = (old_value + new_value) / total_qty;
            }
            position.size = old_qty + qty_change;
            return;
        }

        // Exit: realise PnL on the closed quantity.
        let closed_qty = qty_change.abs().min(old_qty.abs());
        let signum = if old_qty > Decimal::ZERO {
            Decimal::ONE
        } else {
            -Decimal::ONE
        };
        position.realized_pnl += (price - position.avg_entry_price) * closed_qty * signum;

        let new_qty = old_qty + qty_change;
        if (new_qty > Decimal::ZERO) != (old_qty > Decimal::ZERO) && new_qty != Decimal::ZERO {
            // Sign flipped: the remainder is a fresh entry at the fill price.
            position.avg_entry_price = price;
        } else if new_qty == Decimal::ZERO {
            position.avg_entry_price = Decimal::ZERO;
        }
        position.size = new_qty;
    }

    /// Verify the wallet's structural invariants.
    ///
    /// # Errors
    ///
    /// Returns `ExchangeError::Invariant` on the first violation found. The
    /// run must abort and commit no further state.
    pub fn check_invariants(&self) -> Result<(), ExchangeError> {
        let mut filled_by_parent: BTreeMap<u64, u32> = BTreeMap::new();

        for order in self.orders.values() {
            if order.filled_size > order.size {
                return Err(ExchangeError::Invariant(format!(
                    "order {} overfilled: {} of {}",
                    order.id, order.filled_size, order.size
                )));
            }
            if (order.status == OrderStatus::Filled) != (order.filled_size == order.size) {
                return Err(ExchangeError::Invariant(format!(
                    "order {} status {:?} inconsistent with filled size",
                    order.id, order.status
                )));
            }
            if order.is_terminal()
                && (order.reserved_cash != Decimal::ZERO
                    || order.reserved_position != Decimal::ZERO)
            {
                return Err(ExchangeError::Invariant(format!(
                    "terminal order {} still holds reservations",
                    order.id
                )));
            }
            if order.status == OrderStatus::Filled
                && let Some(parent) = order.parent_id
            {
                *filled_by_parent.entry(parent).or_insert(0) += 1;
            }
        }

        if let Some((parent, _)) = filled_by_parent.iter().find(|(_, count)| **count > 1) {
            return Err(ExchangeError::Invariant(format!(
                "both OCO siblings of parent {parent} filled"
            )));
        }

        Ok(())
    }

    /// Append a trade directly, bypassing fill settlement. Test-only.
    #[cfg(test)]
    pub(crate) fn push_trade_for_test(&mut self, trade: Trade) {
        self.trades.push(trade);
    }

    /// Serialise the complete wallet state.
    #[must_use]
    pub fn snapshot(&self) -> WalletSnapshot {
        WalletSnapshot {
            cash: self.cash,
            positions: self.positions.values().cloned().collect(),
            orders: self.orders.values().cloned().collect(),
            trades: self.trades.clone(),
            marks: self.marks.iter().map(|(k, v)| (k.clone(), *v)).collect(),
        }
    }

    /// Restore a wallet from a snapshot, exactly as stored.
    #[must_use]
    pub fn restore(snapshot: WalletSnapshot) -> Self {
        Self {
            cash: snapshot.cash,
            positions: snapshot
                .positions
                .into_iter()
                .map(|p| (p.symbol.clone(), p))
                .collect(),
            orders: snapshot.orders.into_iter().map(|o| (o.id, o)).collect(),
            trades: snapshot.trades,
            marks: snapshot.marks.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    use super::*;
    use crate::models::{OrderKind, OrderRequest};

    fn make_request(side: OrderSide, size: Decimal, price: Decimal) -> OrderRequest {
        OrderRequest {
            symbol: "BTCUSDT".to_string(),
            side,
            kind: OrderKind::Limit,
            size,
            price: Some(price),
            reduce_only: false,
            post_only: false,
            parent_id: None,
        }
    }

    fn place_reserved(wallet: &mut Wallet, id: u64, request: &OrderRequest) {
        let mut order = Order::accept(id, request, 0);
        let reserve = request.price.unwrap_or_default() * request.size;
        wallet.try_reserve_cash(reserve).unwrap();
        order.reserved_cash = reserve;
        wallet.insert_order(order);
    }

    #[test]
    fn test_place_then_cancel_is_exact_round_trip() {
        let mut wallet = Wallet::new(dec!(10000));
        let before = wallet.snapshot();

        place_reserved(&mut wallet, 1, &make_request(OrderSide::Buy, dec!(1), dec!(100)));
        assert_eq!(wallet.cash(), dec!(9900));
        assert_eq!(wallet.equity(), dec!(10000));

        wallet.refund_and_cancel(1, CancelReason::User, 60).unwrap();
        assert_eq!(wallet.cash(), before.cash);
        assert_eq!(wallet.equity(), dec!(10000));
        assert!(wallet.trades().is_empty());
        assert!(wallet.open_orders().is_empty());
    }

    #[test]
    fn test_cancel_terminal_order_rejected() {
        let mut wallet = Wallet::new(dec!(10000));
        place_reserved(&mut wallet, 1, &make_request(OrderSide::Buy, dec!(1), dec!(100)));
        wallet.refund_and_cancel(1, CancelReason::User, 0).unwrap();

        assert_eq!(
            wallet.refund_and_cancel(1, CancelReason::User, 0),
            Err(ExchangeError::AlreadyTerminal(1))
        );
    }

    #[test]
    fn test_buy_fill_settles_cash_and_position() {
        let mut wallet = Wallet::new(dec!(10000));
        place_reserved(&mut wallet, 1, &make_request(OrderSide::Buy, dec!(1), dec!(100)));

        wallet
            .apply_fill(1, dec!(1), dec!(100), Decimal::ZERO, 60, BarKind::Intrabar)
            .unwrap();

        assert_eq!(wallet.cash(), dec!(9900));
        let position = wallet.position("BTCUSDT").unwrap();
        assert_eq!(position.size, dec!(1));
        assert_eq!(position.avg_entry_price, dec!(100));

        wallet.set_mark("BTCUSDT", dec!(104));
        assert_eq!(wallet.equity(), dec!(10004));
        assert_eq!(wallet.trades().len(), 1);
    }

    #[test]
    fn test_fee_reduces_cash() {
        let mut wallet = Wallet::new(dec!(10000));
        let request = make_request(OrderSide::Buy, dec!(1), dec!(100));
        let mut order = Order::accept(1, &request, 0);
        // Reserve including the fee, the way the engine does for buys.
        let reserve = dec!(100) * (Decimal::ONE + dec!(0.001));
        wallet.try_reserve_cash(reserve).unwrap();
        order.reserved_cash = reserve;
        wallet.insert_order(order);

        wallet
            .apply_fill(1, dec!(1), dec!(100), dec!(0.001), 60, BarKind::Intrabar)
            .unwrap();

        // 10000 - 100 - 0.1 fee
        assert_eq!(wallet.cash(), dec!(9899.9));
        let trade = &wallet.trades()[0];
        assert_eq!(trade.fee, dec!(0.1));
    }

    #[test]
    fn test_round_trip_realizes_pnl() {
        let mut wallet = Wallet::new(dec!(10000));
        place_reserved(&mut wallet, 1, &make_request(OrderSide::Buy, dec!(2), dec!(100)));
        wallet
            .apply_fill(1, dec!(2), dec!(100), Decimal::ZERO, 60, BarKind::Intrabar)
            .unwrap();

        // Sell one at 110: +10 realised.
        let sell = make_request(OrderSide::Sell, dec!(1), dec!(110));
        wallet.insert_order(Order::accept(2, &sell, 60));
        wallet
            .apply_fill(2, dec!(1), dec!(110), Decimal::ZERO, 120, BarKind::Intrabar)
            .unwrap();

        let position = wallet.position("BTCUSDT").unwrap();
        assert_eq!(position.size, dec!(1));
        assert_eq!(position.realized_pnl, dec!(10));
        assert_eq!(position.avg_entry_price, dec!(100));
    }

    #[test]
    fn test_sign_flip_resets_entry_price() {
        let mut wallet = Wallet::new(dec!(10000));
        place_reserved(&mut wallet, 1, &make_request(OrderSide::Buy, dec!(1), dec!(100)));
        wallet
            .apply_fill(1, dec!(1), dec!(100), Decimal::ZERO, 60, BarKind::Intrabar)
            .unwrap();

        // Sell 3 at 105: closes the long (+5) and opens a short of 2 at 105.
        let sell = make_request(OrderSide::Sell, dec!(3), dec!(105));
        let mut order = Order::accept(2, &sell, 60);
        let reserve = dec!(105) * dec!(3);
        wallet.try_reserve_cash(reserve).unwrap();
        order.reserved_cash = reserve;
        wallet.insert_order(order);
        wallet
            .apply_fill(2, dec!(3), dec!(105), Decimal::ZERO, 120, BarKind::Intrabar)
            .unwrap();

        let position = wallet.position("BTCUSDT").unwrap();
        assert_eq!(position.size, dec!(-2));
        assert_eq!(position.avg_entry_price, dec!(105));
        assert_eq!(position.realized_pnl, dec!(5));
    }

    #[test]
    fn test_insufficient_funds() {
        let mut wallet = Wallet::new(dec!(50));
        assert!(matches!(
            wallet.try_reserve_cash(dec!(100)),
            Err(ExchangeError::InsufficientFunds { .. })
        ));
        assert_eq!(wallet.cash(), dec!(50));
    }

    #[test]
    fn test_snapshot_restore_round_trip() {
        let mut wallet = Wallet::new(dec!(10000));
        place_reserved(&mut wallet, 1, &make_request(OrderSide::Buy, dec!(1), dec!(100)));
        wallet
            .apply_fill(1, dec!(1), dec!(100), Decimal::ZERO, 60, BarKind::BarOpen)
            .unwrap();
        wallet.set_mark("BTCUSDT", dec!(102));

        let restored = Wallet::restore(wallet.snapshot());
        assert_eq!(restored.cash(), wallet.cash());
        assert_eq!(restored.equity(), wallet.equity());
        assert_eq!(restored.trades(), wallet.trades());
    }

    #[test]
    fn test_invariant_detects_oco_double_fill() {
        let mut wallet = Wallet::new(dec!(10000));
        for id in [2u64, 3] {
            let mut request = make_request(OrderSide::Sell, dec!(1), dec!(105));
            request.parent_id = Some(1);
            let mut order = Order::accept(id, &request, 0);
            order.record_fill(dec!(1), dec!(105), 60);
            wallet.insert_order(order);
        }
        assert!(matches!(
            wallet.check_invariants(),
            Err(ExchangeError::Invariant(_))
        ));
    }

    proptest! {
        #[test]
        fn prop_place_cancel_preserves_wallet(
            size in 1u32..1000,
            price in 1u32..100_000,
        ) {
            let mut wallet = Wallet::new(dec!(1000000));
            let request = make_request(
                OrderSide::Buy,
                Decimal::from(size),
                Decimal::new(i64::from(price), 2),
            );
            let equity_before = wallet.equity();
            let cash_before = wallet.cash();

            place_reserved(&mut wallet, 1, &request);
            prop_assert_eq!(wallet.equity(), equity_before);

            wallet.refund_and_cancel(1, CancelReason::User, 0).unwrap();
            prop_assert_eq!(wallet.cash(), cash_before);
            prop_assert_eq!(wallet.equity(), equity_before);
        }
    }
}
