//! Pure per-candle fill predicates and pricing rules.
//!
//! These functions decide whether and where an order fills against a single
//! candle. They carry no state, which keeps the matching loop in
//! `engine.rs` auditable against the ordering contract.

use rust_decimal::Decimal;

use super::config::{EngineConfig, MarketFillPrice};
use crate::models::{Candle, OrderKind, OrderSide};

/// Fill price for a market order under the configured model.
#[must_use]
pub fn market_fill_price(candle: &Candle, config: &EngineConfig) -> Decimal {
    match config.market_fill {
        MarketFillPrice::Open => candle.open,
        MarketFillPrice::Close => candle.close,
    }
}

/// Whether a resting limit order crosses within the candle range.
///
/// A buy fills when the bar trades down to the limit (`low <= limit`), a
/// sell when it trades up to it (`high >= limit`). Boundaries are inclusive.
#[must_use]
pub fn limit_crosses(side: OrderSide, limit: Decimal, candle: &Candle) -> bool {
    match side {
        OrderSide::Buy => candle.low <= limit,
        OrderSide::Sell => candle.high >= limit,
    }
}

/// Whether a protective order's trigger crosses `[low, high]` (inclusive).
///
/// Take-profits rest on the favourable side (a long's TP sell triggers when
/// the bar trades up to it); stop-losses on the adverse side (a long's SL
/// sell triggers when the bar trades down to it).
#[must_use]
pub fn protective_triggered(
    kind: OrderKind,
    side: OrderSide,
    trigger: Decimal,
    candle: &Candle,
) -> bool {
    match (kind, side) {
        (OrderKind::TakeProfit, OrderSide::Sell) | (OrderKind::StopLoss, OrderSide::Buy) => {
            candle.high >= trigger
        }
        (OrderKind::TakeProfit, OrderSide::Buy) | (OrderKind::StopLoss, OrderSide::Sell) => {
            candle.low <= trigger
        }
        // Market and Limit orders have no trigger semantics.
        _ => false,
    }
}

/// Fill price for a triggered stop-loss: the worse of trigger and close.
///
/// Worse for a sell is the lower price, worse for a buy the higher one.
#[must_use]
pub fn stop_fill_price(side: OrderSide, trigger: Decimal, candle: &Candle) -> Decimal {
    match side {
        OrderSide::Sell => trigger.min(candle.close),
        OrderSide::Buy => trigger.max(candle.close),
    }
}

/// Whether a post-only limit would cross immediately at placement time.
///
/// Evaluated against the most recent known candle: a buy must rest strictly
/// below its low, a sell strictly above its high.
#[must_use]
pub fn post_only_crosses(side: OrderSide, limit: Decimal, last_candle: &Candle) -> bool {
    match side {
        OrderSide::Buy => limit >= last_candle.low,
        OrderSide::Sell => limit <= last_candle.high,
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;
    use test_case::test_case;

    use super::*;

    fn make_candle(open: i64, high: i64, low: i64, close: i64) -> Candle {
        Candle::minute(
            1_700_000_000,
            Decimal::new(open, 2),
            Decimal::new(high, 2),
            Decimal::new(low, 2),
            Decimal::new(close, 2),
            dec!(1000),
        )
    }

    #[test]
    fn test_market_fill_models() {
        let candle = make_candle(10000, 10100, 9900, 10050);

        let open_cfg = EngineConfig::default();
        assert_eq!(market_fill_price(&candle, &open_cfg), dec!(100));

        let close_cfg = EngineConfig {
            market_fill: MarketFillPrice::Close,
            ..Default::default()
        };
        assert_eq!(market_fill_price(&candle, &close_cfg), dec!(100.50));
    }

    #[test_case(OrderSide::Buy, dec!(99.00), true; "buy at low boundary fills")]
    #[test_case(OrderSide::Buy, dec!(98.99), false; "buy below low misses")]
    #[test_case(OrderSide::Sell, dec!(101.00), true; "sell at high boundary fills")]
    #[test_case(OrderSide::Sell, dec!(101.01), false; "sell above high misses")]
    fn test_limit_crossing(side: OrderSide, limit: Decimal, expected: bool) {
        let candle = make_candle(10000, 10100, 9900, 10050);
        assert_eq!(limit_crosses(side, limit, &candle), expected);
    }

    #[test]
    fn test_stop_loss_trigger_inclusive() {
        // Long protection: SL sell triggers when low touches the trigger.
        let candle = make_candle(10000, 10100, 9500, 9600);
        assert!(protective_triggered(
            OrderKind::StopLoss,
            OrderSide::Sell,
            dec!(95),
            &candle
        ));
        assert!(!protective_triggered(
            OrderKind::StopLoss,
            OrderSide::Sell,
            dec!(94.99),
            &candle
        ));
    }

    #[test]
    fn test_short_stop_trigger_at_high() {
        // Short protection: SL buy triggers when high touches the trigger.
        let candle = make_candle(10000, 10500, 9900, 10400);
        assert!(protective_triggered(
            OrderKind::StopLoss,
            OrderSide::Buy,
            dec!(105),
            &candle
        ));
    }

    #[test]
    fn test_take_profit_triggers() {
        let candle = make_candle(10000, 10600, 9400, 10500);
        // Long TP at 105 (sell side) triggers on high.
        assert!(protective_triggered(
            OrderKind::TakeProfit,
            OrderSide::Sell,
            dec!(105),
            &candle
        ));
        // Short TP at 95 (buy side) triggers on low.
        assert!(protective_triggered(
            OrderKind::TakeProfit,
            OrderSide::Buy,
            dec!(95),
            &candle
        ));
    }

    #[test]
    fn test_stop_fill_price_takes_worse() {
        let candle = make_candle(10000, 10100, 9300, 9400);
        // Sell stop at 95, close gapped down to 94: fills at 94.
        assert_eq!(
            stop_fill_price(OrderSide::Sell, dec!(95), &candle),
            dec!(94)
        );

        let candle_up = make_candle(10000, 10700, 9900, 10600);
        // Buy stop at 105, close ran up to 106: fills at 106.
        assert_eq!(
            stop_fill_price(OrderSide::Buy, dec!(105), &candle_up),
            dec!(106)
        );

        // Close better than trigger: fill stays at trigger.
        let mild = make_candle(10000, 10100, 9400, 9600);
        assert_eq!(stop_fill_price(OrderSide::Sell, dec!(95), &mild), dec!(95));
    }

    #[test]
    fn test_post_only_crossing() {
        let candle = make_candle(10000, 10100, 9900, 10050);
        // Buy resting strictly below the low is safe.
        assert!(!post_only_crosses(OrderSide::Buy, dec!(98.99), &candle));
        assert!(post_only_crosses(OrderSide::Buy, dec!(99), &candle));
        // Sell resting strictly above the high is safe.
        assert!(!post_only_crosses(OrderSide::Sell, dec!(101.01), &candle));
        assert!(post_only_crosses(OrderSide::Sell, dec!(101), &candle));
    }
}
