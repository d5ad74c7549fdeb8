//! Property-based tests for position accounting, risk counters and drawdown.

use std::sync::Arc;

use algo_core::config::RiskLimits;
use algo_core::time_util::{Clock, ManualClock};
use algo_core::{OrderSide, Position, Signal, SignalType, StrategyState, Trade};
use algo_engine::strategy::RollingWindow;
use algo_engine::{PerformanceMetrics, RiskManager};
use chrono::{DateTime, Duration, TimeZone, Utc};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Fill {
    Buy { qty: f64, price: f64 },
    Sell { qty: f64, price: f64 },
}

/// Whole-unit quantities keep the quantity arithmetic exact.
fn fill() -> impl Strategy<Value = Fill> {
    prop_oneof![
        (1u32..10, 1.0f64..1000.0).prop_map(|(qty, price)| Fill::Buy { qty: qty as f64, price }),
        (1u32..10, 1.0f64..1000.0).prop_map(|(qty, price)| Fill::Sell { qty: qty as f64, price }),
    ]
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 3, 10, 0, 0).unwrap()
}

proptest! {
    /// Quantity never goes negative and, while open, the average price is the
    /// cost of the unclosed buys per unit held. Sells close units at the
    /// running average, so they never move it.
    #[test]
    fn position_average_tracks_unclosed_buys(fills in prop::collection::vec(fill(), 1..60)) {
        let mut position = Position::flat("BTC-USD");
        let mut open_qty = 0.0f64;
        let mut open_cost = 0.0f64;

        for f in fills {
            match f {
                Fill::Buy { qty, price } => {
                    position.apply_buy(qty, price, t0());
                    open_qty += qty;
                    open_cost += qty * price;
                }
                Fill::Sell { qty, price } => {
                    let before = position.average_price;
                    position.apply_sell(qty, price, 0.0);
                    if position.is_open() {
                        prop_assert_eq!(position.average_price, before);
                        let closed = qty.min(open_qty);
                        open_cost -= closed * (open_cost / open_qty);
                        open_qty -= closed;
                    } else {
                        open_qty = 0.0;
                        open_cost = 0.0;
                    }
                }
            }

            prop_assert!(position.quantity >= 0.0);
            if position.is_open() {
                let expected = open_cost / open_qty;
                prop_assert!((position.average_price - expected).abs() <= 1e-6 * expected);
            } else {
                prop_assert_eq!(position.average_price, 0.0);
                prop_assert!(position.open_time.is_none());
            }
        }
    }

    /// With only buys, the average equals the quantity-weighted mean exactly
    /// (up to float rounding).
    #[test]
    fn buys_give_weighted_mean(
        buys in prop::collection::vec((0.001f64..10.0, 1.0f64..1000.0), 1..40)
    ) {
        let mut position = Position::flat("ETH-USD");
        for (qty, price) in &buys {
            position.apply_buy(*qty, *price, t0());
        }
        let qty: f64 = buys.iter().map(|(q, _)| q).sum();
        let cost: f64 = buys.iter().map(|(q, p)| q * p).sum();
        prop_assert!((position.quantity - qty).abs() < 1e-9 * qty.max(1.0));
        prop_assert!((position.average_price - cost / qty).abs() < 1e-9 * (cost / qty));
    }

    /// Realized P&L of a full close is sell value minus cost basis.
    #[test]
    fn full_close_realizes_value_minus_cost(
        qty in 0.01f64..10.0,
        buy in 1.0f64..1000.0,
        sell in 1.0f64..1000.0,
        commission in 0.0f64..5.0,
    ) {
        let mut position = Position::flat("BTC-USD");
        position.apply_buy(qty, buy, t0());
        let pnl = position.apply_sell(qty * 2.0, sell, commission);
        let expected = qty * sell - qty * buy - commission;
        prop_assert!((pnl - expected).abs() < 1e-6);
        prop_assert!(!position.is_open());
    }

    /// Once the daily trade count hits the limit every signal is rejected
    /// until the next UTC day.
    #[test]
    fn trade_limit_holds_until_next_day(max_trades in 1u32..8, extra in 1u32..5, hour in 0u32..23) {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 6, 3, hour, 0, 0).unwrap());
        let risk = RiskManager::new(Arc::new(clock.clone()));
        let limits = RiskLimits {
            max_daily_trades: max_trades,
            cooldown_period_sec: 0,
            ..RiskLimits::default()
        };
        let state = StrategyState::new("s", "BTC-USD", clock.now());
        let trade = Trade {
            id: "t".into(),
            symbol: "BTC-USD".into(),
            side: OrderSide::Buy,
            quantity: 0.1,
            price: 100.0,
            timestamp: clock.now(),
            strategy_name: "s".into(),
            pnl: 0.0,
            commission: 0.0,
        };
        let signal = || Signal::new(SignalType::Sell, "BTC-USD", 100.0, 0.1, 0.9, clock.now());

        for _ in 0..max_trades {
            prop_assert!(risk.validate_signal(&signal(), &limits, &state));
            risk.record_trade("s", &trade);
        }
        for _ in 0..extra {
            clock.advance(Duration::seconds(30));
            prop_assert!(!risk.validate_signal(&signal(), &limits, &state));
        }

        clock.set(Utc.with_ymd_and_hms(2024, 6, 4, 0, 0, 0).unwrap());
        prop_assert!(risk.validate_signal(&signal(), &limits, &state));
    }

    /// Max drawdown never decreases and repeating a valuation changes nothing.
    #[test]
    fn drawdown_is_monotone_and_idempotent(
        values in prop::collection::vec(5_000.0f64..20_000.0, 1..50)
    ) {
        let clock = ManualClock::new(t0());
        let mut metrics = PerformanceMetrics::new(10_000.0, Arc::new(clock));
        let mut last = 0.0;
        for v in values {
            metrics.update_portfolio_value(v);
            let dd = metrics.max_drawdown();
            prop_assert!(dd >= last);
            metrics.update_portfolio_value(v);
            prop_assert_eq!(metrics.max_drawdown(), dd);
            last = dd;
        }
    }

    /// The rolling window never exceeds its capacity and keeps the newest
    /// samples.
    #[test]
    fn rolling_window_is_bounded(
        cap in 1usize..40,
        samples in prop::collection::vec(-1e6f64..1e6, 0..200)
    ) {
        let mut window = RollingWindow::new(cap);
        for s in &samples {
            window.push(*s);
            prop_assert!(window.len() <= cap);
        }
        prop_assert_eq!(window.len(), samples.len().min(cap));
        prop_assert_eq!(window.last(), samples.last().copied());
    }
}
