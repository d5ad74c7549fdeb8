//! Per-strategy risk gatekeeping.
//!
//! A single [`RiskManager`] is shared by all runners of an engine. Daily
//! counters (trades and realized losses) are keyed by strategy name inside one
//! map behind one lock. The map is cleared lazily on the first call after a
//! UTC calendar-day boundary; there is no background timer.

use std::sync::Mutex;

use ahash::AHashMap;
use algo_core::config::RiskLimits;
use algo_core::time_util::{SharedClock, trading_day};
use algo_core::{OrderRequest, Signal, SignalType, StrategyState, Trade, TradingError};
use chrono::NaiveDate;
use tracing::{debug, info};

/// Signals below this confidence are never traded.
pub const MIN_CONFIDENCE: f64 = 0.5;
/// Orders below this notional are rejected as dust.
pub const MIN_ORDER_NOTIONAL: f64 = 1.0;

#[derive(Debug, Default, Clone, Copy, PartialEq)]
struct DailyCounters {
    trades: u32,
    loss: f64,
}

struct RiskState {
    day: NaiveDate,
    counters: AHashMap<String, DailyCounters>,
}

pub struct RiskManager {
    clock: SharedClock,
    state: Mutex<RiskState>,
}

impl RiskManager {
    pub fn new(clock: SharedClock) -> Self {
        let day = trading_day(clock.now());
        Self { clock, state: Mutex::new(RiskState { day, counters: AHashMap::new() }) }
    }

    /// Lock the counters, clearing them first if the day rolled over.
    fn counters(&self) -> std::sync::MutexGuard<'_, RiskState> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let today = trading_day(self.clock.now());
        if today > state.day {
            if !state.counters.is_empty() {
                info!("[risk] new trading day {today}, clearing daily counters");
            }
            state.counters.clear();
            state.day = today;
        }
        state
    }

    /// Check `signal` against `limits` for the strategy described by `state`.
    ///
    /// Rejections are `RiskRejection` errors carrying the reason.
    pub fn check_signal(
        &self,
        signal: &Signal,
        limits: &RiskLimits,
        state: &StrategyState,
    ) -> Result<(), TradingError> {
        let reject = |reason: String| Err(TradingError::RiskRejection(reason));
        let day = self.counters().counters.get(&state.name).copied().unwrap_or_default();

        if day.trades >= limits.max_daily_trades {
            return reject(format!(
                "daily trade limit reached ({}/{})",
                day.trades, limits.max_daily_trades
            ));
        }
        if day.loss >= limits.max_daily_loss {
            return reject(format!(
                "daily loss limit reached ({:.2}/{:.2})",
                day.loss, limits.max_daily_loss
            ));
        }
        if signal.signal_type == SignalType::Buy {
            let value = signal.notional();
            if value > limits.max_position_size {
                return reject(format!(
                    "order value {value:.2} exceeds max position {:.2}",
                    limits.max_position_size
                ));
            }
            let held = state.position.quantity.max(0.0) * signal.price;
            if held + value > limits.max_position_size {
                return reject(format!(
                    "position value {:.2} would exceed max position {:.2}",
                    held + value,
                    limits.max_position_size
                ));
            }
        }
        if let Some(last) = &state.last_signal {
            let since = self.clock.now() - last.timestamp;
            if since < limits.cooldown() {
                return reject(format!(
                    "cooldown: {}s since last signal, need {}s",
                    since.num_seconds(),
                    limits.cooldown_period_sec
                ));
            }
        }
        if signal.confidence < MIN_CONFIDENCE {
            return reject(format!("confidence {:.2} below {MIN_CONFIDENCE}", signal.confidence));
        }
        Ok(())
    }

    /// Whether `signal` passes every check.
    pub fn validate_signal(
        &self,
        signal: &Signal,
        limits: &RiskLimits,
        state: &StrategyState,
    ) -> bool {
        match self.check_signal(signal, limits, state) {
            Ok(()) => true,
            Err(e) => {
                debug!("[risk] {} {} rejected: {e}", state.name, signal.signal_type);
                false
            }
        }
    }

    /// Count an executed trade and accumulate its loss, if any.
    pub fn record_trade(&self, strategy: &str, trade: &Trade) {
        let mut state = self.counters();
        let day = state.counters.entry(strategy.to_string()).or_default();
        day.trades += 1;
        if trade.pnl < 0.0 {
            day.loss += -trade.pnl;
        }
    }

    /// Whether the strategy has breached its daily loss limit, either through
    /// recorded losses or through `current_pnl`.
    pub fn should_stop_strategy(
        &self,
        strategy: &str,
        limits: &RiskLimits,
        current_pnl: f64,
    ) -> bool {
        let day = self.daily_stats(strategy);
        if day.1 >= limits.max_daily_loss {
            return true;
        }
        limits.stop_loss_percent > 0.0 && current_pnl < 0.0 && -current_pnl >= limits.max_daily_loss
    }

    /// `(trades, realized loss)` for `strategy` today.
    pub fn daily_stats(&self, strategy: &str) -> (u32, f64) {
        let day = self.counters().counters.get(strategy).copied().unwrap_or_default();
        (day.trades, day.loss)
    }

    /// Realized loss across all strategies today.
    pub fn total_daily_loss(&self) -> f64 {
        self.counters().counters.values().map(|c| c.loss).sum()
    }

    /// Half of the maximum position, in base units.
    pub fn calculate_position_size(&self, price: f64, limits: &RiskLimits) -> f64 {
        if price <= 0.0 {
            return 0.0;
        }
        limits.max_position_size / price * 0.5
    }

    /// Final sanity check on an order before submission.
    pub fn validate_order(
        &self,
        order: &OrderRequest,
        reference_price: f64,
    ) -> Result<(), TradingError> {
        if !(order.quantity.is_finite() && order.quantity > 0.0) {
            return Err(TradingError::RiskRejection(format!("invalid quantity {}", order.quantity)));
        }
        let price = order.price.unwrap_or(reference_price);
        if price > 0.0 && order.quantity * price < MIN_ORDER_NOTIONAL {
            return Err(TradingError::RiskRejection(format!(
                "order value {:.4} below minimum {MIN_ORDER_NOTIONAL}",
                order.quantity * price
            )));
        }
        Ok(())
    }
}
