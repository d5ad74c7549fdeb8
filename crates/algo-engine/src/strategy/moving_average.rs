//! Simple moving-average crossover.
//!
//! Buy when the short SMA crosses above the long SMA, sell on the reverse
//! crossover. Confidence grows with the relative spread between the two
//! averages: `0.5 + 10 * |short - long| / long`, capped at 1.0. Ticks that
//! carry volume below `min_volume` never trigger a signal.

use algo_core::config::{StrategyConfig, StrategyKind};
use algo_core::{Metadata, PriceTick, Signal, SignalType, TradingError};
use chrono::Duration;
use serde_json::json;

use super::{
    CrossoverDetector, RollingWindow, SignalCooldown, Strategy, check_tick, period_param, size_for,
};

const MIN_NOTIONAL: f64 = 5.0;

pub struct MovingAverageStrategy {
    name: String,
    symbol: String,
    short_period: usize,
    long_period: usize,
    min_volume: f64,
    max_position_size: f64,

    prices: RollingWindow,
    short_ma: Option<f64>,
    long_ma: Option<f64>,
    crossover: CrossoverDetector,
    cooldown: SignalCooldown,
    last_signal: SignalType,
}

impl MovingAverageStrategy {
    pub fn new(name: &str, symbol: &str) -> Self {
        Self {
            name: name.to_string(),
            symbol: symbol.to_string(),
            short_period: 5,
            long_period: 20,
            min_volume: 1000.0,
            max_position_size: 100.0,
            prices: RollingWindow::new(40),
            short_ma: None,
            long_ma: None,
            crossover: CrossoverDetector::default(),
            cooldown: SignalCooldown::new(Duration::minutes(5)),
            last_signal: SignalType::Hold,
        }
    }
}

impl Strategy for MovingAverageStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    fn symbol(&self) -> &str {
        &self.symbol
    }

    fn kind(&self) -> StrategyKind {
        StrategyKind::MovingAverage
    }

    fn initialize(&mut self, config: &StrategyConfig) -> Result<(), TradingError> {
        let short = period_param(config, "short_period", 5)?;
        let long = period_param(config, "long_period", 20)?;
        if short >= long {
            return Err(TradingError::Validation(format!(
                "{}: short period ({short}) must be less than long period ({long})",
                config.name
            )));
        }
        if short < 2 {
            return Err(TradingError::Validation(format!(
                "{}: periods must be at least 2",
                config.name
            )));
        }
        self.short_period = short;
        self.long_period = long;
        self.min_volume = config.param("min_volume", 1000.0);
        self.max_position_size = config.risk_limits.max_position_size;
        let cooldown_sec = config.param("signal_cooldown_sec", 300.0) as i64;
        self.cooldown.set_period(Duration::seconds(cooldown_sec));
        self.prices = RollingWindow::new(long * 2);
        self.reset();
        Ok(())
    }

    fn evaluate(&mut self, tick: &PriceTick) -> Result<Vec<Signal>, TradingError> {
        check_tick(&self.name, tick)?;
        self.prices.push(tick.price);

        let (Some(short), Some(long)) =
            (self.prices.mean_last(self.short_period), self.prices.mean_last(self.long_period))
        else {
            return Ok(Vec::new());
        };
        self.short_ma = Some(short);
        self.long_ma = Some(long);

        let signal_type = self.crossover.update(short, long);
        if signal_type == SignalType::Hold || !self.cooldown.ready(tick.timestamp) {
            return Ok(Vec::new());
        }
        // Feeds without volume data report 0 and are not filtered.
        if tick.volume > 0.0 && tick.volume < self.min_volume {
            return Ok(Vec::new());
        }

        let spread = (short - long).abs() / long;
        let confidence = (0.5 + spread * 10.0).min(1.0);
        let Some(quantity) =
            size_for(self.max_position_size * confidence, tick.price, MIN_NOTIONAL)
        else {
            return Ok(Vec::new());
        };

        self.cooldown.mark(tick.timestamp);
        self.last_signal = signal_type;
        let signal = Signal::new(
            signal_type,
            &self.symbol,
            tick.price,
            quantity,
            confidence,
            tick.timestamp,
        )
        .with_meta("short_ma", short)
        .with_meta("long_ma", long)
        .with_meta("spread", short - long)
        .with_meta("spread_pct", (short - long) / long * 100.0)
        .with_meta("strategy", "moving_average");
        Ok(vec![signal])
    }

    fn state(&self) -> Metadata {
        let mut m = Metadata::new();
        m.insert("short_ma".into(), json!(self.short_ma));
        m.insert("long_ma".into(), json!(self.long_ma));
        m.insert("short_period".into(), json!(self.short_period));
        m.insert("long_period".into(), json!(self.long_period));
        m.insert("min_volume".into(), json!(self.min_volume));
        m.insert("prices_count".into(), json!(self.prices.len()));
        m.insert("last_signal".into(), json!(self.last_signal.to_string()));
        m
    }

    fn reset(&mut self) {
        self.prices.clear();
        self.short_ma = None;
        self.long_ma = None;
        self.crossover.reset();
        self.cooldown.reset();
        self.last_signal = SignalType::Hold;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::test_util::tick_at;

    fn strategy() -> MovingAverageStrategy {
        let cfg = StrategyConfig::new("btc_moving_average", "BTC-USD")
            .with_param("short_period", 5.0)
            .with_param("long_period", 20.0);
        let mut s = MovingAverageStrategy::new(&cfg.name, &cfg.symbol);
        s.initialize(&cfg).unwrap();
        s
    }

    #[test]
    fn rising_prices_buy_once_history_is_full() {
        let mut s = strategy();
        let mut fired = Vec::new();
        for i in 0..=25 {
            let tick = tick_at("BTC-USD", 100.0 + i as f64, 0.0, i * 60);
            for sig in s.evaluate(&tick).unwrap() {
                fired.push((i + 1, sig));
            }
        }
        assert_eq!(fired.len(), 1);
        let (tick_no, sig) = &fired[0];
        assert_eq!(*tick_no, 20);
        assert_eq!(sig.signal_type, SignalType::Buy);
        assert!(sig.confidence > 0.5 && sig.confidence <= 1.0);
        assert!(sig.quantity * sig.price <= 100.0 + 1e-9);
        assert!(sig.metadata.contains_key("short_ma"));
    }

    #[test]
    fn reverse_crossover_sells_after_cooldown() {
        let mut s = strategy();
        let mut t = 0;
        let mut feed = |s: &mut MovingAverageStrategy, p: f64| {
            t += 600;
            s.evaluate(&tick_at("BTC-USD", p, 0.0, t)).unwrap()
        };
        for i in 0..20 {
            feed(&mut s, 100.0 + i as f64);
        }
        let mut sells = 0;
        for i in 0..10 {
            sells += feed(&mut s, 90.0 - i as f64)
                .iter()
                .filter(|sig| sig.signal_type == SignalType::Sell)
                .count();
        }
        assert_eq!(sells, 1);
    }

    #[test]
    fn cooldown_suppresses_rapid_flip() {
        let mut s = strategy();
        for i in 0..20 {
            s.evaluate(&tick_at("BTC-USD", 100.0 + i as f64, 0.0, i)).unwrap();
        }
        let out = s.evaluate(&tick_at("BTC-USD", 10.0, 0.0, 21)).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn rejects_bad_periods() {
        let mut s = MovingAverageStrategy::new("m", "X");
        let cfg = StrategyConfig::new("m", "X")
            .with_param("short_period", 1.0)
            .with_param("long_period", 3.0);
        assert!(s.initialize(&cfg).is_err());
        let cfg = StrategyConfig::new("m", "X").with_param("short_period", 2.5);
        assert!(s.initialize(&cfg).is_err());
    }

    #[test]
    fn stop_clears_history() {
        let mut s = strategy();
        for i in 0..10 {
            s.evaluate(&tick_at("BTC-USD", 100.0, 0.0, i)).unwrap();
        }
        s.stop();
        assert_eq!(s.state()["prices_count"], json!(0));
    }
}
