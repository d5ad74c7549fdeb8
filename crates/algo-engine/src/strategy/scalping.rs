//! Fast crossover scalping.
//!
//! Same crossover rule as the moving-average strategy with much shorter
//! periods and a cooldown in seconds. Trading is suppressed while the
//! coefficient of variation of the last five prices is below
//! `volatility_threshold`, to stay out of flat markets.

use algo_core::config::{StrategyConfig, StrategyKind};
use algo_core::{Metadata, PriceTick, Signal, SignalType, TradingError};
use chrono::Duration;
use serde_json::json;

use super::{
    CrossoverDetector, RollingWindow, SignalCooldown, Strategy, check_tick, period_param, size_for,
};

const MIN_NOTIONAL: f64 = 3.0;
const VOLATILITY_WINDOW: usize = 5;
/// Fraction of `max_position_size` a single scalp may use.
const POSITION_FRACTION: f64 = 0.8;

pub struct ScalpingStrategy {
    name: String,
    symbol: String,
    short_period: usize,
    long_period: usize,
    volatility_threshold: f64,
    max_position_size: f64,

    prices: RollingWindow,
    short_ma: Option<f64>,
    long_ma: Option<f64>,
    volatility: f64,
    crossover: CrossoverDetector,
    cooldown: SignalCooldown,
    last_signal: SignalType,
}

impl ScalpingStrategy {
    pub fn new(name: &str, symbol: &str) -> Self {
        Self {
            name: name.to_string(),
            symbol: symbol.to_string(),
            short_period: 3,
            long_period: 10,
            volatility_threshold: 0.001,
            max_position_size: 100.0,
            prices: RollingWindow::new(20),
            short_ma: None,
            long_ma: None,
            volatility: 0.0,
            crossover: CrossoverDetector::default(),
            cooldown: SignalCooldown::new(Duration::seconds(30)),
            last_signal: SignalType::Hold,
        }
    }

    /// Population stdev over mean of the most recent prices.
    fn relative_volatility(&self) -> f64 {
        let recent: Vec<f64> = self.prices.tail(VOLATILITY_WINDOW).collect();
        if recent.len() < 2 {
            return 0.0;
        }
        let n = recent.len() as f64;
        let mean = recent.iter().sum::<f64>() / n;
        if mean <= 0.0 {
            return 0.0;
        }
        let var = recent.iter().map(|p| (p - mean) * (p - mean)).sum::<f64>() / n;
        var.sqrt() / mean
    }
}

impl Strategy for ScalpingStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    fn symbol(&self) -> &str {
        &self.symbol
    }

    fn kind(&self) -> StrategyKind {
        StrategyKind::Scalping
    }

    fn initialize(&mut self, config: &StrategyConfig) -> Result<(), TradingError> {
        let short = period_param(config, "short_period", 3)?;
        let long = period_param(config, "long_period", 10)?;
        if short >= long {
            return Err(TradingError::Validation(format!(
                "{}: short period ({short}) must be less than long period ({long})",
                config.name
            )));
        }
        let threshold = config.param("volatility_threshold", 0.001);
        if !(threshold.is_finite() && threshold >= 0.0) {
            return Err(TradingError::Validation(format!(
                "{}: volatility threshold must be non-negative, got {threshold}",
                config.name
            )));
        }
        self.short_period = short;
        self.long_period = long;
        self.volatility_threshold = threshold;
        self.max_position_size = config.risk_limits.max_position_size;
        let cooldown_sec = config.param("signal_cooldown_sec", 30.0) as i64;
        self.cooldown.set_period(Duration::seconds(cooldown_sec));
        self.prices = RollingWindow::new((long * 2).max(VOLATILITY_WINDOW));
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
        self.volatility = self.relative_volatility();

        let signal_type = self.crossover.update(short, long);
        if signal_type == SignalType::Hold {
            return Ok(Vec::new());
        }
        if self.volatility < self.volatility_threshold {
            tracing::debug!(
                "[{}] volatility {:.6} below {:.6}, {} suppressed",
                self.name,
                self.volatility,
                self.volatility_threshold,
                signal_type
            );
            return Ok(Vec::new());
        }
        if !self.cooldown.ready(tick.timestamp) {
            return Ok(Vec::new());
        }

        let spread = (short - long).abs() / long;
        let confidence = (0.6 + spread * 15.0).min(1.0);
        let Some(quantity) = size_for(
            self.max_position_size * POSITION_FRACTION * confidence,
            tick.price,
            MIN_NOTIONAL,
        ) else {
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
        .with_meta("spread_pct", (short - long) / long * 100.0)
        .with_meta("volatility", self.volatility)
        .with_meta("strategy", "scalping");
        Ok(vec![signal])
    }

    fn state(&self) -> Metadata {
        let mut m = Metadata::new();
        m.insert("short_ma".into(), json!(self.short_ma));
        m.insert("long_ma".into(), json!(self.long_ma));
        m.insert("short_period".into(), json!(self.short_period));
        m.insert("long_period".into(), json!(self.long_period));
        m.insert("volatility".into(), json!(self.volatility));
        m.insert("volatility_threshold".into(), json!(self.volatility_threshold));
        m.insert("prices_count".into(), json!(self.prices.len()));
        m.insert("last_signal".into(), json!(self.last_signal.to_string()));
        m
    }

    fn reset(&mut self) {
        self.prices.clear();
        self.short_ma = None;
        self.long_ma = None;
        self.volatility = 0.0;
        self.crossover.reset();
        self.cooldown.reset();
        self.last_signal = SignalType::Hold;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::test_util::tick_at;

    fn strategy(threshold: f64) -> ScalpingStrategy {
        let cfg = StrategyConfig::new("doge_scalping", "DOGE-USD")
            .with_param("volatility_threshold", threshold)
            .with_limits(algo_core::config::RiskLimits {
                max_position_size: 50.0,
                ..Default::default()
            });
        let mut s = ScalpingStrategy::new(&cfg.name, &cfg.symbol);
        s.initialize(&cfg).unwrap();
        s
    }

    #[test]
    fn volatile_uptrend_buys_with_high_base_confidence() {
        let mut s = strategy(0.001);
        let mut out = Vec::new();
        for i in 0..10 {
            let tick = tick_at("DOGE-USD", 0.10 + 0.002 * i as f64, 0.0, i * 40);
            out.extend(s.evaluate(&tick).unwrap());
        }
        assert_eq!(out.len(), 1);
        let sig = &out[0];
        assert_eq!(sig.signal_type, SignalType::Buy);
        assert!(sig.confidence >= 0.6);
        assert!(sig.quantity * sig.price <= 50.0 * POSITION_FRACTION + 1e-9);
    }

    #[test]
    fn flat_market_is_filtered() {
        let mut s = strategy(0.01);
        let mut out = Vec::new();
        for i in 0..15 {
            // ~0.1 % moves
            let p = 0.10 * (1.0 + 0.001 * i as f64);
            out.extend(s.evaluate(&tick_at("DOGE-USD", p, 0.0, i * 40)).unwrap());
        }
        assert!(out.is_empty());
        assert!(s.state()["volatility"].as_f64().unwrap() < 0.01);
    }

    #[test]
    fn cooldown_is_seconds() {
        let mut s = strategy(0.0);
        for i in 0..10 {
            s.evaluate(&tick_at("DOGE-USD", 1.0 + 0.01 * i as f64, 0.0, i)).unwrap();
        }
        // Sharp drop 5s after the buy: crossover but still cooling down.
        assert!(s.evaluate(&tick_at("DOGE-USD", 0.5, 0.0, 14)).unwrap().is_empty());
        assert_eq!(s.state()["last_signal"], json!("BUY"));
    }
}
