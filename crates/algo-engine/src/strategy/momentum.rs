//! Rate-of-change momentum with volume confirmation.
//!
//! `momentum = (p_now - p_lookback) / p_lookback`. A move beyond
//! `momentum_threshold` in either direction triggers a signal when the tick's
//! volume exceeds `volume_multiplier` times the lookback average. Confidence
//! `0.5 + 5 * |momentum|` (capped at 1.0) is damped by the stdev of recent
//! returns. A signal is only emitted when it differs from the previous one.

use algo_core::config::{StrategyConfig, StrategyKind};
use algo_core::{Metadata, PriceTick, Signal, SignalType, TradingError};
use chrono::Duration;
use serde_json::json;

use super::{
    RollingWindow, SignalCooldown, Strategy, check_tick, period_param, sample_stdev, size_for,
};

const MIN_NOTIONAL: f64 = 10.0;

pub struct MomentumStrategy {
    name: String,
    symbol: String,
    lookback: usize,
    threshold: f64,
    volume_multiplier: f64,
    max_position_size: f64,

    prices: RollingWindow,
    volumes: RollingWindow,
    returns: RollingWindow,
    momentum: f64,
    volatility: f64,
    avg_volume: f64,
    cooldown: SignalCooldown,
    last_signal: SignalType,
}

impl MomentumStrategy {
    pub fn new(name: &str, symbol: &str) -> Self {
        Self {
            name: name.to_string(),
            symbol: symbol.to_string(),
            lookback: 10,
            threshold: 0.02,
            volume_multiplier: 1.5,
            max_position_size: 100.0,
            prices: RollingWindow::new(20),
            volumes: RollingWindow::new(20),
            returns: RollingWindow::new(20),
            momentum: 0.0,
            volatility: 0.0,
            avg_volume: 0.0,
            cooldown: SignalCooldown::new(Duration::minutes(2)),
            last_signal: SignalType::Hold,
        }
    }

    fn update_indicators(&mut self) {
        let n = self.lookback;
        if self.prices.len() < n {
            return;
        }
        if let (Some(now), Some(past)) = (self.prices.last(), self.prices.nth_back(n - 1)) {
            self.momentum = if past > 0.0 { (now - past) / past } else { 0.0 };
        }
        if let Some(avg) = self.volumes.mean_last(n) {
            self.avg_volume = avg;
        }
        if self.returns.len() >= n {
            let recent: Vec<f64> = self.returns.tail(n).collect();
            self.volatility = sample_stdev(&recent);
        }
    }

    fn position_size(&self, price: f64, confidence: f64) -> Option<f64> {
        let vol_adj = if self.volatility > 0.0 { 1.0 / (1.0 + self.volatility * 5.0) } else { 1.0 };
        let momentum_mult = (1.0 + self.momentum.abs() * 2.0).min(2.0);
        size_for(self.max_position_size * confidence * vol_adj * momentum_mult, price, MIN_NOTIONAL)
    }
}

impl Strategy for MomentumStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    fn symbol(&self) -> &str {
        &self.symbol
    }

    fn kind(&self) -> StrategyKind {
        StrategyKind::Momentum
    }

    fn initialize(&mut self, config: &StrategyConfig) -> Result<(), TradingError> {
        let lookback = period_param(config, "lookback_period", 10)?;
        if lookback < 2 {
            return Err(TradingError::Validation(format!(
                "{}: lookback period must be at least 2",
                config.name
            )));
        }
        let threshold = config.param("momentum_threshold", 0.02);
        if !(threshold.is_finite() && threshold > 0.0) {
            return Err(TradingError::Validation(format!(
                "{}: momentum threshold must be positive, got {threshold}",
                config.name
            )));
        }
        self.lookback = lookback;
        self.threshold = threshold;
        self.volume_multiplier = config.param("volume_multiplier", 1.5);
        self.max_position_size = config.risk_limits.max_position_size;
        let cooldown_sec = config.param("signal_cooldown_sec", 120.0) as i64;
        self.cooldown.set_period(Duration::seconds(cooldown_sec));
        self.prices = RollingWindow::new(lookback * 2);
        self.volumes = RollingWindow::new(lookback * 2);
        self.returns = RollingWindow::new(lookback * 2);
        self.reset();
        Ok(())
    }

    fn evaluate(&mut self, tick: &PriceTick) -> Result<Vec<Signal>, TradingError> {
        check_tick(&self.name, tick)?;
        if let Some(prev) = self.prices.last() {
            self.returns.push((tick.price - prev) / prev);
        }
        self.prices.push(tick.price);
        self.volumes.push(tick.volume.max(0.0));
        self.update_indicators();

        if self.prices.len() < self.lookback {
            return Ok(Vec::new());
        }

        // Feeds without volume data leave the average at 0: no confirmation needed.
        let volume_ok =
            self.avg_volume <= 0.0 || tick.volume > self.avg_volume * self.volume_multiplier;
        let signal_type = if self.momentum > self.threshold && volume_ok {
            SignalType::Buy
        } else if self.momentum < -self.threshold && volume_ok {
            SignalType::Sell
        } else {
            SignalType::Hold
        };

        if signal_type == SignalType::Hold
            || signal_type == self.last_signal
            || !self.cooldown.ready(tick.timestamp)
        {
            return Ok(Vec::new());
        }

        let mut confidence = (0.5 + self.momentum.abs() * 5.0).min(1.0);
        if self.volatility > 0.0 {
            confidence /= 1.0 + self.volatility * 10.0;
        }
        let Some(quantity) = self.position_size(tick.price, confidence) else {
            return Ok(Vec::new());
        };

        self.cooldown.mark(tick.timestamp);
        self.last_signal = signal_type;
        let volume_ratio = if self.avg_volume > 0.0 { tick.volume / self.avg_volume } else { 0.0 };
        let signal = Signal::new(
            signal_type,
            &self.symbol,
            tick.price,
            quantity,
            confidence,
            tick.timestamp,
        )
        .with_meta("momentum", self.momentum)
        .with_meta("momentum_pct", self.momentum * 100.0)
        .with_meta("volatility", self.volatility)
        .with_meta("avg_volume", self.avg_volume)
        .with_meta("current_volume", tick.volume)
        .with_meta("volume_ratio", volume_ratio)
        .with_meta("strategy", "momentum");
        Ok(vec![signal])
    }

    fn state(&self) -> Metadata {
        let mut m = Metadata::new();
        m.insert("momentum".into(), json!(self.momentum));
        m.insert("momentum_pct".into(), json!(self.momentum * 100.0));
        m.insert("volatility".into(), json!(self.volatility));
        m.insert("avg_volume".into(), json!(self.avg_volume));
        m.insert("lookback_period".into(), json!(self.lookback));
        m.insert("momentum_threshold".into(), json!(self.threshold));
        m.insert("prices_count".into(), json!(self.prices.len()));
        m.insert("last_signal".into(), json!(self.last_signal.to_string()));
        m
    }

    fn reset(&mut self) {
        self.prices.clear();
        self.volumes.clear();
        self.returns.clear();
        self.momentum = 0.0;
        self.volatility = 0.0;
        self.avg_volume = 0.0;
        self.cooldown.reset();
        self.last_signal = SignalType::Hold;
    }
}
