//! RSI mean reversion.
//!
//! Buys when the RSI over `rsi_period` price changes drops below
//! `oversold_threshold` and sells when it rises above `overbought_threshold`.
//! A signal fires on entry into a zone, not on every tick spent inside it.

use algo_core::config::{StrategyConfig, StrategyKind};
use algo_core::{Metadata, PriceTick, Signal, SignalType, TradingError};
use chrono::Duration;
use serde_json::json;

use super::{RollingWindow, SignalCooldown, Strategy, check_tick, period_param, size_for};

const MIN_NOTIONAL: f64 = 5.0;

pub struct MeanReversionStrategy {
    name: String,
    symbol: String,
    lookback: usize,
    rsi_period: usize,
    oversold: f64,
    overbought: f64,
    max_position_size: f64,

    prices: RollingWindow,
    rsi: Option<f64>,
    mean: Option<f64>,
    zone: SignalType,
    cooldown: SignalCooldown,
    last_signal: SignalType,
}

impl MeanReversionStrategy {
    pub fn new(name: &str, symbol: &str) -> Self {
        Self {
            name: name.to_string(),
            symbol: symbol.to_string(),
            lookback: 20,
            rsi_period: 14,
            oversold: 30.0,
            overbought: 70.0,
            max_position_size: 100.0,
            prices: RollingWindow::new(20),
            rsi: None,
            mean: None,
            zone: SignalType::Hold,
            cooldown: SignalCooldown::new(Duration::minutes(10)),
            last_signal: SignalType::Hold,
        }
    }

    /// Simple-average RSI over the last `rsi_period` changes.
    fn compute_rsi(&self) -> Option<f64> {
        let n = self.rsi_period;
        if self.prices.len() < n + 1 {
            return None;
        }
        let window: Vec<f64> = self.prices.tail(n + 1).collect();
        let (mut gains, mut losses) = (0.0, 0.0);
        for pair in window.windows(2) {
            let change = pair[1] - pair[0];
            if change > 0.0 {
                gains += change;
            } else {
                losses -= change;
            }
        }
        if gains + losses == 0.0 {
            return Some(50.0);
        }
        if losses == 0.0 {
            return Some(100.0);
        }
        let rs = gains / losses;
        Some(100.0 - 100.0 / (1.0 + rs))
    }
}

impl Strategy for MeanReversionStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    fn symbol(&self) -> &str {
        &self.symbol
    }

    fn kind(&self) -> StrategyKind {
        StrategyKind::MeanReversion
    }

    fn initialize(&mut self, config: &StrategyConfig) -> Result<(), TradingError> {
        let lookback = period_param(config, "lookback_period", 20)?;
        let rsi_period = period_param(config, "rsi_period", 14)?;
        let oversold = config.param("oversold_threshold", 30.0);
        let overbought = config.param("overbought_threshold", 70.0);
        if !(0.0 < oversold && oversold < overbought && overbought < 100.0) {
            return Err(TradingError::Validation(format!(
                "{}: need 0 < oversold ({oversold}) < overbought ({overbought}) < 100",
                config.name
            )));
        }
        self.lookback = lookback;
        self.rsi_period = rsi_period;
        self.oversold = oversold;
        self.overbought = overbought;
        self.max_position_size = config.risk_limits.max_position_size;
        let cooldown_sec = config.param("signal_cooldown_sec", 600.0) as i64;
        self.cooldown.set_period(Duration::seconds(cooldown_sec));
        self.prices = RollingWindow::new(lookback.max(rsi_period + 1));
        self.reset();
        Ok(())
    }

    fn evaluate(&mut self, tick: &PriceTick) -> Result<Vec<Signal>, TradingError> {
        check_tick(&self.name, tick)?;
        self.prices.push(tick.price);
        self.mean = self.prices.mean_last(self.lookback);

        if self.prices.len() < self.prices.capacity() {
            return Ok(Vec::new());
        }
        let Some(rsi) = self.compute_rsi() else {
            return Ok(Vec::new());
        };
        self.rsi = Some(rsi);

        let zone = if rsi < self.oversold {
            SignalType::Buy
        } else if rsi > self.overbought {
            SignalType::Sell
        } else {
            SignalType::Hold
        };
        let entered = zone != self.zone;
        self.zone = zone;
        if zone == SignalType::Hold || !entered || !self.cooldown.ready(tick.timestamp) {
            return Ok(Vec::new());
        }

        let depth = match zone {
            SignalType::Buy => (self.oversold - rsi) / self.oversold,
            _ => (rsi - self.overbought) / (100.0 - self.overbought),
        };
        let confidence = (0.5 + depth * 0.5).min(1.0);
        let Some(quantity) = size_for(self.max_position_size * confidence, tick.price, MIN_NOTIONAL)
        else {
            return Ok(Vec::new());
        };

        self.cooldown.mark(tick.timestamp);
        self.last_signal = zone;
        let deviation_pct = self.mean.map(|m| (tick.price - m) / m * 100.0).unwrap_or(0.0);
        let signal = Signal::new(
            zone,
            &self.symbol,
            tick.price,
            quantity,
            confidence,
            tick.timestamp,
        )
        .with_meta("rsi", rsi)
        .with_meta("mean", self.mean.unwrap_or(tick.price))
        .with_meta("deviation_pct", deviation_pct)
        .with_meta("strategy", "mean_reversion");
        Ok(vec![signal])
    }

    fn state(&self) -> Metadata {
        let mut m = Metadata::new();
        m.insert("rsi".into(), json!(self.rsi));
        m.insert("mean".into(), json!(self.mean));
        m.insert("rsi_period".into(), json!(self.rsi_period));
        m.insert("lookback_period".into(), json!(self.lookback));
        m.insert("oversold_threshold".into(), json!(self.oversold));
        m.insert("overbought_threshold".into(), json!(self.overbought));
        m.insert("prices_count".into(), json!(self.prices.len()));
        m.insert("last_signal".into(), json!(self.last_signal.to_string()));
        m
    }

    fn reset(&mut self) {
        self.prices.clear();
        self.rsi = None;
        self.mean = None;
        self.zone = SignalType::Hold;
        self.cooldown.reset();
        self.last_signal = SignalType::Hold;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::test_util::tick_at;

    fn strategy() -> MeanReversionStrategy {
        let cfg = StrategyConfig::new("ada_mean_reversion", "ADA-USD")
            .with_param("lookback_period", 6.0)
            .with_param("rsi_period", 4.0);
        let mut s = MeanReversionStrategy::new(&cfg.name, &cfg.symbol);
        s.initialize(&cfg).unwrap();
        s
    }

    #[test]
    fn oversold_buys_once_then_overbought_sells() {
        let mut s = strategy();
        let prices = [100.0, 101.0, 100.0, 99.0, 98.0, 97.0, 96.0, 97.0, 99.0, 101.0, 103.0, 105.0];
        let mut out = Vec::new();
        for (i, p) in prices.iter().enumerate() {
            out.extend(s.evaluate(&tick_at("ADA-USD", *p, 0.0, i as i64 * 900)).unwrap());
        }
        let kinds: Vec<_> = out.iter().map(|s| s.signal_type).collect();
        assert_eq!(kinds, vec![SignalType::Buy, SignalType::Sell]);
        assert!(out[0].metadata["rsi"].as_f64().unwrap() < 30.0);
        assert!(out[1].metadata["rsi"].as_f64().unwrap() > 70.0);
    }

    #[test]
    fn flat_market_is_neutral() {
        let mut s = strategy();
        for i in 0..10 {
            assert!(s.evaluate(&tick_at("ADA-USD", 1.0, 0.0, i * 900)).unwrap().is_empty());
        }
        assert_eq!(s.state()["rsi"], json!(50.0));
    }

    #[test]
    fn thresholds_validated() {
        let mut s = MeanReversionStrategy::new("m", "X");
        let cfg = StrategyConfig::new("m", "X")
            .with_param("oversold_threshold", 80.0)
            .with_param("overbought_threshold", 70.0);
        assert!(s.initialize(&cfg).is_err());
    }
}
