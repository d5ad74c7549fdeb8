//! Trading strategies.
//!
//! A [`Strategy`] turns a stream of [`PriceTick`]s into [`Signal`]s. It owns a
//! bounded rolling history and nothing else: it never sees positions, orders
//! or risk counters. Four implementations are provided:
//!
//! | Kind              | Type                      | Idea                                     |
//! |-------------------|---------------------------|------------------------------------------|
//! | `moving_average`  | [`MovingAverageStrategy`] | short/long SMA crossover                 |
//! | `momentum`        | [`MomentumStrategy`]      | rate of change with volume confirmation  |
//! | `mean_reversion`  | [`MeanReversionStrategy`] | RSI oversold / overbought                |
//! | `scalping`        | [`ScalpingStrategy`]      | fast crossover gated by price volatility |

mod mean_reversion;
mod momentum;
mod moving_average;
mod scalping;

use std::collections::VecDeque;

use algo_core::config::{StrategyConfig, StrategyKind};
use algo_core::{Metadata, PriceTick, Signal, SignalType, TradingError};
use chrono::{DateTime, Duration, Utc};

pub use mean_reversion::MeanReversionStrategy;
pub use momentum::MomentumStrategy;
pub use moving_average::MovingAverageStrategy;
pub use scalping::ScalpingStrategy;

/// Common interface of all strategy implementations.
///
/// `evaluate` is called from a single runner task, so implementations only
/// need `Send`.
pub trait Strategy: Send {
    fn name(&self) -> &str;
    fn symbol(&self) -> &str;
    fn kind(&self) -> StrategyKind;

    /// Read tunables from `config.parameters` and validate them.
    fn initialize(&mut self, config: &StrategyConfig) -> Result<(), TradingError>;

    /// Append `tick` to the history and return any signals it triggers.
    fn evaluate(&mut self, tick: &PriceTick) -> Result<Vec<Signal>, TradingError>;

    /// Current indicator values.
    fn state(&self) -> Metadata;

    /// Clear history and signal memory, keeping parameters.
    fn reset(&mut self);

    /// Release history when the owning runner stops.
    fn stop(&mut self) {
        self.reset();
    }
}

/// Build and initialise the strategy a config asks for.
pub fn create_strategy(config: &StrategyConfig) -> Result<Box<dyn Strategy>, TradingError> {
    let mut strategy: Box<dyn Strategy> = match config.resolved_kind()? {
        StrategyKind::MovingAverage => {
            Box::new(MovingAverageStrategy::new(&config.name, &config.symbol))
        }
        StrategyKind::Momentum => Box::new(MomentumStrategy::new(&config.name, &config.symbol)),
        StrategyKind::MeanReversion => {
            Box::new(MeanReversionStrategy::new(&config.name, &config.symbol))
        }
        StrategyKind::Scalping => Box::new(ScalpingStrategy::new(&config.name, &config.symbol)),
    };
    strategy.initialize(config)?;
    Ok(strategy)
}

// ---------------------------------------------------------------------------
// Shared building blocks
// ---------------------------------------------------------------------------

/// Fixed-capacity FIFO of samples. Pushing into a full window evicts the
/// oldest sample.
#[derive(Debug, Clone)]
pub struct RollingWindow {
    buf: VecDeque<f64>,
    capacity: usize,
}

impl RollingWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { buf: VecDeque::with_capacity(capacity), capacity }
    }

    pub fn push(&mut self, value: f64) {
        if self.buf.len() == self.capacity {
            self.buf.pop_front();
        }
        self.buf.push_back(value);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Most recent sample.
    pub fn last(&self) -> Option<f64> {
        self.buf.back().copied()
    }

    /// Sample `back` positions before the most recent one (`0` = latest).
    pub fn nth_back(&self, back: usize) -> Option<f64> {
        self.buf.len().checked_sub(back + 1).and_then(|i| self.buf.get(i).copied())
    }

    /// The latest `n` samples, oldest first.
    pub fn tail(&self, n: usize) -> impl Iterator<Item = f64> + '_ {
        self.buf.iter().skip(self.buf.len().saturating_sub(n)).copied()
    }

    /// Mean of the latest `n` samples, `None` until `n` are available.
    pub fn mean_last(&self, n: usize) -> Option<f64> {
        if n == 0 || self.buf.len() < n {
            return None;
        }
        Some(self.tail(n).sum::<f64>() / n as f64)
    }
}

/// Sample standard deviation (n - 1), `0.0` for fewer than two values.
pub(crate) fn sample_stdev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / (n - 1.0);
    var.sqrt()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Relation {
    Above,
    Below,
    Equal,
}

/// Detects short/long average crossovers between consecutive evaluations.
///
/// With no previous observation the short average counts as neither above nor
/// below the long one, so the first observed relationship is a crossover.
#[derive(Debug, Clone, Default)]
pub(crate) struct CrossoverDetector {
    prev: Option<Relation>,
}

impl CrossoverDetector {
    pub(crate) fn update(&mut self, short: f64, long: f64) -> SignalType {
        let now = if short > long {
            Relation::Above
        } else if short < long {
            Relation::Below
        } else {
            Relation::Equal
        };
        let prev = self.prev.replace(now);
        match now {
            Relation::Above if prev != Some(Relation::Above) => SignalType::Buy,
            Relation::Below if prev != Some(Relation::Below) => SignalType::Sell,
            _ => SignalType::Hold,
        }
    }

    pub(crate) fn reset(&mut self) {
        self.prev = None;
    }
}

/// Minimum spacing between emitted signals, measured in tick time.
#[derive(Debug, Clone)]
pub(crate) struct SignalCooldown {
    period: Duration,
    last: Option<DateTime<Utc>>,
}

impl SignalCooldown {
    pub(crate) fn new(period: Duration) -> Self {
        Self { period, last: None }
    }

    pub(crate) fn ready(&self, at: DateTime<Utc>) -> bool {
        self.last.is_none_or(|last| at - last >= self.period)
    }

    pub(crate) fn mark(&mut self, at: DateTime<Utc>) {
        self.last = Some(at);
    }

    pub(crate) fn set_period(&mut self, period: Duration) {
        self.period = period;
    }

    pub(crate) fn reset(&mut self) {
        self.last = None;
    }
}

/// Quantity for a notional of `value` at `price`, or `None` below `min_notional`.
pub(crate) fn size_for(value: f64, price: f64, min_notional: f64) -> Option<f64> {
    if price.is_nan() || price <= 0.0 || !value.is_finite() || value < min_notional {
        return None;
    }
    Some(value / price)
}

/// Reject ticks no indicator can use.
pub(crate) fn check_tick(name: &str, tick: &PriceTick) -> Result<(), TradingError> {
    if tick.price.is_finite() && tick.price > 0.0 {
        Ok(())
    } else {
        Err(TradingError::Feed(format!("{name}: unusable price {}", tick.price)))
    }
}

/// Positive integer parameter.
pub(crate) fn period_param(
    config: &StrategyConfig,
    key: &str,
    default: usize,
) -> Result<usize, TradingError> {
    let raw = config.param(key, default as f64);
    if !raw.is_finite() || raw < 1.0 || raw.fract() != 0.0 {
        return Err(TradingError::Validation(format!(
            "{}: {key} must be a positive integer, got {raw}",
            config.name
        )));
    }
    Ok(raw as usize)
}

#[cfg(test)]
pub(crate) mod test_util {
    use super::*;
    use chrono::TimeZone;

    pub fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 3, 12, 0, 0).unwrap()
    }

    /// Tick `i` seconds after [`t0`].
    pub fn tick_at(symbol: &str, price: f64, volume: f64, secs: i64) -> PriceTick {
        PriceTick {
            symbol: symbol.to_string(),
            price,
            bid_price: price * 0.999,
            ask_price: price * 1.001,
            volume,
            timestamp: t0() + Duration::seconds(secs),
        }
    }
}
