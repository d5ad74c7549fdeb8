//! Engine lifecycle and supervision.
//!
//! # Architecture
//!
//! ```text
//!                      ┌──────────── global stop (watch) ────────────┐
//!                      ▼                                              ▼
//! PriceFeed(symbol) ──ticks──► StrategyRunner ... ──► OrderManager (shared)
//!       ▲  one per symbol, shared by every runner on it
//!       │
//! TradingEngine ── supervisor task: value portfolio ─► PerformanceMetrics
//!                                   engine caps breached ─► emergency_stop
//! ```
//!
//! The engine has no busy loop of its own. It spawns feeds and runners, then
//! a supervisor that wakes every price interval.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};

use ahash::AHashMap;
use algo_core::config::{EngineConfig, StrategyConfig};
use algo_core::shutdown::{stop_channel, stop_requested};
use algo_core::time_util::SharedClock;
use algo_core::{OrderStats, StrategyState, TradingError};
use algo_md::{MarketDataClient, PriceFeed};
use algo_td::{OrderClient, OrderManager, OrderManagerConfig};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::metrics::{PerformanceMetrics, PerformanceSummary};
use crate::risk::RiskManager;
use crate::runner::{RunnerContext, StrategyRunner};
use crate::strategy::Strategy;

type RunnerMap = BTreeMap<String, Arc<StrategyRunner>>;

/// Engine-level view for display.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineStatus {
    pub running: bool,
    pub paused: bool,
    pub active_strategies: usize,
    pub active_positions: usize,
    pub total_trades: usize,
}

pub struct TradingEngine {
    config: EngineConfig,
    clock: SharedClock,
    market_data: Arc<dyn MarketDataClient>,
    orders: OrderManager,
    risk: Arc<RiskManager>,
    metrics: Arc<Mutex<PerformanceMetrics>>,

    runners: RwLock<RunnerMap>,
    feeds: Mutex<AHashMap<String, Arc<PriceFeed>>>,

    running: AtomicBool,
    paused: AtomicBool,
    global: Mutex<Option<watch::Sender<bool>>>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl TradingEngine {
    pub fn new(
        config: EngineConfig,
        market_data: Arc<dyn MarketDataClient>,
        order_client: Arc<dyn OrderClient>,
        clock: SharedClock,
    ) -> Arc<Self> {
        let order_config = OrderManagerConfig::from_engine(&config);
        let orders = OrderManager::new(order_client, order_config, clock.clone());
        Self::with_orders(config, market_data, orders, clock)
    }

    /// Build around an existing order manager.
    pub fn with_orders(
        config: EngineConfig,
        market_data: Arc<dyn MarketDataClient>,
        orders: OrderManager,
        clock: SharedClock,
    ) -> Arc<Self> {
        let metrics = PerformanceMetrics::new(config.initial_capital, clock.clone());
        Arc::new(Self {
            risk: Arc::new(RiskManager::new(clock.clone())),
            metrics: Arc::new(Mutex::new(metrics)),
            runners: RwLock::new(BTreeMap::new()),
            feeds: Mutex::new(AHashMap::new()),
            running: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            global: Mutex::new(None),
            supervisor: Mutex::new(None),
            config,
            clock,
            market_data,
            orders,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn orders(&self) -> &OrderManager {
        &self.orders
    }

    pub fn risk(&self) -> &Arc<RiskManager> {
        &self.risk
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Start the engine and every enabled strategy in `strategies`.
    ///
    /// A strategy that fails validation is logged and skipped. Returns how
    /// many strategies were started.
    pub fn start(self: &Arc<Self>, strategies: &[StrategyConfig]) -> Result<usize, TradingError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(TradingError::InvalidState("engine already running".into()));
        }
        self.paused.store(false, Ordering::SeqCst);
        let (global_tx, global_rx) = stop_channel();
        *self.global.lock().unwrap_or_else(|e| e.into_inner()) = Some(global_tx);
        self.write_runners().retain(|_, r| r.is_running());

        let mut started = 0;
        for config in strategies.iter().filter(|c| c.enabled) {
            match self.start_strategy(config.clone()) {
                Ok(()) => started += 1,
                Err(e) => error!("[engine] strategy {} not started: {e}", config.name),
            }
        }

        let weak = Arc::downgrade(self);
        let period = self.config.price_update_interval();
        let handle = tokio::spawn(supervise(weak, period, global_rx));
        *self.supervisor.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);

        info!("[engine] started with {started} strategies");
        Ok(started)
    }

    /// Start one strategy built from `config`.
    pub fn start_strategy(&self, config: StrategyConfig) -> Result<(), TradingError> {
        if !config.enabled {
            return Err(TradingError::Config(format!("strategy {} is disabled", config.name)));
        }
        let runner = StrategyRunner::new(config, self.runner_context())?;
        self.launch(runner)
    }

    /// Start a caller-built strategy under `config`'s name, symbol and limits.
    pub fn start_custom_strategy(
        &self,
        config: StrategyConfig,
        strategy: Box<dyn Strategy>,
    ) -> Result<(), TradingError> {
        algo_core::config::validate_strategy_config(&config)?;
        let runner = StrategyRunner::with_strategy(config, strategy, self.runner_context());
        self.launch(runner)
    }

    fn launch(&self, runner: StrategyRunner) -> Result<(), TradingError> {
        let global = self.global_receiver()?;
        let name = runner.name().to_string();
        let symbol = runner.symbol().to_string();

        let mut runners = self.write_runners();
        if runners.get(&name).is_some_and(|r| r.is_running()) {
            return Err(TradingError::InvalidState(format!("strategy {name} already running")));
        }
        let active = runners.values().filter(|r| r.is_running()).count();
        if active >= self.config.max_concurrent_strategies {
            return Err(TradingError::InvalidState(format!(
                "max concurrent strategies reached ({})",
                self.config.max_concurrent_strategies
            )));
        }

        let runner = Arc::new(runner);
        let feed = self.feed_for(&symbol, global.clone());
        feed.subscribe(runner.tick_sender());
        runner.start(global)?;
        if self.is_paused() {
            runner.pause();
        }
        runners.insert(name.clone(), runner);
        info!("[engine] strategy {name} running on {symbol}");
        Ok(())
    }

    /// Stop and remove one strategy. Its feed stops when no runner is left on
    /// the symbol.
    pub async fn stop_strategy(&self, name: &str) -> Result<(), TradingError> {
        let runner = self
            .write_runners()
            .remove(name)
            .ok_or_else(|| TradingError::InvalidState(format!("unknown strategy {name}")))?;

        {
            let mut feeds = self.lock_feeds();
            if let Some(feed) = feeds.get(runner.symbol()) {
                feed.unsubscribe(&runner.tick_sender());
                if feed.subscriber_count() == 0 {
                    feed.stop();
                    feeds.remove(runner.symbol());
                }
            }
        }
        runner.stop().await;
        info!("[engine] strategy {name} stopped");
        Ok(())
    }

    /// Stop every runner and feed. Runners stay listed with `running=false`.
    /// A runner waiting on a pending order cancels it rather than waiting for
    /// the fill or the order timeout.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let runners = self.halt_tasks();
        for runner in &runners {
            runner.join().await;
        }
        info!("[engine] stopped");
    }

    /// Halt everything and cancel every pending order. Always available,
    /// whatever the current state. Returns how many orders were cancelled.
    pub async fn emergency_stop(&self) -> usize {
        warn!("[engine] EMERGENCY STOP");
        self.running.store(false, Ordering::SeqCst);
        // Stopped runners cancel their own in-flight orders, so sweep first.
        // The second sweep catches orders placed in between.
        let mut cancelled = self.orders.cancel_all_orders().await;
        let runners = self.halt_tasks();
        cancelled += self.orders.cancel_all_orders().await;
        for runner in &runners {
            runner.join().await;
        }
        warn!("[engine] emergency stop complete, {cancelled} orders cancelled");
        cancelled
    }

    /// Signal runners, feeds and the supervisor without waiting.
    fn halt_tasks(&self) -> Vec<Arc<StrategyRunner>> {
        if let Some(tx) = self.global.lock().unwrap_or_else(|e| e.into_inner()).take() {
            let _ = tx.send(true);
        }
        drop(self.supervisor.lock().unwrap_or_else(|e| e.into_inner()).take());

        let runners: Vec<Arc<StrategyRunner>> = self.read_runners().values().cloned().collect();
        for runner in &runners {
            runner.request_stop();
        }
        for (_, feed) in self.lock_feeds().drain() {
            feed.stop();
        }
        runners
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
        for runner in self.read_runners().values() {
            runner.pause();
        }
        info!("[engine] paused");
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        for runner in self.read_runners().values() {
            runner.resume();
        }
        info!("[engine] resumed");
    }

    pub fn status(&self) -> EngineStatus {
        let runners = self.read_runners();
        let mut status = EngineStatus {
            running: self.is_running(),
            paused: self.is_paused(),
            ..EngineStatus::default()
        };
        for runner in runners.values() {
            let state = runner.state();
            if state.is_running {
                status.active_strategies += 1;
            }
            if state.position.is_open() {
                status.active_positions += 1;
            }
            status.total_trades += state.trades_count;
        }
        status
    }

    pub fn strategy_states(&self) -> Vec<StrategyState> {
        self.read_runners().values().map(|r| r.state()).collect()
    }

    pub fn runner(&self, name: &str) -> Option<Arc<StrategyRunner>> {
        self.read_runners().get(name).cloned()
    }

    pub fn performance(&self) -> PerformanceSummary {
        self.lock_metrics().summary()
    }

    pub async fn order_stats(&self) -> OrderStats {
        self.orders.stats().await
    }

    /// Initial capital plus realized and unrealized P&L of every runner.
    pub fn portfolio_value(&self) -> f64 {
        let (realized, unrealized) =
            self.read_runners().values().fold((0.0, 0.0), |(r, u), runner| {
                let state = runner.state();
                (r + state.pnl, u + state.position.unrealized_pnl)
            });
        self.config.initial_capital + realized + unrealized
    }

    /// One supervision pass. Returns `true` if it triggered an emergency stop.
    pub async fn check_engine_limits(&self) -> bool {
        let value = self.portfolio_value();
        let drawdown = {
            let mut metrics = self.lock_metrics();
            metrics.update_portfolio_value(value);
            metrics.current_drawdown_percent()
        };
        let daily_loss = self.risk.total_daily_loss();

        let loss_limit = self.config.daily_loss_limit;
        let drawdown_limit = self.config.emergency_stop_loss_percent;
        let breach = if loss_limit > 0.0 && daily_loss >= loss_limit {
            Some(format!("daily loss {daily_loss:.2} >= limit {loss_limit:.2}"))
        } else if drawdown_limit > 0.0 && drawdown >= drawdown_limit {
            Some(format!("drawdown {drawdown:.2}% >= {drawdown_limit:.2}%"))
        } else {
            None
        };

        match breach {
            Some(reason) => {
                error!("[engine] engine risk cap breached: {reason}");
                self.emergency_stop().await;
                true
            }
            None => false,
        }
    }

    fn runner_context(&self) -> RunnerContext {
        RunnerContext {
            risk: Arc::clone(&self.risk),
            orders: self.orders.clone(),
            metrics: Arc::clone(&self.metrics),
            clock: self.clock.clone(),
        }
    }

    fn global_receiver(&self) -> Result<watch::Receiver<bool>, TradingError> {
        self.global
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|tx| tx.subscribe())
            .ok_or_else(|| TradingError::InvalidState("engine not running".into()))
    }

    fn feed_for(&self, symbol: &str, global: watch::Receiver<bool>) -> Arc<PriceFeed> {
        let mut feeds = self.lock_feeds();
        let feed = feeds.entry(symbol.to_string()).or_insert_with(|| {
            Arc::new(PriceFeed::new(
                symbol,
                Arc::clone(&self.market_data),
                self.config.price_update_interval(),
                self.clock.clone(),
            ))
        });
        feed.start(global);
        Arc::clone(feed)
    }

    /// Stop feeds whose runners have all gone away.
    fn reap_idle_feeds(&self) {
        self.lock_feeds().retain(|symbol, feed| {
            if feed.subscriber_count() > 0 {
                return true;
            }
            info!("[engine] no subscribers left on {symbol}, stopping feed");
            feed.stop();
            false
        });
    }

    fn read_runners(&self) -> std::sync::RwLockReadGuard<'_, RunnerMap> {
        self.runners.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_runners(&self) -> std::sync::RwLockWriteGuard<'_, RunnerMap> {
        self.runners.write().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_feeds(&self) -> std::sync::MutexGuard<'_, AHashMap<String, Arc<PriceFeed>>> {
        self.feeds.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_metrics(&self) -> std::sync::MutexGuard<'_, PerformanceMetrics> {
        self.metrics.lock().unwrap_or_else(|e| e.into_inner())
    }
}

async fn supervise(
    engine: Weak<TradingEngine>,
    period: std::time::Duration,
    mut global: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick fires immediately; value the portfolio one period in.
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = stop_requested(&mut global) => break,
            _ = ticker.tick() => {
                let Some(engine) = engine.upgrade() else { break };
                engine.reap_idle_feeds();
                if engine.check_engine_limits().await {
                    break;
                }
            }
        }
    }
    info!("[engine] supervisor exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use algo_core::config::RiskLimits;
    use algo_core::time_util::system_clock;
    use algo_td::{PaperBroker, PaperBrokerConfig};

    fn engine(max: usize) -> Arc<TradingEngine> {
        let broker = Arc::new(
            PaperBroker::new(PaperBrokerConfig { seed: Some(7), ..Default::default() })
                .with_price("BTC-USD", 50_000.0)
                .with_price("ETH-USD", 3_000.0),
        );
        let config = EngineConfig { max_concurrent_strategies: max, ..EngineConfig::default() };
        TradingEngine::new(config, broker.clone(), broker, system_clock())
    }

    fn ma(name: &str, symbol: &str) -> StrategyConfig {
        let mut config = StrategyConfig::new(name, symbol).with_limits(RiskLimits::default());
        config.enabled = true;
        config
    }

    #[tokio::test]
    async fn lifecycle_and_feed_sharing() {
        let engine = engine(5);
        let configs = [
            ma("btc_moving_average", "BTC-USD"),
            ma("btc_fast_ma", "BTC-USD"),
            ma("eth_scalping", "ETH-USD"),
        ];
        let started = engine.start(&configs).unwrap();
        assert_eq!(started, 3);
        assert!(matches!(engine.start(&[]), Err(TradingError::InvalidState(_))));
        assert_eq!(engine.lock_feeds().len(), 2);

        let status = engine.status();
        assert!(status.running);
        assert_eq!(status.active_strategies, 3);
        assert_eq!(status.total_trades, 0);

        engine.pause();
        assert!(engine.strategy_states().iter().all(|s| s.is_paused));
        engine.resume();

        engine.stop_strategy("btc_fast_ma").await.unwrap();
        assert_eq!(engine.lock_feeds().len(), 2);
        engine.stop_strategy("btc_moving_average").await.unwrap();
        assert_eq!(engine.lock_feeds().len(), 1);
        assert!(engine.stop_strategy("btc_moving_average").await.is_err());

        engine.stop().await;
        let status = engine.status();
        assert!(!status.running);
        assert_eq!(status.active_strategies, 0);
        assert!(engine.strategy_states().iter().all(|s| !s.is_running));
        assert!((engine.portfolio_value() - 10_000.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn concurrency_cap_and_bad_configs() {
        let engine = engine(1);
        let mut disabled = ma("eth_momentum", "ETH-USD");
        disabled.enabled = false;
        let invalid = ma("btc_moving_average", "BTC-USD").with_param("short_period", 30.0);
        let started = engine.start(&[invalid, disabled, ma("eth_scalping", "ETH-USD")]).unwrap();
        assert_eq!(started, 1);

        let err = engine.start_strategy(ma("btc_scalping", "BTC-USD")).unwrap_err();
        assert!(matches!(err, TradingError::InvalidState(_)));
        engine.stop().await;
        assert!(engine.start_strategy(ma("btc_scalping", "BTC-USD")).is_err());
    }
}
