//! One strategy, its position and its trade log.
//!
//! ```text
//! PriceFeed ──► [tick queue] ──► on_tick ──► Strategy::evaluate ──► [signal queue]
//!                                   └─ protective exit ─────────────────┘
//! [signal queue] ──► RiskManager ──► gating ──► OrderManager ──► apply_fill
//! ```
//!
//! The loop task owns the strategy. Position, trade log and counters live in
//! a `RwLock`ed [`RunnerState`]; a fill updates the position and appends the
//! trade under a single write lock.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use algo_core::config::{RiskLimits, StrategyConfig, validate_strategy_config};
use algo_core::shutdown::{stop_channel, stop_requested};
use algo_core::time_util::{SharedClock, trading_day};
use algo_core::{
    OrderRequest, OrderSide, Position, PriceTick, Signal, SignalType, StrategyState, Trade,
    TradingError,
};
use algo_td::OrderManager;
use chrono::NaiveDate;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::metrics::PerformanceMetrics;
use crate::risk::RiskManager;
use crate::strategy::{Strategy, create_strategy};

pub const TICK_QUEUE_CAPACITY: usize = 100;
pub const SIGNAL_QUEUE_CAPACITY: usize = 50;
/// Minimum unrealized profit, in percent, for a non-forced sell.
pub const DEFAULT_MIN_PROFIT_PERCENT: f64 = 0.5;

/// Collaborators shared by every runner of an engine.
#[derive(Clone)]
pub struct RunnerContext {
    pub risk: Arc<RiskManager>,
    pub orders: OrderManager,
    pub metrics: Arc<Mutex<PerformanceMetrics>>,
    pub clock: SharedClock,
}

struct RunnerState {
    state: StrategyState,
    trades: Vec<Trade>,
    pnl_day: NaiveDate,
    daily_pnl: f64,
}

impl RunnerState {
    fn roll_day(&mut self, day: NaiveDate) {
        if day > self.pnl_day {
            self.pnl_day = day;
            self.daily_pnl = 0.0;
        }
    }
}

struct RunnerShared {
    name: String,
    symbol: String,
    limits: RiskLimits,
    min_profit_percent: f64,
    ctx: RunnerContext,
    state: RwLock<RunnerState>,
    paused: AtomicBool,
}

impl RunnerShared {
    fn read(&self) -> std::sync::RwLockReadGuard<'_, RunnerState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, RunnerState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    fn set_error(&self, msg: String) {
        self.write().state.last_error = Some(msg);
    }
}

struct Idle {
    strategy: Box<dyn Strategy>,
    tick_rx: mpsc::Receiver<PriceTick>,
}

struct RunnerTask {
    stop_tx: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

/// Drives one [`Strategy`] from its tick queue to executed trades.
///
/// Lifecycle is `created → running (⇄ paused) → stopped`; a stopped runner is
/// not restarted, the engine builds a fresh one instead.
pub struct StrategyRunner {
    shared: Arc<RunnerShared>,
    tick_tx: mpsc::Sender<PriceTick>,
    idle: Mutex<Option<Idle>>,
    task: Mutex<Option<RunnerTask>>,
}

impl StrategyRunner {
    /// Validate `config` and build the strategy it names.
    pub fn new(config: StrategyConfig, ctx: RunnerContext) -> Result<Self, TradingError> {
        validate_strategy_config(&config)?;
        let strategy = create_strategy(&config)?;
        Ok(Self::with_strategy(config, strategy, ctx))
    }

    /// Wrap an already initialised strategy.
    pub fn with_strategy(
        config: StrategyConfig,
        strategy: Box<dyn Strategy>,
        ctx: RunnerContext,
    ) -> Self {
        let now = ctx.clock.now();
        let (tick_tx, tick_rx) = mpsc::channel(TICK_QUEUE_CAPACITY);
        let min_profit_percent = config.param("min_profit_percent", DEFAULT_MIN_PROFIT_PERCENT);
        let shared = RunnerShared {
            name: config.name.clone(),
            symbol: config.symbol.clone(),
            limits: config.risk_limits.clone(),
            min_profit_percent,
            state: RwLock::new(RunnerState {
                state: StrategyState::new(&config.name, &config.symbol, now),
                trades: Vec::new(),
                pnl_day: trading_day(now),
                daily_pnl: 0.0,
            }),
            paused: AtomicBool::new(false),
            ctx,
        };
        Self {
            shared: Arc::new(shared),
            tick_tx,
            idle: Mutex::new(Some(Idle { strategy, tick_rx })),
            task: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn symbol(&self) -> &str {
        &self.shared.symbol
    }

    /// Queue handle to register with the symbol's price feed.
    pub fn tick_sender(&self) -> mpsc::Sender<PriceTick> {
        self.tick_tx.clone()
    }

    /// Spawn the runner loop.
    pub fn start(&self, global: watch::Receiver<bool>) -> Result<(), TradingError> {
        let idle = self.idle.lock().unwrap_or_else(|e| e.into_inner()).take();
        let Some(Idle { strategy, tick_rx }) = idle else {
            return Err(TradingError::InvalidState(format!(
                "runner {} already started",
                self.shared.name
            )));
        };

        let (stop_tx, stop_rx) = stop_channel();
        let (signal_tx, signal_rx) = mpsc::channel(SIGNAL_QUEUE_CAPACITY);
        {
            let mut st = self.shared.write();
            st.state.is_running = true;
            st.state.start_time = self.shared.ctx.clock.now();
        }

        let worker = RunnerLoop {
            shared: Arc::clone(&self.shared),
            strategy,
            signal_tx,
            stop_rx: stop_rx.clone(),
            global: global.clone(),
            exit_queued: false,
        };
        let handle = tokio::spawn(worker.run(tick_rx, signal_rx, stop_rx, global));
        *self.task.lock().unwrap_or_else(|e| e.into_inner()) =
            Some(RunnerTask { stop_tx, handle: Some(handle) });
        info!("[runner:{}] started on {}", self.shared.name, self.shared.symbol);
        Ok(())
    }

    /// Signal the loop to exit without waiting for it.
    pub fn request_stop(&self) {
        if let Some(task) = self.task.lock().unwrap_or_else(|e| e.into_inner()).as_ref() {
            let _ = task.stop_tx.send(true);
        }
        self.shared.write().state.is_running = false;
    }

    /// Wait for the loop task to finish.
    pub async fn join(&self) {
        let handle = self
            .task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_mut()
            .and_then(|t| t.handle.take());
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("[runner:{}] task ended abnormally: {e}", self.shared.name);
            }
        }
    }

    pub async fn stop(&self) {
        self.request_stop();
        self.join().await;
    }

    pub fn pause(&self) {
        self.shared.paused.store(true, Ordering::SeqCst);
        self.shared.write().state.is_paused = true;
    }

    pub fn resume(&self) {
        self.shared.paused.store(false, Ordering::SeqCst);
        self.shared.write().state.is_paused = false;
    }

    pub fn is_running(&self) -> bool {
        self.shared.read().state.is_running
    }

    pub fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::SeqCst)
    }

    /// Snapshot for display.
    pub fn state(&self) -> StrategyState {
        self.shared.read().state.clone()
    }

    pub fn position(&self) -> Position {
        self.shared.read().state.position.clone()
    }

    pub fn trades(&self) -> Vec<Trade> {
        self.shared.read().trades.clone()
    }

    /// Realized P&L since the start of the current UTC day.
    pub fn daily_pnl(&self) -> f64 {
        let today = trading_day(self.shared.ctx.clock.now());
        let st = self.shared.read();
        if today > st.pnl_day { 0.0 } else { st.daily_pnl }
    }
}

impl Drop for StrategyRunner {
    fn drop(&mut self) {
        self.request_stop();
    }
}

// ---------------------------------------------------------------------------
// Loop task
// ---------------------------------------------------------------------------

struct RunnerLoop {
    shared: Arc<RunnerShared>,
    strategy: Box<dyn Strategy>,
    signal_tx: mpsc::Sender<Signal>,
    /// Copies of the loop's stop receivers for cancelling an in-flight order.
    stop_rx: watch::Receiver<bool>,
    global: watch::Receiver<bool>,
    exit_queued: bool,
}

impl RunnerLoop {
    async fn run(
        mut self,
        mut tick_rx: mpsc::Receiver<PriceTick>,
        mut signal_rx: mpsc::Receiver<Signal>,
        mut stop_rx: watch::Receiver<bool>,
        mut global: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = stop_requested(&mut stop_rx) => break,
                _ = stop_requested(&mut global) => break,
                Some(signal) = signal_rx.recv() => {
                    if self.process_signal(signal).await {
                        break;
                    }
                }
                tick = tick_rx.recv() => match tick {
                    Some(tick) => self.on_tick(&tick),
                    None => break,
                },
            }
        }

        self.strategy.stop();
        self.shared.write().state.is_running = false;
        info!("[runner:{}] stopped", self.shared.name);
    }

    fn on_tick(&mut self, tick: &PriceTick) {
        let shared = &self.shared;
        let now = shared.ctx.clock.now();
        let exit = {
            let mut st = shared.write();
            st.state.last_update_time = now;
            st.roll_day(trading_day(now));
            st.state.position.mark(tick.price);
            self.protective_exit(&st.state.position, tick.price)
        };

        if shared.paused.load(Ordering::SeqCst) {
            return;
        }
        if let Some(signal) = exit {
            self.enqueue(signal);
            self.exit_queued = true;
        }

        match self.strategy.evaluate(tick) {
            Ok(signals) => {
                for signal in signals.into_iter().filter(|s| s.signal_type != SignalType::Hold) {
                    self.enqueue(signal);
                }
            }
            Err(e) => {
                warn!("[runner:{}] evaluate failed: {e}", shared.name);
                shared.set_error(e.to_string());
            }
        }
        shared.write().state.metadata = self.strategy.state();
    }

    /// A full-position sell when take-profit or stop-loss is hit.
    fn protective_exit(&self, position: &Position, price: f64) -> Option<Signal> {
        if self.exit_queued || !position.is_open() {
            return None;
        }
        let limits = &self.shared.limits;
        let pct = position.unrealized_pnl_percent(price);
        let reason = if limits.take_profit_percent > 0.0 && pct >= limits.take_profit_percent {
            "take_profit"
        } else if limits.stop_loss_percent > 0.0 && pct <= -limits.stop_loss_percent {
            "stop_loss"
        } else {
            return None;
        };
        info!("[runner:{}] {reason} at {pct:.2}%", self.shared.name);
        let signal = Signal::new(
            SignalType::Sell,
            &self.shared.symbol,
            price,
            position.quantity,
            1.0,
            self.shared.ctx.clock.now(),
        )
        .with_meta("reason", reason)
        .with_meta("pnl_percent", pct);
        Some(signal)
    }

    fn enqueue(&self, signal: Signal) {
        if let Err(mpsc::error::TrySendError::Full(s)) = self.signal_tx.try_send(signal) {
            debug!("[runner:{}] signal queue full, dropping {s}", self.shared.name);
        }
    }

    /// Risk-check and execute one signal. Returns `true` when the runner must
    /// halt.
    async fn process_signal(&mut self, signal: Signal) -> bool {
        let shared = Arc::clone(&self.shared);
        let name = shared.name.as_str();
        let limits = &shared.limits;
        if signal.signal_type == SignalType::Sell {
            self.exit_queued = false;
        }
        if signal.signal_type == SignalType::Hold || shared.paused.load(Ordering::SeqCst) {
            return false;
        }

        let snapshot = shared.read().state.clone();
        if let Err(e) = shared.ctx.risk.check_signal(&signal, limits, &snapshot) {
            debug!("[runner:{name}] {} rejected: {e}", signal.signal_type);
            return false;
        }
        let (trades_today, _) = shared.ctx.risk.daily_stats(name);
        if trades_today >= limits.max_daily_trades {
            debug!("[runner:{name}] daily trade limit reached");
            return false;
        }
        // Accepted: the cooldown runs from here even if gating holds it back.
        shared.write().state.last_signal = Some(signal.clone());

        let order = match signal.signal_type {
            SignalType::Buy => self.prepare_buy(&signal, &snapshot.position),
            SignalType::Sell => self.prepare_sell(&signal, &snapshot.position),
            SignalType::Hold => None,
        };
        let Some(order) = order else {
            return false;
        };
        if let Err(e) = shared.ctx.risk.validate_order(&order, signal.price) {
            debug!("[runner:{name}] order rejected: {e}");
            return false;
        }

        info!("[runner:{name}] executing {signal}");
        match shared.ctx.orders.submit_order_until(order, self.stop_signal()).await {
            Ok(trade) => self.apply_fill(trade),
            Err(TradingError::PartialFill { fill, reason }) => {
                warn!("[runner:{name}] order ended early ({reason}), booking partial fill");
                shared.set_error(format!("partial fill: {reason}"));
                self.apply_fill(*fill)
            }
            Err(e) => {
                warn!("[runner:{name}] order failed: {e}");
                shared.set_error(e.to_string());
                false
            }
        }
    }

    /// Resolves when either stop receiver fires.
    fn stop_signal(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut stop_rx = self.stop_rx.clone();
        let mut global = self.global.clone();
        async move {
            tokio::select! {
                _ = stop_requested(&mut stop_rx) => {}
                _ = stop_requested(&mut global) => {}
            }
        }
    }

    fn prepare_buy(&self, signal: &Signal, position: &Position) -> Option<OrderRequest> {
        let shared = &self.shared;
        if position.is_open() {
            debug!("[runner:{}] buy ignored, position already open", shared.name);
            return None;
        }
        let mut quantity = signal.quantity;
        let cap = shared.limits.max_position_size;
        if signal.price > 0.0 && quantity * signal.price > cap {
            quantity = cap / signal.price;
        }
        Some(OrderRequest::market(&shared.symbol, OrderSide::Buy, quantity))
    }

    fn prepare_sell(&self, signal: &Signal, position: &Position) -> Option<OrderRequest> {
        let shared = &self.shared;
        if !position.is_open() {
            debug!("[runner:{}] sell ignored, no open position", shared.name);
            return None;
        }
        let quantity = if signal.quantity > 0.0 {
            signal.quantity.min(position.quantity)
        } else {
            position.quantity
        };

        let pct = position.unrealized_pnl_percent(signal.price);
        let stop_loss = shared.limits.stop_loss_percent;
        let forced = stop_loss > 0.0 && pct <= -stop_loss;
        if !forced && pct < shared.min_profit_percent {
            debug!(
                "[runner:{}] sell held back: {pct:.2}% below minimum profit {:.2}%",
                shared.name, shared.min_profit_percent
            );
            return None;
        }
        if forced {
            info!("[runner:{}] stop-loss exit at {pct:.2}%", shared.name);
        }
        Some(OrderRequest::market(&shared.symbol, OrderSide::Sell, quantity))
    }

    /// Book a fill. Returns `true` when the daily loss limit now stops the
    /// strategy.
    fn apply_fill(&mut self, mut trade: Trade) -> bool {
        let shared = &self.shared;
        let name = shared.name.as_str();
        trade.strategy_name = shared.name.clone();

        let daily_pnl = {
            let mut st = shared.write();
            st.roll_day(trading_day(shared.ctx.clock.now()));
            match trade.side {
                OrderSide::Buy => {
                    st.state.position.apply_buy(trade.quantity, trade.price, trade.timestamp);
                    trade.pnl = 0.0;
                }
                OrderSide::Sell => {
                    trade.pnl = st.state.position.apply_sell(
                        trade.quantity,
                        trade.price,
                        trade.commission,
                    );
                    st.state.pnl += trade.pnl;
                    st.daily_pnl += trade.pnl;
                }
            }
            st.state.trades_count += 1;
            st.trades.push(trade.clone());
            st.daily_pnl
        };

        shared.ctx.risk.record_trade(name, &trade);
        shared.ctx.metrics.lock().unwrap_or_else(|e| e.into_inner()).update_from_trade(&trade);
        info!(
            "[runner:{name}] filled {} {:.8} {} @ {:.6}, pnl {:.4}",
            trade.side, trade.quantity, trade.symbol, trade.price, trade.pnl
        );

        if shared.ctx.risk.should_stop_strategy(name, &shared.limits, daily_pnl) {
            warn!("[runner:{name}] daily loss limit reached, stopping");
            shared.set_error("daily loss limit reached".to_string());
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use algo_core::config::StrategyKind;
    use algo_core::time_util::{Clock, ManualClock, system_clock};
    use algo_core::{Metadata, PriceTick};
    use algo_td::{
        BrokerOrder, OrderClient, OrderManagerConfig, OrderPlacement, PaperBroker,
        PaperBrokerConfig,
    };
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};

    const SYM: &str = "BTC-USD";

    /// Buys on volume 1, sells on volume 2, otherwise silent.
    struct Scripted {
        evaluated: Arc<AtomicUsize>,
        stopped: Arc<AtomicBool>,
    }

    impl Strategy for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }
        fn symbol(&self) -> &str {
            SYM
        }
        fn kind(&self) -> StrategyKind {
            StrategyKind::MovingAverage
        }
        fn initialize(&mut self, _: &StrategyConfig) -> Result<(), TradingError> {
            Ok(())
        }
        fn evaluate(&mut self, tick: &PriceTick) -> Result<Vec<Signal>, TradingError> {
            self.evaluated.fetch_add(1, Ordering::SeqCst);
            let kind = match tick.volume as u32 {
                1 => SignalType::Buy,
                2 => SignalType::Sell,
                _ => return Ok(Vec::new()),
            };
            Ok(vec![Signal::new(kind, SYM, tick.price, 0.5, 0.9, tick.timestamp)])
        }
        fn state(&self) -> Metadata {
            Metadata::new()
        }
        fn reset(&mut self) {}
        fn stop(&mut self) {
            self.stopped.store(true, Ordering::SeqCst);
        }
    }

    /// Rests every order and reports a fifth of it filled at 100.
    struct PartialBroker;

    #[async_trait]
    impl OrderClient for PartialBroker {
        fn name(&self) -> &str {
            "partial"
        }

        async fn place_order(&self, _: &OrderPlacement) -> Result<BrokerOrder, TradingError> {
            Ok(BrokerOrder {
                id: "p-0".into(),
                status: "open".into(),
                filled_qty: 0.0,
                avg_price: 0.0,
                commission: 0.0,
            })
        }

        async fn cancel_order(&self, _: &str) -> Result<(), TradingError> {
            Ok(())
        }

        async fn get_order(&self, order_id: &str) -> Result<BrokerOrder, TradingError> {
            Ok(BrokerOrder {
                id: order_id.into(),
                status: "partially_filled".into(),
                filled_qty: 0.1,
                avg_price: 100.0,
                commission: 0.0,
            })
        }
    }

    struct Harness {
        ctx: RunnerContext,
        runner: StrategyRunner,
        evaluated: Arc<AtomicUsize>,
        stopped: Arc<AtomicBool>,
        _global: watch::Sender<bool>,
    }

    fn limits(max_daily_loss: f64) -> RiskLimits {
        RiskLimits {
            max_position_size: 100.0,
            stop_loss_percent: 5.0,
            take_profit_percent: 10.0,
            max_daily_trades: 10,
            max_daily_loss,
            cooldown_period_sec: 0,
        }
    }

    fn paper() -> Arc<PaperBroker> {
        let config = PaperBrokerConfig { step: 0.0, half_spread: 0.0, ..Default::default() };
        Arc::new(PaperBroker::new(config).with_price(SYM, 100.0))
    }

    fn start_runner(limits: RiskLimits, clock: SharedClock, orders: OrderManager) -> Harness {
        let ctx = RunnerContext {
            risk: Arc::new(RiskManager::new(clock.clone())),
            orders,
            metrics: Arc::new(Mutex::new(PerformanceMetrics::new(10_000.0, clock.clone()))),
            clock,
        };
        let evaluated = Arc::new(AtomicUsize::new(0));
        let stopped = Arc::new(AtomicBool::new(false));
        let strategy = Scripted { evaluated: evaluated.clone(), stopped: stopped.clone() };
        let config = StrategyConfig::new("scripted", SYM).with_limits(limits);
        let runner = StrategyRunner::with_strategy(config, Box::new(strategy), ctx.clone());
        let (global, global_rx) = stop_channel();
        runner.start(global_rx).unwrap();
        Harness { ctx, runner, evaluated, stopped, _global: global }
    }

    fn harness(broker: &Arc<PaperBroker>, max_daily_loss: f64) -> Harness {
        let clock = system_clock();
        let orders =
            OrderManager::new(broker.clone(), OrderManagerConfig::default(), clock.clone());
        start_runner(limits(max_daily_loss), clock, orders)
    }

    fn tick_at(price: f64, volume: f64, timestamp: DateTime<Utc>) -> PriceTick {
        PriceTick {
            symbol: SYM.into(),
            price,
            bid_price: price,
            ask_price: price,
            volume,
            timestamp,
        }
    }

    fn tick(price: f64, volume: f64) -> PriceTick {
        tick_at(price, volume, Utc::now())
    }

    async fn wait_until(mut cond: impl FnMut() -> bool) {
        for _ in 0..400 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn one_open_position_and_profit_gating() {
        let broker = paper();
        let h = harness(&broker, 50.0);
        let tx = h.runner.tick_sender();

        tx.send(tick(100.0, 1.0)).await.unwrap();
        wait_until(|| h.runner.position().is_open()).await;
        broker.set_price(SYM, 101.0);

        // Second buy while open, then a sell below the minimum profit.
        tx.send(tick(100.0, 1.0)).await.unwrap();
        tx.send(tick(100.2, 2.0)).await.unwrap();
        tx.send(tick(101.0, 2.0)).await.unwrap();
        wait_until(|| !h.runner.position().is_open()).await;

        let state = h.runner.state();
        assert_eq!(state.trades_count, 2);
        assert!((state.pnl - 0.5).abs() < 1e-9);
        assert!((h.runner.daily_pnl() - 0.5).abs() < 1e-9);
        let trades = h.runner.trades();
        assert_eq!(trades[0].side, OrderSide::Buy);
        assert_eq!(trades[1].side, OrderSide::Sell);
        assert_eq!(trades[1].strategy_name, "scripted");
        assert_eq!(h.ctx.risk.daily_stats("scripted").0, 2);
        assert_eq!(h.ctx.metrics.lock().unwrap().summary().total_trades, 2);

        h.runner.stop().await;
        assert!(!h.runner.is_running());
        assert!(h.stopped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn held_back_sell_still_starts_the_cooldown() {
        let broker = paper();
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 4, 10, 0, 0).unwrap());
        let shared: SharedClock = Arc::new(clock.clone());
        let orders =
            OrderManager::new(broker.clone(), OrderManagerConfig::default(), shared.clone());
        let cooldown = RiskLimits { cooldown_period_sec: 60, ..limits(50.0) };
        let h = start_runner(cooldown, shared, orders);
        let tx = h.runner.tick_sender();

        tx.send(tick_at(100.0, 1.0, clock.now())).await.unwrap();
        wait_until(|| h.runner.position().is_open()).await;

        // Accepted by risk, then held back by the minimum profit.
        clock.advance(chrono::Duration::seconds(61));
        broker.set_price(SYM, 100.2);
        tx.send(tick_at(100.2, 2.0, clock.now())).await.unwrap();
        wait_until(|| h.runner.state().last_signal.is_some_and(|s| s.price == 100.2)).await;
        assert!(h.runner.position().is_open());

        // Profitable, but inside the cooldown of the held-back sell.
        clock.advance(chrono::Duration::seconds(30));
        broker.set_price(SYM, 102.0);
        tx.send(tick_at(102.0, 2.0, clock.now())).await.unwrap();
        tx.send(tick_at(102.0, 0.0, clock.now())).await.unwrap();
        wait_until(|| h.evaluated.load(Ordering::SeqCst) == 4).await;
        assert!(h.runner.position().is_open());
        assert_eq!(h.runner.state().trades_count, 1);

        clock.advance(chrono::Duration::seconds(31));
        tx.send(tick_at(102.0, 2.0, clock.now())).await.unwrap();
        wait_until(|| !h.runner.position().is_open()).await;
        assert_eq!(h.runner.state().trades_count, 2);
        h.runner.stop().await;
    }

    #[tokio::test]
    async fn partial_fill_of_timed_out_order_is_booked() {
        let clock = system_clock();
        let orders = OrderManager::new(
            Arc::new(PartialBroker),
            OrderManagerConfig {
                poll_interval: Duration::from_millis(10),
                order_timeout: Duration::from_millis(80),
            },
            clock.clone(),
        );
        let h = start_runner(limits(50.0), clock, orders);

        h.runner.tick_sender().send(tick(100.0, 1.0)).await.unwrap();
        wait_until(|| h.runner.position().is_open()).await;

        let state = h.runner.state();
        assert!((state.position.quantity - 0.1).abs() < 1e-12);
        assert!((state.position.average_price - 100.0).abs() < 1e-9);
        assert_eq!(state.trades_count, 1);
        assert_eq!(state.last_error.as_deref(), Some("partial fill: timeout"));
        assert_eq!(h.ctx.risk.daily_stats("scripted").0, 1);
        h.runner.stop().await;
    }

    #[tokio::test]
    async fn stop_loss_exit_trips_daily_loss_limit() {
        let broker = paper();
        let h = harness(&broker, 2.0);
        let tx = h.runner.tick_sender();

        tx.send(tick(100.0, 1.0)).await.unwrap();
        wait_until(|| h.runner.position().is_open()).await;

        broker.set_price(SYM, 94.0);
        tx.send(tick(94.0, 0.0)).await.unwrap();
        wait_until(|| !h.runner.is_running()).await;

        let state = h.runner.state();
        assert!(!state.position.is_open());
        assert!((state.pnl + 3.0).abs() < 1e-9);
        assert_eq!(state.last_error.as_deref(), Some("daily loss limit reached"));
        assert_eq!(h.ctx.risk.daily_stats("scripted"), (2, 3.0));
        h.runner.join().await;
        assert!(h.stopped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn start_is_single_shot() {
        let broker = paper();
        let h = harness(&broker, 50.0);
        let (_tx, rx) = stop_channel();
        assert!(matches!(h.runner.start(rx), Err(TradingError::InvalidState(_))));
        h.runner.pause();
        assert!(h.runner.state().is_paused);
        h.runner.resume();
        assert!(!h.runner.is_paused());
        h.runner.stop().await;
        assert!(!h.runner.state().is_running);
    }
}
