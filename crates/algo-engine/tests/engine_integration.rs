//! End-to-end engine scenarios against scripted brokerage clients.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use algo_core::config::{EngineConfig, RiskLimits, StrategyConfig, StrategyKind};
use algo_core::time_util::system_clock;
use algo_core::{Metadata, OrderSide, PriceTick, Quote, Signal, SignalType, Trade, TradingError};
use algo_engine::{Strategy, TradingEngine};
use algo_md::MarketDataClient;
use algo_td::{BrokerOrder, OrderClient, OrderManager, OrderManagerConfig, OrderPlacement};
use async_trait::async_trait;

/// Quotes a fixed price for every symbol.
struct FlatQuotes(f64);

#[async_trait]
impl MarketDataClient for FlatQuotes {
    fn name(&self) -> &str {
        "flat"
    }

    async fn best_bid_ask(&self, symbols: &[String]) -> Result<Vec<Quote>, TradingError> {
        Ok(symbols
            .iter()
            .map(|s| Quote {
                symbol: s.clone(),
                price: self.0,
                bid_price: self.0,
                ask_price: self.0,
                volume: 0.0,
            })
            .collect())
    }
}

/// Accepts every order and never fills it.
#[derive(Default)]
struct RestingBroker {
    seq: AtomicUsize,
    cancels: AtomicUsize,
}

fn open_order(id: String) -> BrokerOrder {
    BrokerOrder { id, status: "open".into(), filled_qty: 0.0, avg_price: 0.0, commission: 0.0 }
}

#[async_trait]
impl OrderClient for RestingBroker {
    fn name(&self) -> &str {
        "resting"
    }

    async fn place_order(&self, _order: &OrderPlacement) -> Result<BrokerOrder, TradingError> {
        let n = self.seq.fetch_add(1, Ordering::SeqCst);
        Ok(open_order(format!("rest-{n}")))
    }

    async fn cancel_order(&self, _order_id: &str) -> Result<(), TradingError> {
        self.cancels.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get_order(&self, order_id: &str) -> Result<BrokerOrder, TradingError> {
        Ok(open_order(order_id.into()))
    }
}

/// Buys once on the first tick.
struct BuyOnce {
    name: String,
    symbol: String,
    fired: bool,
}

impl BuyOnce {
    fn boxed(name: &str, symbol: &str) -> Box<dyn Strategy> {
        Box::new(Self { name: name.into(), symbol: symbol.into(), fired: false })
    }
}

impl Strategy for BuyOnce {
    fn name(&self) -> &str {
        &self.name
    }
    fn symbol(&self) -> &str {
        &self.symbol
    }
    fn kind(&self) -> StrategyKind {
        StrategyKind::Momentum
    }
    fn initialize(&mut self, _: &StrategyConfig) -> Result<(), TradingError> {
        Ok(())
    }
    fn evaluate(&mut self, tick: &PriceTick) -> Result<Vec<Signal>, TradingError> {
        if self.fired {
            return Ok(Vec::new());
        }
        self.fired = true;
        let signal =
            Signal::new(SignalType::Buy, &self.symbol, tick.price, 0.5, 0.9, tick.timestamp);
        Ok(vec![signal])
    }
    fn state(&self) -> Metadata {
        Metadata::new()
    }
    fn reset(&mut self) {
        self.fired = false;
    }
}

fn strategy_config(name: &str, symbol: &str) -> StrategyConfig {
    let mut config = StrategyConfig::new(name, symbol).with_limits(RiskLimits::default());
    config.enabled = true;
    config
}

async fn wait_for<F, Fut>(mut cond: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..400 {
        if cond().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached");
}

/// An engine over a resting broker whose orders would take 30 s to time out.
fn resting_engine(broker: &Arc<RestingBroker>) -> Arc<TradingEngine> {
    let clock = system_clock();
    let orders = OrderManager::new(
        broker.clone(),
        OrderManagerConfig {
            poll_interval: Duration::from_millis(20),
            order_timeout: Duration::from_secs(30),
        },
        clock.clone(),
    );
    TradingEngine::with_orders(EngineConfig::default(), Arc::new(FlatQuotes(100.0)), orders, clock)
}

fn start_buy_once(engine: &TradingEngine, name: &str, symbol: &str) {
    engine
        .start_custom_strategy(strategy_config(name, symbol), BuyOnce::boxed(name, symbol))
        .unwrap();
}

#[tokio::test]
async fn emergency_stop_cancels_pending_orders_and_halts_runners() {
    let broker = Arc::new(RestingBroker::default());
    let engine = resting_engine(&broker);

    assert_eq!(engine.start(&[]).unwrap(), 0);
    start_buy_once(&engine, "btc_once", "BTC-USD");
    start_buy_once(&engine, "eth_once", "ETH-USD");

    let orders = engine.orders();
    wait_for(|| async move { orders.pending_orders().await.len() == 2 }).await;
    assert_eq!(engine.status().active_strategies, 2);

    let cancelled = engine.emergency_stop().await;
    assert_eq!(cancelled, 2);
    assert_eq!(broker.cancels.load(Ordering::SeqCst), 2);

    let states = engine.strategy_states();
    assert_eq!(states.len(), 2);
    assert!(states.iter().all(|s| !s.is_running));
    assert!(states.iter().all(|s| !s.position.is_open()));

    let stats = engine.order_stats().await;
    assert_eq!(stats.pending_orders, 0);
    assert_eq!(stats.cancelled_orders, 2);
    assert!(!engine.status().running);
}

#[tokio::test]
async fn stop_cancels_in_flight_orders_instead_of_waiting_for_timeout() {
    let broker = Arc::new(RestingBroker::default());
    let engine = resting_engine(&broker);
    engine.start(&[]).unwrap();
    start_buy_once(&engine, "btc_once", "BTC-USD");
    start_buy_once(&engine, "eth_once", "ETH-USD");

    let orders = engine.orders();
    wait_for(|| async move { orders.pending_orders().await.len() == 2 }).await;

    let stopped =
        tokio::time::timeout(Duration::from_secs(1), engine.stop_strategy("eth_once")).await;
    assert!(matches!(stopped, Ok(Ok(()))));
    assert_eq!(broker.cancels.load(Ordering::SeqCst), 1);

    let stopped = tokio::time::timeout(Duration::from_secs(1), engine.stop()).await;
    assert!(stopped.is_ok());
    assert_eq!(broker.cancels.load(Ordering::SeqCst), 2);

    let stats = engine.order_stats().await;
    assert_eq!((stats.pending_orders, stats.cancelled_orders), (0, 2));
    let states = engine.strategy_states();
    assert!(states.iter().all(|s| !s.is_running && !s.position.is_open()));
}

#[tokio::test]
async fn engine_daily_loss_cap_triggers_emergency_stop() {
    let clock = system_clock();
    let broker = Arc::new(RestingBroker::default());
    let config = EngineConfig { daily_loss_limit: 100.0, ..EngineConfig::default() };
    let engine = TradingEngine::new(config, Arc::new(FlatQuotes(100.0)), broker, clock);
    engine.start(&[]).unwrap();
    start_buy_once(&engine, "btc_once", "BTC-USD");

    assert!(!engine.check_engine_limits().await);

    let loss = Trade {
        id: "t-1".into(),
        symbol: "BTC-USD".into(),
        side: OrderSide::Sell,
        quantity: 1.0,
        price: 100.0,
        timestamp: chrono::Utc::now(),
        strategy_name: "btc_once".into(),
        pnl: -120.0,
        commission: 0.0,
    };
    engine.risk().record_trade("btc_once", &loss);

    assert!(engine.check_engine_limits().await);
    assert!(!engine.is_running());
    assert!(engine.strategy_states().iter().all(|s| !s.is_running));
}

#[tokio::test]
async fn stopped_engine_can_restart() {
    let clock = system_clock();
    let engine = TradingEngine::new(
        EngineConfig::default(),
        Arc::new(FlatQuotes(2_000.0)),
        Arc::new(RestingBroker::default()),
        clock,
    );
    let configs = [strategy_config("eth_momentum", "ETH-USD")];
    assert_eq!(engine.start(&configs).unwrap(), 1);
    engine.stop().await;
    assert!(!engine.status().running);

    assert_eq!(engine.start(&configs).unwrap(), 1);
    assert_eq!(engine.status().active_strategies, 1);
    assert_eq!(engine.strategy_states().len(), 1);
    engine.stop().await;
}
