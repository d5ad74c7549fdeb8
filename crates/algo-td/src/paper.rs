//! In-process paper brokerage.
//!
//! Quotes follow a bounded random walk per symbol. Market orders fill at the
//! touch (ask for buys, bid for sells) immediately. Limit orders that do not
//! cross stay `open` until a later quote crosses them.

use std::collections::VecDeque;
use std::sync::Mutex;

use ahash::AHashMap;
use algo_core::{OrderSide, OrderType, Quote, TradingError};
use algo_md::MarketDataClient;
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};
use uuid::Uuid;

use crate::{BrokerOrder, OrderClient, OrderPlacement};

/// Simulator knobs.
#[derive(Debug, Clone, PartialEq)]
pub struct PaperBrokerConfig {
    /// Maximum relative move per quote request (0.002 = ±0.2 %).
    pub step: f64,
    /// Half-spread as a fraction of the mid price.
    pub half_spread: f64,
    /// Commission as a fraction of fill notional.
    pub commission_rate: f64,
    /// Upper bound of the simulated per-quote volume.
    pub max_volume: f64,
    /// RNG seed, `None` for entropy.
    pub seed: Option<u64>,
    /// Filled and cancelled orders kept queryable; older ones are forgotten.
    pub order_history: usize,
}

impl Default for PaperBrokerConfig {
    fn default() -> Self {
        Self {
            step: 0.002,
            half_spread: 0.0005,
            commission_rate: 0.0,
            max_volume: 5_000.0,
            seed: None,
            order_history: 1_024,
        }
    }
}

#[derive(Debug, Clone)]
struct PaperOrder {
    side: OrderSide,
    symbol: String,
    quantity: f64,
    limit: Option<f64>,
    state: &'static str,
    filled_qty: f64,
    avg_price: f64,
    commission: f64,
}

impl PaperOrder {
    fn to_broker(&self, id: &str) -> BrokerOrder {
        BrokerOrder {
            id: id.to_string(),
            status: self.state.to_string(),
            filled_qty: self.filled_qty,
            avg_price: self.avg_price,
            commission: self.commission,
        }
    }
}

struct PaperState {
    mids: AHashMap<String, f64>,
    orders: AHashMap<String, PaperOrder>,
    /// Terminal order ids, oldest first.
    terminal: VecDeque<String>,
    rng: StdRng,
}

impl PaperState {
    fn retire(&mut self, id: String, history: usize) {
        self.terminal.push_back(id);
        while self.terminal.len() > history {
            if let Some(old) = self.terminal.pop_front() {
                self.orders.remove(&old);
            }
        }
    }
}

/// Simulated brokerage implementing both client contracts.
pub struct PaperBroker {
    config: PaperBrokerConfig,
    state: Mutex<PaperState>,
}

impl PaperBroker {
    pub fn new(config: PaperBrokerConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            config,
            state: Mutex::new(PaperState {
                mids: AHashMap::new(),
                orders: AHashMap::new(),
                terminal: VecDeque::new(),
                rng,
            }),
        }
    }

    /// Seed or overwrite the mid price of `symbol`. Open limit orders are
    /// re-checked against the new price.
    pub fn set_price(&self, symbol: &str, price: f64) {
        let mut state = self.lock();
        state.mids.insert(symbol.to_string(), price);
        self.match_limits(&mut state, symbol);
    }

    pub fn with_price(self, symbol: &str, price: f64) -> Self {
        self.set_price(symbol, price);
        self
    }

    pub fn price(&self, symbol: &str) -> Option<f64> {
        self.lock().mids.get(symbol).copied()
    }

    pub fn open_order_count(&self) -> usize {
        self.lock().orders.values().filter(|o| o.state == "open").count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PaperState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn touch(&self, mid: f64) -> (f64, f64) {
        (mid * (1.0 - self.config.half_spread), mid * (1.0 + self.config.half_spread))
    }

    fn fill(&self, order: &mut PaperOrder, price: f64) {
        order.state = "filled";
        order.filled_qty = order.quantity;
        order.avg_price = price;
        order.commission = order.quantity * price * self.config.commission_rate;
    }

    /// Fill every open limit order on `symbol` the current touch crosses.
    fn match_limits(&self, state: &mut PaperState, symbol: &str) {
        let Some(&mid) = state.mids.get(symbol) else {
            return;
        };
        let (bid, ask) = self.touch(mid);
        let mut filled = Vec::new();
        for (id, order) in state.orders.iter_mut() {
            if order.state != "open" || order.symbol != symbol {
                continue;
            }
            let Some(limit) = order.limit else { continue };
            let crossed = match order.side {
                OrderSide::Buy => ask <= limit,
                OrderSide::Sell => bid >= limit,
            };
            if crossed {
                self.fill(order, limit);
                debug!("[paper] limit {id} {} {} filled @ {limit}", order.side, order.symbol);
                filled.push(id.clone());
            }
        }
        for id in filled {
            state.retire(id, self.config.order_history);
        }
    }
}

#[async_trait]
impl MarketDataClient for PaperBroker {
    fn name(&self) -> &str {
        "paper"
    }

    async fn best_bid_ask(&self, symbols: &[String]) -> Result<Vec<Quote>, TradingError> {
        let mut state = self.lock();
        let mut quotes = Vec::with_capacity(symbols.len());
        for symbol in symbols {
            let step = self.config.step;
            let change = if step > 0.0 { state.rng.gen_range(-step..step) } else { 0.0 };
            let max_volume = self.config.max_volume;
            let volume = if max_volume > 0.0 { state.rng.gen_range(0.0..max_volume) } else { 0.0 };
            let Some(mid) = state.mids.get_mut(symbol) else {
                continue;
            };
            *mid = (*mid * (1.0 + change)).max(1e-8);
            let mid = *mid;
            let (bid, ask) = self.touch(mid);
            quotes.push(Quote {
                symbol: symbol.clone(),
                price: mid,
                bid_price: bid,
                ask_price: ask,
                volume,
            });
            self.match_limits(&mut state, symbol);
        }
        Ok(quotes)
    }
}

#[async_trait]
impl OrderClient for PaperBroker {
    fn name(&self) -> &str {
        "paper"
    }

    async fn place_order(&self, placement: &OrderPlacement) -> Result<BrokerOrder, TradingError> {
        let mut state = self.lock();
        let mid = *state
            .mids
            .get(&placement.symbol)
            .ok_or_else(|| TradingError::Broker(format!("unknown symbol {}", placement.symbol)))?;
        if !placement.quantity.is_finite() || placement.quantity <= 0.0 {
            return Err(TradingError::Broker(format!("invalid quantity {}", placement.quantity)));
        }

        let (bid, ask) = self.touch(mid);
        let touch = match placement.side {
            OrderSide::Buy => ask,
            OrderSide::Sell => bid,
        };
        let limit = match placement.order_type {
            OrderType::Market => None,
            OrderType::Limit => Some(placement.price.ok_or_else(|| {
                TradingError::Broker("limit order without price".to_string())
            })?),
        };

        let mut order = PaperOrder {
            side: placement.side,
            symbol: placement.symbol.clone(),
            quantity: placement.quantity,
            limit,
            state: "open",
            filled_qty: 0.0,
            avg_price: 0.0,
            commission: 0.0,
        };
        match limit {
            None => self.fill(&mut order, touch),
            Some(px) => {
                let crossed = match placement.side {
                    OrderSide::Buy => touch <= px,
                    OrderSide::Sell => touch >= px,
                };
                if crossed {
                    self.fill(&mut order, px);
                }
            }
        }

        let id = Uuid::new_v4().to_string();
        info!(
            "[paper] {} {} {:.8} {} -> {} ({})",
            placement.order_type.as_str(),
            placement.side,
            placement.quantity,
            placement.symbol,
            order.state,
            placement.client_order_id
        );
        let ack = order.to_broker(&id);
        let terminal = order.state != "open";
        state.orders.insert(id.clone(), order);
        if terminal {
            state.retire(id, self.config.order_history);
        }
        Ok(ack)
    }

    async fn cancel_order(&self, order_id: &str) -> Result<(), TradingError> {
        let mut state = self.lock();
        let order = state
            .orders
            .get_mut(order_id)
            .ok_or_else(|| TradingError::Broker(format!("unknown order {order_id}")))?;
        if order.state != "open" {
            return Err(TradingError::Broker(format!("order {order_id} is {}", order.state)));
        }
        order.state = "canceled";
        state.retire(order_id.to_string(), self.config.order_history);
        Ok(())
    }

    async fn get_order(&self, order_id: &str) -> Result<BrokerOrder, TradingError> {
        self.lock()
            .orders
            .get(order_id)
            .map(|o| o.to_broker(order_id))
            .ok_or_else(|| TradingError::Broker(format!("unknown order {order_id}")))
    }
}
