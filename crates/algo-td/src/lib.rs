//! # algo-td
//!
//! Order execution for the trading engine.
//!
//! Brokerage adapters implement [`OrderClient`]. The [`OrderManager`] sits on
//! top of one client, shared by every strategy runner, and owns the
//! pending/completed order tables. [`PaperBroker`] is an in-process simulator
//! implementing both [`OrderClient`] and [`algo_md::MarketDataClient`].
//!
//! ## Order lifecycle
//!
//! ```text
//! submit ──► place_order ──► "filled"  ──► completed, Trade returned
//!                       └──► "pending" ──► monitor polls get_order every 5s
//!                                          ├─► filled    ──► Trade
//!                                          ├─► cancelled ──► error
//!                                          └─► timeout   ──► cancel, failed("timeout")
//! ```

pub mod order_manager;
pub mod paper;

use algo_core::{OrderSide, OrderType, TradingError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use order_manager::{OrderManager, OrderManagerConfig};
pub use paper::{PaperBroker, PaperBrokerConfig};

/// Parameters of one order placement call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderPlacement {
    pub client_order_id: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub symbol: String,
    pub quantity: f64,
    /// Limit price, `None` for market orders.
    pub price: Option<f64>,
}

/// An order as the brokerage reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerOrder {
    pub id: String,
    /// Raw brokerage state (`"filled"`, `"open"`, `"canceled"`, ...).
    pub status: String,
    pub filled_qty: f64,
    pub avg_price: f64,
    #[serde(default)]
    pub commission: f64,
}

/// Brokerage order endpoint.
///
/// All operations take `&self` so they can be called concurrently from the
/// order manager's submit path and its monitor tasks.
#[async_trait]
pub trait OrderClient: Send + Sync {
    /// Human-readable client name.
    fn name(&self) -> &str;

    /// Submit a new order. Returns the brokerage's view of it right after
    /// acceptance.
    async fn place_order(&self, order: &OrderPlacement) -> Result<BrokerOrder, TradingError>;

    /// Cancel an open order by brokerage id.
    async fn cancel_order(&self, order_id: &str) -> Result<(), TradingError>;

    /// Current state of an order by brokerage id.
    async fn get_order(&self, order_id: &str) -> Result<BrokerOrder, TradingError>;
}
