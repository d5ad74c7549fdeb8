//! Trading-related data structures: signals, orders, trades, positions, and
//! the per-strategy state snapshot.
//!
//! These types flow between the strategies, the risk manager, the order
//! manager and the display layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::enums::{OrderSide, OrderStatus, OrderType, SignalType};

/// Free-form, strategy-specific indicator values.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

// ---------------------------------------------------------------------------
// Signal (strategy → runner)
// ---------------------------------------------------------------------------

/// A strategy's recommendation, not yet risk-checked or executed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    #[serde(rename = "type")]
    pub signal_type: SignalType,
    pub symbol: String,
    /// Reference price the signal was computed at.
    pub price: f64,
    /// Suggested quantity in base units.
    pub quantity: f64,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Signal {
    pub fn new(
        signal_type: SignalType,
        symbol: impl Into<String>,
        price: f64,
        quantity: f64,
        confidence: f64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            signal_type,
            symbol: symbol.into(),
            price,
            quantity,
            confidence: confidence.clamp(0.0, 1.0),
            timestamp,
            metadata: Metadata::new(),
        }
    }

    /// Attach one metadata entry.
    pub fn with_meta(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    /// Notional value implied by the signal.
    #[inline]
    pub fn notional(&self) -> f64 {
        self.quantity * self.price
    }
}

impl std::fmt::Display for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {:.8} {} @ {:.6} (conf={:.2})",
            self.signal_type, self.quantity, self.symbol, self.price, self.confidence
        )
    }
}

// ---------------------------------------------------------------------------
// Orders (runner → order manager)
// ---------------------------------------------------------------------------

/// An order request handed to the order manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    pub quantity: f64,
    /// Limit price, `None` for market orders.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
}

impl OrderRequest {
    pub fn market(symbol: impl Into<String>, side: OrderSide, quantity: f64) -> Self {
        Self { symbol: symbol.into(), side, order_type: OrderType::Market, quantity, price: None }
    }

    pub fn limit(symbol: impl Into<String>, side: OrderSide, quantity: f64, price: f64) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            order_type: OrderType::Limit,
            quantity,
            price: Some(price),
        }
    }
}

/// An order tracked through its lifecycle by the order manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRecord {
    /// Brokerage-assigned id, empty until the brokerage acknowledged the order.
    pub id: String,
    /// Locally generated unique client order id.
    pub client_id: String,
    pub symbol: String,
    pub side: OrderSide,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    pub quantity: f64,
    pub price: Option<f64>,
    pub status: OrderStatus,
    pub filled_qty: f64,
    pub avg_price: f64,
    pub submit_time: DateTime<Utc>,
    pub complete_time: Option<DateTime<Utc>>,
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_msg: Option<String>,
}

impl OrderRecord {
    /// A fresh `pending` record for `request`.
    pub fn pending(client_id: String, request: &OrderRequest, now: DateTime<Utc>) -> Self {
        Self {
            id: String::new(),
            client_id,
            symbol: request.symbol.clone(),
            side: request.side,
            order_type: request.order_type,
            quantity: request.quantity,
            price: request.price,
            status: OrderStatus::Pending,
            filled_qty: 0.0,
            avg_price: 0.0,
            submit_time: now,
            complete_time: None,
            retry_count: 0,
            error_msg: None,
        }
    }
}

/// Order execution statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderStats {
    /// Orders that reached a terminal state.
    pub total_orders: usize,
    pub pending_orders: usize,
    pub filled_orders: usize,
    pub cancelled_orders: usize,
    pub failed_orders: usize,
    /// `filled / total`, `0.0` when nothing completed yet.
    pub fill_rate: f64,
}

// ---------------------------------------------------------------------------
// Trade
// ---------------------------------------------------------------------------

/// An immutable completed fill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: f64,
    pub price: f64,
    pub timestamp: DateTime<Utc>,
    /// Owning strategy, filled in by the runner.
    #[serde(default)]
    pub strategy_name: String,
    /// Realized P&L for sells, `0.0` for buys.
    pub pnl: f64,
    pub commission: f64,
}

impl Trade {
    #[inline]
    pub fn notional(&self) -> f64 {
        self.quantity * self.price
    }
}

// ---------------------------------------------------------------------------
// Position
// ---------------------------------------------------------------------------

/// A strategy's holding in one symbol.
///
/// `average_price` is the volume-weighted cost of all buys since the position
/// was last flat. Sells only reduce `quantity`; once it reaches zero the
/// position is reset to the flat state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub quantity: f64,
    pub average_price: f64,
    pub market_value: f64,
    pub unrealized_pnl: f64,
    pub open_time: Option<DateTime<Utc>>,
}

impl Position {
    /// The zero state for `symbol`.
    pub fn flat(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            quantity: 0.0,
            average_price: 0.0,
            market_value: 0.0,
            unrealized_pnl: 0.0,
            open_time: None,
        }
    }

    #[inline]
    pub fn is_open(&self) -> bool {
        self.quantity > 0.0
    }

    #[inline]
    pub fn cost_basis(&self) -> f64 {
        self.quantity * self.average_price
    }

    /// Unrealized profit versus average cost at `price`, in percent.
    pub fn unrealized_pnl_percent(&self, price: f64) -> f64 {
        let cost = self.cost_basis();
        if cost <= 0.0 {
            return 0.0;
        }
        (self.quantity * price - cost) / cost * 100.0
    }

    /// Revalue the position at `price`.
    pub fn mark(&mut self, price: f64) {
        if self.is_open() {
            self.market_value = self.quantity * price;
            self.unrealized_pnl = self.market_value - self.cost_basis();
        }
    }

    /// Add a buy fill using weighted-average cost.
    pub fn apply_buy(&mut self, quantity: f64, price: f64, at: DateTime<Utc>) {
        if quantity <= 0.0 {
            return;
        }
        let old_qty = self.quantity.max(0.0);
        let total_cost = old_qty * self.average_price + quantity * price;
        self.quantity = old_qty + quantity;
        self.average_price = total_cost / self.quantity;
        if self.open_time.is_none() {
            self.open_time = Some(at);
        }
        self.mark(price);
    }

    /// Remove a sell fill and return the realized P&L net of `commission`.
    ///
    /// `quantity` is clamped to the held amount. `average_price` is untouched
    /// unless the position goes flat.
    pub fn apply_sell(&mut self, quantity: f64, price: f64, commission: f64) -> f64 {
        let quantity = quantity.min(self.quantity).max(0.0);
        let realized = quantity * price - quantity * self.average_price - commission;
        self.quantity -= quantity;
        if self.quantity <= 0.0 {
            *self = Self::flat(std::mem::take(&mut self.symbol));
        } else {
            self.mark(price);
        }
        realized
    }
}

// ---------------------------------------------------------------------------
// StrategyState (display snapshot)
// ---------------------------------------------------------------------------

/// Read-only snapshot of one strategy runner, rebuilt on every query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyState {
    pub name: String,
    pub symbol: String,
    pub is_running: bool,
    pub is_paused: bool,
    pub position: Position,
    pub last_signal: Option<Signal>,
    pub trades_count: usize,
    /// Cumulative realized P&L.
    pub pnl: f64,
    pub start_time: DateTime<Utc>,
    pub last_update_time: DateTime<Utc>,
    pub last_error: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl StrategyState {
    pub fn new(name: impl Into<String>, symbol: impl Into<String>, now: DateTime<Utc>) -> Self {
        let symbol = symbol.into();
        Self {
            name: name.into(),
            position: Position::flat(symbol.clone()),
            symbol,
            is_running: false,
            is_paused: false,
            last_signal: None,
            trades_count: 0,
            pnl: 0.0,
            start_time: now,
            last_update_time: now,
            last_error: None,
            metadata: Metadata::new(),
        }
    }
}
