//! Order submission and lifecycle tracking.
//!
//! One [`OrderManager`] is shared by all strategy runners. Its pending and
//! completed tables sit behind a single `tokio::sync::RwLock`: readers for
//! stats and listings, writers for submit, cancel and monitor updates. The
//! lock is never held across a brokerage call.
//!
//! Every order leaves `pending` exactly once. Whoever removes it from the
//! pending table (monitor fill, monitor timeout, explicit cancel) owns the
//! transition; later attempts find nothing and do nothing.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use ahash::AHashMap;
use algo_core::config::EngineConfig;
use algo_core::time_util::SharedClock;
use algo_core::{OrderRecord, OrderRequest, OrderStats, OrderStatus, OrderType, Trade, TradingError};
use tokio::sync::{RwLock, oneshot};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{BrokerOrder, OrderClient, OrderPlacement};

/// Monitor timing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrderManagerConfig {
    /// How often a pending order's status is polled.
    pub poll_interval: Duration,
    /// Lifetime of a pending order before it is cancelled as timed out.
    pub order_timeout: Duration,
}

impl Default for OrderManagerConfig {
    fn default() -> Self {
        Self { poll_interval: Duration::from_secs(5), order_timeout: Duration::from_secs(300) }
    }
}

impl OrderManagerConfig {
    pub fn from_engine(config: &EngineConfig) -> Self {
        Self { order_timeout: config.order_timeout(), ..Self::default() }
    }
}

type Verdict = Result<Trade, TradingError>;

struct PendingOrder {
    record: OrderRecord,
    waiter: Option<oneshot::Sender<Verdict>>,
    commission: f64,
}

#[derive(Default)]
struct OrderBook {
    /// Keyed by brokerage order id.
    pending: AHashMap<String, PendingOrder>,
    completed: Vec<OrderRecord>,
}

struct Inner {
    client: Arc<dyn OrderClient>,
    clock: SharedClock,
    config: OrderManagerConfig,
    book: RwLock<OrderBook>,
}

/// Submits orders and tracks them to a terminal state.
///
/// Cheap to clone; clones share the same tables.
#[derive(Clone)]
pub struct OrderManager {
    inner: Arc<Inner>,
}

impl OrderManager {
    pub fn new(
        client: Arc<dyn OrderClient>,
        config: OrderManagerConfig,
        clock: SharedClock,
    ) -> Self {
        let book = RwLock::new(OrderBook::default());
        Self { inner: Arc::new(Inner { client, clock, config, book }) }
    }

    /// Submit `request` and resolve to the resulting fill.
    ///
    /// An immediate fill returns at once. Otherwise the order is monitored in
    /// the background and this call resolves with the monitor's verdict:
    /// a fill becomes a [`Trade`], cancellation a `Broker` error and expiry a
    /// `Timeout` error. An order that ends early with part of it executed
    /// resolves to `PartialFill` carrying that part. Placement failures are
    /// recorded as `failed` and returned without retry.
    pub async fn submit_order(&self, request: OrderRequest) -> Result<Trade, TradingError> {
        self.submit_order_until(request, std::future::pending()).await
    }

    /// [`submit_order`](Self::submit_order) for a caller that may be asked to
    /// stop. Once `stop` resolves, a still-pending order is cancelled and the
    /// call returns that verdict instead of waiting for the fill or timeout.
    pub async fn submit_order_until<F>(
        &self,
        request: OrderRequest,
        stop: F,
    ) -> Result<Trade, TradingError>
    where
        F: Future<Output = ()>,
    {
        if !(request.quantity.is_finite() && request.quantity > 0.0) {
            return Err(TradingError::Validation(format!("invalid quantity {}", request.quantity)));
        }
        if request.order_type == OrderType::Limit && request.price.is_none() {
            return Err(TradingError::Validation("limit order without price".into()));
        }

        let inner = &self.inner;
        let client_id = Uuid::new_v4().to_string();
        let mut record = OrderRecord::pending(client_id.clone(), &request, inner.clock.now());

        let placement = OrderPlacement {
            client_order_id: client_id,
            side: request.side,
            order_type: request.order_type,
            symbol: request.symbol.clone(),
            quantity: request.quantity,
            price: request.price,
        };

        let ack = match inner.client.place_order(&placement).await {
            Ok(ack) => ack,
            Err(e) => {
                warn!(
                    "[orders] {} {} {:.8} placement failed: {e}",
                    request.side, request.symbol, request.quantity
                );
                record.status = OrderStatus::Failed;
                record.error_msg = Some(e.to_string());
                record.complete_time = Some(inner.clock.now());
                inner.book.write().await.completed.push(record);
                return Err(match e {
                    TradingError::Broker(_) => e,
                    other => TradingError::Broker(other.to_string()),
                });
            }
        };

        record.id = ack.id.clone();
        record.filled_qty = ack.filled_qty;
        record.avg_price = ack.avg_price;
        let status = OrderStatus::from_broker_state(&ack.status);

        if status.is_terminal() {
            record.status = status;
            record.complete_time = Some(inner.clock.now());
            let verdict = inner.verdict(&record, ack.commission);
            info!("[orders] {} {} {} -> {}", record.id, record.side, record.symbol, record.status);
            inner.book.write().await.completed.push(record);
            return verdict;
        }

        let (tx, rx) = oneshot::channel();
        let order_id = record.id.clone();
        inner.book.write().await.pending.insert(
            order_id.clone(),
            PendingOrder { record, waiter: Some(tx), commission: ack.commission },
        );
        info!("[orders] {order_id} pending, monitoring");
        tokio::spawn(Arc::clone(inner).monitor(order_id.clone()));

        let mut rx = rx;
        tokio::pin!(stop);
        let verdict = tokio::select! {
            verdict = &mut rx => verdict,
            _ = &mut stop => {
                info!("[orders] {order_id} cancelled, submitter stopping");
                if let Err(e) = inner.cancel(&order_id, "stopped").await {
                    debug!("[orders] stop cancel of {order_id}: {e}");
                }
                rx.await
            }
        };
        verdict.unwrap_or_else(|_| {
            Err(TradingError::InvalidState(format!("order {order_id} dropped without a verdict")))
        })
    }

    /// Cancel one pending order at the brokerage.
    ///
    /// On success the order becomes `cancelled`; if the brokerage refuses, it
    /// becomes `failed` and the error is returned.
    pub async fn cancel_order(&self, order_id: &str) -> Result<(), TradingError> {
        self.inner.cancel(order_id, "cancelled").await
    }

    /// Cancel every pending order regardless of which runner placed it.
    /// Returns how many were cancelled successfully.
    pub async fn cancel_all_orders(&self) -> usize {
        let ids: Vec<String> = self.inner.book.read().await.pending.keys().cloned().collect();
        let mut cancelled = 0;
        for id in ids {
            match self.inner.cancel(&id, "emergency_stop").await {
                Ok(()) => cancelled += 1,
                Err(e) => warn!("[orders] cancel {id} failed: {e}"),
            }
        }
        info!("[orders] cancel-all: {cancelled} cancelled");
        cancelled
    }

    pub async fn pending_orders(&self) -> Vec<OrderRecord> {
        let book = self.inner.book.read().await;
        let mut orders: Vec<OrderRecord> =
            book.pending.values().map(|p| p.record.clone()).collect();
        orders.sort_by_key(|o| o.submit_time);
        orders
    }

    pub async fn completed_orders(&self) -> Vec<OrderRecord> {
        self.inner.book.read().await.completed.clone()
    }

    pub async fn stats(&self) -> OrderStats {
        let book = self.inner.book.read().await;
        let mut stats = OrderStats {
            total_orders: book.completed.len(),
            pending_orders: book.pending.len(),
            ..OrderStats::default()
        };
        for order in &book.completed {
            match order.status {
                OrderStatus::Filled => stats.filled_orders += 1,
                OrderStatus::Cancelled => stats.cancelled_orders += 1,
                OrderStatus::Failed => stats.failed_orders += 1,
                OrderStatus::Pending => {}
            }
        }
        if stats.total_orders > 0 {
            stats.fill_rate = stats.filled_orders as f64 / stats.total_orders as f64;
        }
        stats
    }
}

impl Inner {
    /// The executed part of `record` as a trade.
    fn fill_of(&self, record: &OrderRecord, commission: f64) -> Trade {
        let quantity = if record.filled_qty > 0.0 { record.filled_qty } else { record.quantity };
        let price = if record.avg_price > 0.0 {
            record.avg_price
        } else {
            record.price.unwrap_or(0.0)
        };
        Trade {
            id: record.id.clone(),
            symbol: record.symbol.clone(),
            side: record.side,
            quantity,
            price,
            timestamp: record.complete_time.unwrap_or_else(|| self.clock.now()),
            strategy_name: String::new(),
            pnl: 0.0,
            commission,
        }
    }

    fn verdict(&self, record: &OrderRecord, commission: f64) -> Verdict {
        match record.status {
            OrderStatus::Filled => Ok(self.fill_of(record, commission)),
            status if record.filled_qty > 0.0 => {
                let reason = record.error_msg.clone().unwrap_or_else(|| status.to_string());
                warn!(
                    "[orders] {} ended {status} with {:.8} of {:.8} filled",
                    record.id, record.filled_qty, record.quantity
                );
                Err(TradingError::PartialFill {
                    fill: Box::new(self.fill_of(record, commission)),
                    reason,
                })
            }
            OrderStatus::Failed if record.error_msg.as_deref() == Some("timeout") => {
                Err(TradingError::Timeout(format!("order {} timed out", record.id)))
            }
            status => Err(TradingError::Broker(format!(
                "order {} {}{}",
                record.id,
                status,
                record.error_msg.as_ref().map(|m| format!(": {m}")).unwrap_or_default()
            ))),
        }
    }

    /// Move `order_id` out of the pending table into `status`. Returns `false`
    /// if another path already completed it.
    async fn finalize(
        &self,
        order_id: &str,
        status: OrderStatus,
        update: Option<&BrokerOrder>,
        error_msg: Option<String>,
    ) -> bool {
        let mut book = self.book.write().await;
        let Some(mut pending) = book.pending.remove(order_id) else {
            return false;
        };
        let record = &mut pending.record;
        if let Some(update) = update {
            record.filled_qty = update.filled_qty;
            record.avg_price = update.avg_price;
            pending.commission = update.commission;
        }
        record.status = status;
        record.error_msg = error_msg;
        record.complete_time = Some(self.clock.now());

        info!("[orders] {order_id} -> {status}");
        let verdict = self.verdict(record, pending.commission);
        if let Some(waiter) = pending.waiter.take() {
            let _ = waiter.send(verdict);
        }
        book.completed.push(pending.record);
        true
    }

    async fn is_pending(&self, order_id: &str) -> bool {
        self.book.read().await.pending.contains_key(order_id)
    }

    async fn cancel(&self, order_id: &str, reason: &str) -> Result<(), TradingError> {
        if !self.is_pending(order_id).await {
            return Err(TradingError::InvalidState(format!("order {order_id} is not pending")));
        }
        match self.client.cancel_order(order_id).await {
            Ok(()) => {
                let reason = Some(reason.to_string());
                self.finalize(order_id, OrderStatus::Cancelled, None, reason).await;
                Ok(())
            }
            Err(e) => {
                let msg = format!("cancel failed: {e}");
                self.finalize(order_id, OrderStatus::Failed, None, Some(msg.clone())).await;
                Err(TradingError::Broker(msg))
            }
        }
    }

    async fn expire(&self, order_id: &str) {
        if !self.is_pending(order_id).await {
            return;
        }
        warn!("[orders] {order_id} timed out after {:?}, cancelling", self.config.order_timeout);
        if let Err(e) = self.client.cancel_order(order_id).await {
            warn!("[orders] cancel of timed-out {order_id} failed: {e}");
        }
        self.finalize(order_id, OrderStatus::Failed, None, Some("timeout".to_string())).await;
    }

    /// Poll one pending order until it completes or expires.
    async fn monitor(self: Arc<Self>, order_id: String) {
        let poll = self.config.poll_interval;
        let deadline = tokio::time::sleep(self.config.order_timeout);
        tokio::pin!(deadline);
        let mut ticker = tokio::time::interval_at(Instant::now() + poll, poll);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = &mut deadline => {
                    self.expire(&order_id).await;
                    return;
                }
                _ = ticker.tick() => {
                    if !self.is_pending(&order_id).await {
                        return;
                    }
                    match self.client.get_order(&order_id).await {
                        Ok(update) => {
                            let status = OrderStatus::from_broker_state(&update.status);
                            if status.is_terminal() {
                                self.finalize(&order_id, status, Some(&update), None).await;
                                return;
                            }
                            debug!(
                                "[orders] {order_id} still {} ({:.8} filled)",
                                update.status, update.filled_qty
                            );
                            if let Some(p) = self.book.write().await.pending.get_mut(&order_id) {
                                p.record.filled_qty = update.filled_qty;
                                p.record.avg_price = update.avg_price;
                                p.commission = update.commission;
                            }
                        }
                        Err(e) => warn!("[orders] status poll for {order_id} failed: {e}"),
                    }
                }
            }
        }
    }
}
