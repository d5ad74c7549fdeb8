//! Per-symbol polling price feed.
//!
//! ```text
//! interval ──► best_bid_ask([symbol]) ──► PriceTick ──► try_send ──► subscriber 1
//!                                                              └─► subscriber N
//! ```
//!
//! Delivery is best-effort: a subscriber whose queue is full misses that tick,
//! other subscribers are unaffected. A failed fetch skips the cycle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use algo_core::shutdown::{stop_channel, stop_requested};
use algo_core::time_util::SharedClock;
use algo_core::{PriceTick, TradingError};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::MarketDataClient;

struct FeedShared {
    symbol: String,
    client: Arc<dyn MarketDataClient>,
    clock: SharedClock,
    subscribers: RwLock<Vec<mpsc::Sender<PriceTick>>>,
    last_tick: RwLock<Option<PriceTick>>,
    running: AtomicBool,
}

impl FeedShared {
    async fn fetch(&self) -> Result<PriceTick, TradingError> {
        let quotes = self.client.best_bid_ask(std::slice::from_ref(&self.symbol)).await?;
        let quote = quotes
            .into_iter()
            .find(|q| q.symbol == self.symbol)
            .ok_or_else(|| TradingError::Feed(format!("no quote for {}", self.symbol)))?;
        if !(quote.price.is_finite() && quote.price > 0.0) {
            let msg = format!("bad price {} for {}", quote.price, self.symbol);
            return Err(TradingError::Feed(msg));
        }
        let tick = PriceTick::from_quote(quote, self.clock.now());
        *self.last_tick.write().unwrap_or_else(|e| e.into_inner()) = Some(tick.clone());
        Ok(tick)
    }

    /// Push `tick` to every subscriber without blocking. Returns the number of
    /// subscribers that received it.
    fn publish(&self, tick: &PriceTick) -> usize {
        let mut delivered = 0;
        let mut closed = false;
        {
            let subs = self.subscribers.read().unwrap_or_else(|e| e.into_inner());
            for tx in subs.iter() {
                match tx.try_send(tick.clone()) {
                    Ok(()) => delivered += 1,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        debug!("[feed:{}] subscriber queue full, tick dropped", self.symbol);
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => closed = true,
                }
            }
        }
        if closed {
            self.subscribers
                .write()
                .unwrap_or_else(|e| e.into_inner())
                .retain(|tx| !tx.is_closed());
        }
        delivered
    }

    async fn poll(&self) {
        match self.fetch().await {
            Ok(tick) => {
                self.publish(&tick);
            }
            Err(e) => warn!("[feed:{}] fetch failed, skipping cycle: {e}", self.symbol),
        }
    }
}

struct FeedTask {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Polls one symbol on a fixed interval and fans ticks out to subscribers.
pub struct PriceFeed {
    shared: Arc<FeedShared>,
    interval: Duration,
    task: Mutex<Option<FeedTask>>,
}

impl PriceFeed {
    pub fn new(
        symbol: impl Into<String>,
        client: Arc<dyn MarketDataClient>,
        interval: Duration,
        clock: SharedClock,
    ) -> Self {
        Self {
            shared: Arc::new(FeedShared {
                symbol: symbol.into(),
                client,
                clock,
                subscribers: RwLock::new(Vec::new()),
                last_tick: RwLock::new(None),
                running: AtomicBool::new(false),
            }),
            interval,
            task: Mutex::new(None),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.shared.symbol
    }

    /// Spawn the polling task. The first fetch happens immediately.
    ///
    /// The task ends on [`stop`](Self::stop) or when `global` flips to `true`
    /// (or its sender is dropped). Calling `start` on a running feed is a no-op.
    pub fn start(&self, mut global: watch::Receiver<bool>) {
        let mut slot = self.task.lock().unwrap_or_else(|e| e.into_inner());
        if self.shared.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let (stop_tx, mut stop_rx) = stop_channel();
        let shared = Arc::clone(&self.shared);
        let period = self.interval;

        let handle = tokio::spawn(async move {
            info!("[feed:{}] started, interval {:?}", shared.symbol, period);
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = stop_requested(&mut stop_rx) => break,
                    _ = stop_requested(&mut global) => break,
                    _ = ticker.tick() => shared.poll().await,
                }
            }
            shared.running.store(false, Ordering::SeqCst);
            info!("[feed:{}] stopped", shared.symbol);
        });

        *slot = Some(FeedTask { stop_tx, handle });
    }

    /// Signal the polling task to exit. Does not wait for it.
    pub fn stop(&self) {
        let task = self.task.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(task) = task {
            let _ = task.stop_tx.send(true);
            drop(task.handle);
        }
        self.shared.running.store(false, Ordering::SeqCst);
    }

    /// Register a delivery target.
    pub fn subscribe(&self, tx: mpsc::Sender<PriceTick>) {
        self.shared.subscribers.write().unwrap_or_else(|e| e.into_inner()).push(tx);
    }

    /// Deregister every handle to the same queue as `tx`.
    pub fn unsubscribe(&self, tx: &mpsc::Sender<PriceTick>) {
        self.shared
            .subscribers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|s| !s.same_channel(tx));
    }

    pub fn subscriber_count(&self) -> usize {
        self.shared.subscribers.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Most recent tick, without waiting for the next fetch.
    pub fn last_tick(&self) -> Option<PriceTick> {
        self.shared.last_tick.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Fetch and publish once, outside the timer. Returns the tick and the
    /// number of subscribers that received it.
    pub async fn fetch_once(&self) -> Result<(PriceTick, usize), TradingError> {
        let tick = self.shared.fetch().await?;
        let delivered = self.shared.publish(&tick);
        Ok((tick, delivered))
    }
}

impl Drop for PriceFeed {
    fn drop(&mut self) {
        self.stop();
    }
}
