//! # algo-md
//!
//! Market data for the trading engine.
//!
//! - [`MarketDataClient`]: the quote-source contract implemented by brokerage
//!   adapters (and the paper broker in `algo-td`)
//! - [`price_feed`]: [`PriceFeed`], a per-symbol polling loop that fans each
//!   tick out to bounded subscriber queues

pub mod price_feed;

use algo_core::{Quote, TradingError};
use async_trait::async_trait;

pub use price_feed::PriceFeed;

/// Source of best bid/ask quotes.
///
/// Implementations are shared between feeds, so `Sync` is required.
#[async_trait]
pub trait MarketDataClient: Send + Sync {
    /// Human-readable client name.
    fn name(&self) -> &str;

    /// Latest quote for each requested symbol. Symbols the source does not
    /// know are omitted from the result.
    async fn best_bid_ask(&self, symbols: &[String]) -> Result<Vec<Quote>, TradingError>;
}
