//! Market data structures flowing from the price feed to the runners.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Best bid / ask quote as returned by the market-data provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    /// Mid / reference price.
    pub price: f64,
    pub bid_price: f64,
    pub ask_price: f64,
    /// Traded volume since the previous quote, `0.0` if the provider has none.
    #[serde(default)]
    pub volume: f64,
}

/// One price observation for a symbol. Immutable once built by the feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceTick {
    pub symbol: String,
    pub price: f64,
    pub bid_price: f64,
    pub ask_price: f64,
    pub volume: f64,
    pub timestamp: DateTime<Utc>,
}

impl PriceTick {
    /// Build a tick from a provider quote stamped at `timestamp`.
    pub fn from_quote(quote: Quote, timestamp: DateTime<Utc>) -> Self {
        Self {
            symbol: quote.symbol,
            price: quote.price,
            bid_price: quote.bid_price,
            ask_price: quote.ask_price,
            volume: quote.volume,
            timestamp,
        }
    }

    /// Bid/ask spread as a fraction of the price.
    pub fn spread_ratio(&self) -> f64 {
        if self.price > 0.0 { (self.ask_price - self.bid_price) / self.price } else { 0.0 }
    }
}

impl std::fmt::Display for PriceTick {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Tick({} px={:.6} bid={:.6} ask={:.6} vol={:.4})",
            self.symbol, self.price, self.bid_price, self.ask_price, self.volume
        )
    }
}
