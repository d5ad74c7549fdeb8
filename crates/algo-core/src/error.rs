//! Typed error definitions for the trading engine.
//!
//! Provides [`TradingError`] with one variant per failure category the engine
//! distinguishes. Each category has its own propagation policy:
//!
//! | Variant          | Policy                                                    |
//! |------------------|-----------------------------------------------------------|
//! | `Config`         | fatal at startup, no default substitution for bad files   |
//! | `Validation`     | strategy parameters invalid, strategy never starts        |
//! | `RiskRejection`  | signal dropped, logged, never escalated                   |
//! | `Broker`         | returned to the caller, order marked `failed`             |
//! | `Timeout`        | pending order cancelled and marked `failed`               |
//! | `PartialFill`    | order ended early, the executed part must still be booked |
//! | `Feed`           | tick skipped, feed continues on the next interval         |
//!
//! All variants implement `std::error::Error` via `thiserror`, so they
//! integrate with `anyhow::Result` in the binary.

use thiserror::Error;

use crate::types::Trade;

/// Domain-specific errors for the trading engine.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TradingError {
    /// Configuration missing, malformed, or failing validation.
    #[error("config error: {0}")]
    Config(String),

    /// Strategy parameter invalid (e.g. short period >= long period).
    #[error("validation error: {0}")]
    Validation(String),

    /// Signal or order refused by a risk check.
    #[error("risk rejection: {0}")]
    RiskRejection(String),

    /// Order placement, status query, or cancellation failed at the brokerage.
    #[error("broker error: {0}")]
    Broker(String),

    /// A pending order exceeded its allowed lifetime.
    #[error("timeout: {0}")]
    Timeout(String),

    /// A pending order was cancelled or timed out after part of it executed.
    /// `fill` covers the executed quantity at its average price.
    #[error("partial fill of order {}: {reason}", .fill.id)]
    PartialFill { fill: Box<Trade>, reason: String },

    /// Market-data fetch failed.
    #[error("feed error: {0}")]
    Feed(String),

    /// Operation not allowed in the current lifecycle state.
    #[error("invalid state: {0}")]
    InvalidState(String),
}

impl TradingError {
    /// Whether this error is expected control flow rather than a failure.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::RiskRejection(_))
    }
}
