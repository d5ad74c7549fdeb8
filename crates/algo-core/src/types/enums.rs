//! Enumerations used throughout the trading engine.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Signals
// ---------------------------------------------------------------------------

/// A strategy's recommendation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SignalType {
    Buy,
    Sell,
    #[default]
    Hold,
}

impl std::fmt::Display for SignalType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
            Self::Hold => write!(f, "HOLD"),
        }
    }
}

// ---------------------------------------------------------------------------
// Order / trading enums
// ---------------------------------------------------------------------------

/// Buy or sell direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "buy",
            Self::Sell => "sell",
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Order type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    #[default]
    Market,
    Limit,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Market => "market",
            Self::Limit => "limit",
        }
    }
}

/// Order lifecycle status.
///
/// An order is created `Pending` and transitions to exactly one of the three
/// terminal states. It is never reopened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Filled,
    Cancelled,
    Failed,
}

impl OrderStatus {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// Map a brokerage state string onto the engine's status set.
    ///
    /// Unknown or in-flight states (`"open"`, `"queued"`, `"partially_filled"`)
    /// are treated as still pending.
    pub fn from_broker_state(state: &str) -> Self {
        match state.to_ascii_lowercase().as_str() {
            "filled" => Self::Filled,
            "canceled" | "cancelled" => Self::Cancelled,
            "failed" | "rejected" | "expired" => Self::Failed,
            _ => Self::Pending,
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Filled => write!(f, "filled"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broker_state_mapping() {
        assert_eq!(OrderStatus::from_broker_state("filled"), OrderStatus::Filled);
        assert_eq!(OrderStatus::from_broker_state("Canceled"), OrderStatus::Cancelled);
        assert_eq!(OrderStatus::from_broker_state("rejected"), OrderStatus::Failed);
        assert_eq!(OrderStatus::from_broker_state("open"), OrderStatus::Pending);
        assert!(!OrderStatus::Pending.is_terminal());
        assert!(OrderStatus::Failed.is_terminal());
    }
}
