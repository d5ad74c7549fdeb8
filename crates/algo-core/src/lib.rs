//! # algo-core
//!
//! Core crate for the algorithmic trading engine, providing:
//!
//! - **Types** (`types`): enums, price ticks, signals, orders, trades, positions
//! - **Configuration** (`config`): engine / strategy JSON config + loader
//! - **Error types** (`error`): domain-specific `TradingError` via thiserror
//! - **Time utilities** (`time_util`): injectable clock and calendar-day helpers
//! - **Logging** (`logging`): tracing-based structured logging
//! - **Shutdown** (`shutdown`): watch-channel stop signals for spawned tasks

pub mod config;
pub mod error;
pub mod logging;
pub mod shutdown;
pub mod time_util;
pub mod types;

// Re-export types at crate root for convenience.
pub use error::TradingError;
pub use types::*;
