//! # algo-engine
//!
//! Strategy execution on top of `algo-md` feeds and the `algo-td` order
//! manager.
//!
//! - [`strategy`]: the [`Strategy`] trait and its four implementations
//! - [`risk`]: [`RiskManager`], per-strategy daily limits
//! - [`metrics`]: [`PerformanceMetrics`], portfolio statistics
//! - [`runner`]: [`StrategyRunner`], one strategy from ticks to trades
//! - [`engine`]: [`TradingEngine`], lifecycle, supervision, emergency stop
//!
//! ```text
//! PriceFeed → StrategyRunner → Strategy::evaluate → RiskManager
//!           → OrderManager::submit_order → Position / Trade → PerformanceMetrics
//! ```

pub mod engine;
pub mod metrics;
pub mod risk;
pub mod runner;
pub mod strategy;

pub use engine::{EngineStatus, TradingEngine};
pub use metrics::{PerformanceMetrics, PerformanceSummary};
pub use risk::RiskManager;
pub use runner::{RunnerContext, StrategyRunner};
pub use strategy::{Strategy, create_strategy};
