//! Configuration for the trading engine.
//!
//! Configuration lives in a directory of JSON documents: one engine-wide
//! document plus one document per strategy.
//!
//! ```text
//! <config_dir>/
//!   engine.json
//!   strategies/
//!     btc_moving_average.json
//!     eth_momentum.json
//! ```
//!
//! # Example strategy document
//!
//! ```json
//! {
//!   "name": "btc_moving_average",
//!   "symbol": "BTC-USD",
//!   "enabled": true,
//!   "parameters": { "short_period": 5, "long_period": 20, "min_volume": 1000 },
//!   "risk_limits": {
//!     "max_position_size": 100, "stop_loss_percent": 5, "take_profit_percent": 10,
//!     "max_daily_trades": 10, "max_daily_loss": 50, "cooldown_period_sec": 300
//!   },
//!   "backtest_period_sec": 86400
//! }
//! ```
//!
//! Durations are stored as whole seconds. A missing document is replaced by a
//! synthesised default; a document that exists but fails to parse is fatal.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::TradingError;

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Engine-wide settings and risk caps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Upper bound on simultaneously running strategies.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_strategies: usize,

    /// Price feed polling interval, also the supervisor's valuation interval.
    #[serde(default = "default_price_interval")]
    pub price_update_interval_sec: u64,

    /// Caller-side retry budget for failed order submissions.
    #[serde(default = "default_retry_limit")]
    pub order_retry_limit: u32,

    /// Lifetime of a pending order before it is cancelled as timed out.
    #[serde(default = "default_order_timeout")]
    pub order_timeout_sec: u64,

    /// Portfolio drawdown (percent of peak) that triggers an emergency stop.
    #[serde(default = "default_emergency_stop")]
    pub emergency_stop_loss_percent: f64,

    /// Realized loss across all strategies in one day that triggers an
    /// emergency stop.
    #[serde(default = "default_daily_loss_limit")]
    pub daily_loss_limit: f64,

    #[serde(default)]
    pub enable_backtesting: bool,

    /// Starting portfolio value for performance accounting.
    #[serde(default = "default_initial_capital")]
    pub initial_capital: f64,

    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_max_concurrent() -> usize {
    5
}
fn default_price_interval() -> u64 {
    10
}
fn default_retry_limit() -> u32 {
    3
}
fn default_order_timeout() -> u64 {
    300
}
fn default_emergency_stop() -> f64 {
    10.0
}
fn default_daily_loss_limit() -> f64 {
    500.0
}
fn default_initial_capital() -> f64 {
    10_000.0
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_strategies: default_max_concurrent(),
            price_update_interval_sec: default_price_interval(),
            order_retry_limit: default_retry_limit(),
            order_timeout_sec: default_order_timeout(),
            emergency_stop_loss_percent: default_emergency_stop(),
            daily_loss_limit: default_daily_loss_limit(),
            enable_backtesting: false,
            initial_capital: default_initial_capital(),
            log_level: default_log_level(),
        }
    }
}

impl EngineConfig {
    pub fn price_update_interval(&self) -> Duration {
        Duration::from_secs(self.price_update_interval_sec.max(1))
    }

    pub fn order_timeout(&self) -> Duration {
        Duration::from_secs(self.order_timeout_sec)
    }
}

// ---------------------------------------------------------------------------
// Strategy
// ---------------------------------------------------------------------------

/// Per-strategy risk limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskLimits {
    /// Maximum position value in quote currency.
    pub max_position_size: f64,
    pub stop_loss_percent: f64,
    pub take_profit_percent: f64,
    pub max_daily_trades: u32,
    /// Maximum realized loss per day in quote currency.
    pub max_daily_loss: f64,
    #[serde(default)]
    pub cooldown_period_sec: u64,
}

impl RiskLimits {
    pub fn cooldown(&self) -> chrono::Duration {
        crate::time_util::secs(self.cooldown_period_sec)
    }
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_position_size: 100.0,
            stop_loss_percent: 5.0,
            take_profit_percent: 10.0,
            max_daily_trades: 10,
            max_daily_loss: 50.0,
            cooldown_period_sec: 300,
        }
    }
}

/// Which strategy implementation a config drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    MovingAverage,
    Momentum,
    MeanReversion,
    Scalping,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MovingAverage => "moving_average",
            Self::Momentum => "momentum",
            Self::MeanReversion => "mean_reversion",
            Self::Scalping => "scalping",
        }
    }

    /// Guess the kind from a strategy name such as `btc_moving_average`.
    pub fn infer(name: &str) -> Option<Self> {
        let name = name.to_ascii_lowercase();
        if name.contains("mean_reversion") || name.contains("reversion") {
            Some(Self::MeanReversion)
        } else if name.contains("moving_average") || name.ends_with("_ma") {
            Some(Self::MovingAverage)
        } else if name.contains("momentum") {
            Some(Self::Momentum)
        } else if name.contains("scalp") {
            Some(Self::Scalping)
        } else {
            None
        }
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One strategy instance's configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub name: String,
    pub symbol: String,
    #[serde(default)]
    pub enabled: bool,

    /// Explicit strategy kind. Inferred from `name` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<StrategyKind>,

    /// Strategy-tunable numeric parameters.
    #[serde(default)]
    pub parameters: BTreeMap<String, f64>,

    #[serde(default)]
    pub risk_limits: RiskLimits,

    #[serde(default)]
    pub backtest_period_sec: u64,
}

impl StrategyConfig {
    pub fn new(name: impl Into<String>, symbol: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            symbol: symbol.into(),
            enabled: false,
            kind: None,
            parameters: BTreeMap::new(),
            risk_limits: RiskLimits::default(),
            backtest_period_sec: 0,
        }
    }

    pub fn with_kind(mut self, kind: StrategyKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn with_param(mut self, key: &str, value: f64) -> Self {
        self.parameters.insert(key.to_string(), value);
        self
    }

    pub fn with_limits(mut self, limits: RiskLimits) -> Self {
        self.risk_limits = limits;
        self
    }

    /// A numeric parameter, or `default` when absent.
    pub fn param(&self, key: &str, default: f64) -> f64 {
        self.parameters.get(key).copied().unwrap_or(default)
    }

    /// The explicit kind, falling back to inference from the name.
    pub fn resolved_kind(&self) -> Result<StrategyKind, TradingError> {
        self.kind.or_else(|| StrategyKind::infer(&self.name)).ok_or_else(|| {
            TradingError::Config(format!(
                "cannot determine strategy kind for '{}', set \"kind\" explicitly",
                self.name
            ))
        })
    }
}

/// Sanity checks applied before a strategy is started.
pub fn validate_strategy_config(config: &StrategyConfig) -> Result<(), TradingError> {
    let fail = |msg: &str| Err(TradingError::Config(format!("{}: {msg}", config.name)));
    let limits = &config.risk_limits;

    if config.name.trim().is_empty() {
        return Err(TradingError::Config("strategy name cannot be empty".into()));
    }
    if config.symbol.trim().is_empty() {
        return fail("strategy symbol cannot be empty");
    }
    if limits.max_position_size <= 0.0 {
        return fail("max position size must be greater than 0");
    }
    if !(0.0..=50.0).contains(&limits.stop_loss_percent) {
        return fail("stop loss percent must be between 0 and 50");
    }
    if limits.max_daily_trades == 0 {
        return fail("max daily trades must be greater than 0");
    }
    if limits.max_daily_loss <= 0.0 {
        return fail("max daily loss must be greater than 0");
    }
    Ok(())
}

/// Sum of `max_position_size` over enabled strategies.
pub fn total_exposure(configs: &[StrategyConfig]) -> f64 {
    configs.iter().filter(|c| c.enabled).map(|c| c.risk_limits.max_position_size).sum()
}

// ---------------------------------------------------------------------------
// Defaults, templates, presets
// ---------------------------------------------------------------------------

/// The strategy set synthesised when no strategy documents exist.
/// All start disabled.
pub fn default_strategy_configs() -> Vec<StrategyConfig> {
    vec![
        StrategyConfig {
            backtest_period_sec: 24 * 3600,
            ..StrategyConfig::new("btc_moving_average", "BTC-USD")
                .with_kind(StrategyKind::MovingAverage)
                .with_param("short_period", 5.0)
                .with_param("long_period", 20.0)
                .with_param("min_volume", 1000.0)
                .with_limits(RiskLimits::default())
        },
        StrategyConfig {
            backtest_period_sec: 12 * 3600,
            ..StrategyConfig::new("eth_momentum", "ETH-USD")
                .with_kind(StrategyKind::Momentum)
                .with_param("lookback_period", 10.0)
                .with_param("momentum_threshold", 0.02)
                .with_param("volume_multiplier", 1.5)
                .with_limits(RiskLimits {
                    take_profit_percent: 8.0,
                    max_daily_trades: 15,
                    cooldown_period_sec: 120,
                    ..RiskLimits::default()
                })
        },
        StrategyConfig {
            backtest_period_sec: 6 * 3600,
            ..StrategyConfig::new("doge_scalping", "DOGE-USD")
                .with_kind(StrategyKind::Scalping)
                .with_param("short_period", 3.0)
                .with_param("long_period", 10.0)
                .with_param("volatility_threshold", 0.001)
                .with_limits(RiskLimits {
                    max_position_size: 50.0,
                    stop_loss_percent: 3.0,
                    take_profit_percent: 5.0,
                    max_daily_trades: 30,
                    max_daily_loss: 25.0,
                    cooldown_period_sec: 30,
                })
        },
    ]
}

/// A starting-point config for `kind`.
pub fn strategy_template(kind: StrategyKind) -> StrategyConfig {
    match kind {
        StrategyKind::MeanReversion => StrategyConfig::new("template_mean_reversion", "ADA-USD")
            .with_kind(kind)
            .with_param("lookback_period", 20.0)
            .with_param("rsi_period", 14.0)
            .with_param("oversold_threshold", 30.0)
            .with_param("overbought_threshold", 70.0)
            .with_limits(RiskLimits {
                max_position_size: 75.0,
                stop_loss_percent: 4.0,
                take_profit_percent: 6.0,
                max_daily_trades: 8,
                max_daily_loss: 40.0,
                cooldown_period_sec: 600,
            }),
        _ => {
            let mut config = default_strategy_configs()
                .into_iter()
                .find(|c| c.kind == Some(kind))
                .unwrap_or_else(|| StrategyConfig::new("template", "BTC-USD").with_kind(kind));
            config.name = format!("template_{kind}");
            config.backtest_period_sec = 0;
            config
        }
    }
}

/// A budget-driven conservative risk profile.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConservativePreset {
    /// Total amount the operator is willing to risk.
    pub total_budget: f64,
    pub daily_budget: f64,
    /// Fraction of the total budget allowed per position.
    pub max_position_fraction: f64,
    /// Stop-loss as a fraction (0.03 = 3 %).
    pub stop_loss_fraction: f64,
    pub daily_loss_limit: f64,
}

impl ConservativePreset {
    /// Look up a named preset: `ultra_conservative`, `conservative` or `moderate`.
    pub fn named(name: &str) -> Result<Self, TradingError> {
        let preset = match name {
            "ultra_conservative" => Self {
                total_budget: 100.0,
                daily_budget: 10.0,
                max_position_fraction: 0.05,
                stop_loss_fraction: 0.02,
                daily_loss_limit: 10.0,
            },
            "conservative" => Self {
                total_budget: 500.0,
                daily_budget: 50.0,
                max_position_fraction: 0.10,
                stop_loss_fraction: 0.03,
                daily_loss_limit: 25.0,
            },
            "moderate" => Self {
                total_budget: 1000.0,
                daily_budget: 100.0,
                max_position_fraction: 0.15,
                stop_loss_fraction: 0.05,
                daily_loss_limit: 50.0,
            },
            other => {
                return Err(TradingError::Config(format!(
                    "preset '{other}' not found, available: \
                     ultra_conservative, conservative, moderate"
                )));
            }
        };
        Ok(preset)
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            max_concurrent_strategies: 2,
            price_update_interval_sec: 15,
            order_retry_limit: 2,
            order_timeout_sec: 180,
            emergency_stop_loss_percent: self.stop_loss_fraction * 100.0,
            daily_loss_limit: self.daily_loss_limit,
            enable_backtesting: true,
            initial_capital: self.total_budget,
            log_level: default_log_level(),
        }
    }

    /// Risk limits for one strategy; the daily loss is split three ways.
    pub fn strategy_config(&self, name: &str, symbol: &str) -> StrategyConfig {
        StrategyConfig {
            backtest_period_sec: 48 * 3600,
            ..StrategyConfig::new(name, symbol).with_limits(RiskLimits {
                max_position_size: self.total_budget * self.max_position_fraction,
                stop_loss_percent: self.stop_loss_fraction * 100.0,
                take_profit_percent: self.stop_loss_fraction * 200.0,
                max_daily_trades: 3,
                max_daily_loss: self.daily_loss_limit / 3.0,
                cooldown_period_sec: 900,
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

/// Load and parse one JSON document.
pub fn load_json<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let value = serde_json::from_str(&content)
        .with_context(|| format!("parsing {}", path.display()))?;
    Ok(value)
}

/// Reads `engine.json` and `strategies/*.json` from one directory.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    dir: PathBuf,
}

impl ConfigLoader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The engine document, or [`EngineConfig::default`] when absent.
    pub fn load_engine_config(&self) -> Result<EngineConfig, TradingError> {
        let path = self.dir.join("engine.json");
        if !path.exists() {
            info!("[config] {} not found, using defaults", path.display());
            return Ok(EngineConfig::default());
        }
        load_json(&path).map_err(|e| TradingError::Config(format!("{e:#}")))
    }

    /// Every `*.json` under `strategies/`, sorted by file name. Falls back to
    /// [`default_strategy_configs`] when the directory has none.
    pub fn load_strategy_configs(&self) -> Result<Vec<StrategyConfig>, TradingError> {
        let dir = self.dir.join("strategies");
        let mut paths = Vec::new();
        if dir.is_dir() {
            let entries = std::fs::read_dir(&dir)
                .map_err(|e| TradingError::Config(format!("reading {}: {e}", dir.display())))?;
            for entry in entries {
                let path = entry
                    .map_err(|e| TradingError::Config(format!("reading {}: {e}", dir.display())))?
                    .path();
                if path.extension().is_some_and(|ext| ext == "json") {
                    paths.push(path);
                }
            }
        }
        paths.sort();

        if paths.is_empty() {
            warn!("[config] no strategy documents in {}, using defaults", dir.display());
            return Ok(default_strategy_configs());
        }

        paths
            .iter()
            .map(|p| load_json(p).map_err(|e| TradingError::Config(format!("{e:#}"))))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_defaults_fill_missing_fields() {
        let cfg: EngineConfig = serde_json::from_str(r#"{"daily_loss_limit": 100}"#).unwrap();
        assert_eq!(cfg.daily_loss_limit, 100.0);
        assert_eq!(cfg.max_concurrent_strategies, 5);
        assert_eq!(cfg.order_timeout(), Duration::from_secs(300));
    }

    #[test]
    fn kind_inference() {
        assert_eq!(StrategyKind::infer("btc_moving_average"), Some(StrategyKind::MovingAverage));
        assert_eq!(StrategyKind::infer("eth_momentum"), Some(StrategyKind::Momentum));
        assert_eq!(StrategyKind::infer("ada_mean_reversion"), Some(StrategyKind::MeanReversion));
        assert_eq!(StrategyKind::infer("doge_scalping"), Some(StrategyKind::Scalping));
        assert_eq!(StrategyKind::infer("btc_conservative_ma"), Some(StrategyKind::MovingAverage));
        assert!(StrategyConfig::new("mystery", "X").resolved_kind().is_err());
    }

    #[test]
    fn validation_rules() {
        let ok = StrategyConfig::new("s", "BTC-USD");
        assert!(validate_strategy_config(&ok).is_ok());

        let mut bad = ok.clone();
        bad.risk_limits.stop_loss_percent = 60.0;
        assert!(matches!(validate_strategy_config(&bad), Err(TradingError::Config(_))));

        let mut bad = ok.clone();
        bad.risk_limits.max_daily_trades = 0;
        assert!(validate_strategy_config(&bad).is_err());

        let mut bad = ok;
        bad.symbol.clear();
        assert!(validate_strategy_config(&bad).is_err());
    }

    #[test]
    fn defaults_are_valid_and_disabled() {
        for cfg in default_strategy_configs() {
            validate_strategy_config(&cfg).unwrap();
            assert!(!cfg.enabled);
            assert!(cfg.resolved_kind().is_ok());
        }
        assert_eq!(total_exposure(&default_strategy_configs()), 0.0);
        let t = strategy_template(StrategyKind::MeanReversion);
        assert_eq!(t.param("rsi_period", 0.0), 14.0);
        assert_eq!(strategy_template(StrategyKind::Momentum).name, "template_momentum");
    }

    #[test]
    fn conservative_preset() {
        let p = ConservativePreset::named("conservative").unwrap();
        let s = p.strategy_config("btc_conservative_ma", "BTC-USD");
        assert!((s.risk_limits.max_position_size - 50.0).abs() < 1e-9);
        assert!((s.risk_limits.take_profit_percent - 6.0).abs() < 1e-9);
        assert_eq!(s.risk_limits.max_daily_trades, 3);
        assert!((p.engine_config().emergency_stop_loss_percent - 3.0).abs() < 1e-9);
        assert!(ConservativePreset::named("yolo").is_err());
    }

    #[test]
    fn loader_uses_defaults_for_absent_files() {
        let dir = tempfile::tempdir().unwrap();
        let loader = ConfigLoader::new(dir.path());
        assert_eq!(loader.load_engine_config().unwrap(), EngineConfig::default());
        assert_eq!(loader.load_strategy_configs().unwrap().len(), 3);
    }

    #[test]
    fn loader_reads_documents_and_rejects_malformed() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("strategies")).unwrap();
        std::fs::write(
            dir.path().join("strategies/a_momentum.json"),
            r#"{"name":"a_momentum","symbol":"ETH-USD","enabled":true,
                "parameters":{"lookback_period":12},
                "risk_limits":{"max_position_size":80,"stop_loss_percent":4,
                  "take_profit_percent":8,"max_daily_trades":5,"max_daily_loss":20}}"#,
        )
        .unwrap();
        let loader = ConfigLoader::new(dir.path());
        let configs = loader.load_strategy_configs().unwrap();
        assert_eq!(configs.len(), 1);
        assert_eq!(configs[0].param("lookback_period", 10.0), 12.0);
        assert_eq!(configs[0].risk_limits.cooldown_period_sec, 0);

        std::fs::write(dir.path().join("engine.json"), "{ not json").unwrap();
        assert!(matches!(loader.load_engine_config(), Err(TradingError::Config(_))));

        std::fs::write(dir.path().join("strategies/b.json"), "[]").unwrap();
        assert!(loader.load_strategy_configs().is_err());
    }
}
