//! Logging initialization using the `tracing` ecosystem.
//!
//! The level comes from `EngineConfig::log_level` unless the command line
//! overrides it; `RUST_LOG` still wins over both. The level applies to the
//! engine crates only, third-party crates stay at `warn`.
//!
//! Output goes to the console and, when a directory is given, to a
//! daily-rotated file via `tracing-appender`.

use std::path::PathBuf;

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::TradingError;
use crate::config::EngineConfig;

/// Crate targets the configured level applies to.
const ENGINE_TARGETS: &[&str] = &["algo_core", "algo_md", "algo_td", "algo_engine", "algo_runner"];
const LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error", "off"];

/// Where and how verbosely to log.
#[derive(Debug, Clone, PartialEq)]
pub struct LogSettings {
    pub level: String,
    pub dir: Option<PathBuf>,
    /// Log file prefix, e.g. `"algo-runner"`.
    pub file_prefix: String,
}

impl LogSettings {
    /// Settings for `config`, with `level_override` taking precedence over
    /// the configured level.
    pub fn from_engine(
        config: &EngineConfig,
        level_override: Option<&str>,
        file_prefix: &str,
    ) -> Self {
        Self {
            level: level_override.unwrap_or(config.log_level.as_str()).to_string(),
            dir: None,
            file_prefix: file_prefix.to_string(),
        }
    }

    pub fn with_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.dir = dir;
        self
    }

    /// Filter directive for the configured level, e.g.
    /// `warn,algo_core=debug,algo_md=debug,...`.
    pub fn directive(&self) -> Result<String, TradingError> {
        let level = self.level.trim().to_ascii_lowercase();
        if !LEVELS.contains(&level.as_str()) {
            return Err(TradingError::Config(format!("unknown log level '{}'", self.level)));
        }
        let mut directive = String::from("warn");
        for target in ENGINE_TARGETS {
            directive.push_str(&format!(",{target}={level}"));
        }
        Ok(directive)
    }
}

/// Install the global tracing subscriber. Call once at program start.
pub fn init_logging(settings: &LogSettings) -> Result<(), TradingError> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(settings.directive()?)
            .map_err(|e| TradingError::Config(format!("log filter: {e}")))?,
    };

    let console_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_ansi(true);

    let installed = if let Some(dir) = &settings.dir {
        let file_appender = tracing_appender::rolling::daily(dir, &settings.file_prefix);
        let file_layer = fmt::layer()
            .with_writer(file_appender)
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(true);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .with(file_layer)
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .try_init()
    };
    installed.map_err(|e| TradingError::Config(format!("logging already initialised: {e}")))
}
