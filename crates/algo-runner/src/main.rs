//! # algo-runner
//!
//! Runs the trading engine against the in-process paper broker.
//!
//! Loads `engine.json` and `strategies/*.json` from the config directory
//! (synthesising defaults when absent), starts every enabled strategy and
//! runs until Ctrl+C.
//!
//! # Usage
//!
//! ```bash
//! algo-runner --config-dir ./config --log-level info
//! algo-runner --enable-all --preset conservative --price BTC-USD=64000 --seed 42
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use algo_core::config::{ConfigLoader, ConservativePreset, validate_strategy_config};
use algo_core::logging::{LogSettings, init_logging};
use algo_engine::TradingEngine;
use algo_md::MarketDataClient;
use algo_td::{PaperBroker, PaperBrokerConfig};
use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::{error, info, warn};

/// Seed mid prices for the paper broker.
const DEFAULT_PRICES: &[(&str, f64)] =
    &[("BTC-USD", 50_000.0), ("ETH-USD", 3_000.0), ("DOGE-USD", 0.10), ("ADA-USD", 0.45)];
/// Mid price for configured symbols with no seed.
const FALLBACK_PRICE: f64 = 100.0;

/// Algorithmic Trading Engine Runner (paper trading).
#[derive(Parser)]
#[command(name = "algo-runner", about = "Algorithmic Trading Engine Runner")]
struct Cli {
    /// Directory holding engine.json and strategies/*.json.
    #[arg(short, long, default_value = "config")]
    config_dir: PathBuf,

    /// Log level (trace, debug, info, warn, error). Defaults to the level
    /// in engine.json.
    #[arg(short, long)]
    log_level: Option<String>,

    /// Optional log directory for file output.
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Apply a risk preset (ultra_conservative, conservative, moderate).
    #[arg(long)]
    preset: Option<String>,

    /// Start strategies even if their config says disabled.
    #[arg(long)]
    enable_all: bool,

    /// Paper mid price, repeatable: SYMBOL=PRICE.
    #[arg(long = "price", value_parser = parse_price)]
    prices: Vec<(String, f64)>,

    /// Paper broker RNG seed.
    #[arg(long)]
    seed: Option<u64>,

    /// Paper broker commission as a fraction of notional.
    #[arg(long, default_value_t = 0.0)]
    commission_rate: f64,

    /// Paper broker maximum relative price move per quote.
    #[arg(long, default_value_t = 0.002)]
    step: f64,

    /// Seconds between status log lines.
    #[arg(long, default_value_t = 60)]
    status_interval_sec: u64,
}

fn parse_price(s: &str) -> Result<(String, f64), String> {
    let (symbol, price) =
        s.split_once('=').ok_or_else(|| format!("expected SYMBOL=PRICE, got '{s}'"))?;
    let price: f64 = price.parse().map_err(|e| format!("bad price in '{s}': {e}"))?;
    if !(price.is_finite() && price > 0.0) {
        return Err(format!("price must be positive in '{s}'"));
    }
    Ok((symbol.to_string(), price))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 1. Engine config, then logging at its level
    let loader = ConfigLoader::new(&cli.config_dir);
    let mut engine_config = loader.load_engine_config().context("loading engine config")?;
    let log_settings =
        LogSettings::from_engine(&engine_config, cli.log_level.as_deref(), "algo-runner")
            .with_dir(cli.log_dir.clone());
    init_logging(&log_settings).context("initialising logging")?;
    info!(
        "algo-runner starting, config_dir={} log_level={}",
        cli.config_dir.display(),
        log_settings.level
    );

    // 2. Strategy configuration
    let mut strategies = loader.load_strategy_configs().context("loading strategy configs")?;

    if let Some(name) = &cli.preset {
        let preset = ConservativePreset::named(name)?;
        let log_level = std::mem::take(&mut engine_config.log_level);
        engine_config = preset.engine_config();
        engine_config.log_level = log_level;
        for config in &mut strategies {
            config.risk_limits = preset.strategy_config(&config.name, &config.symbol).risk_limits;
        }
        info!("preset '{name}' applied, budget {:.2}", preset.total_budget);
    }
    if cli.enable_all {
        strategies.iter_mut().for_each(|c| c.enabled = true);
    }
    for config in strategies.iter().filter(|c| c.enabled) {
        if let Err(e) = validate_strategy_config(config) {
            error!("strategy {}: {e}", config.name);
        }
    }
    let enabled = strategies.iter().filter(|c| c.enabled).count();
    if enabled == 0 {
        bail!("no enabled strategies in {} (use --enable-all)", cli.config_dir.display());
    }
    info!("config loaded: {} strategies, {enabled} enabled", strategies.len());

    // 3. Paper broker with seeded prices
    let mut broker = PaperBroker::new(PaperBrokerConfig {
        step: cli.step,
        commission_rate: cli.commission_rate,
        seed: cli.seed,
        ..PaperBrokerConfig::default()
    });
    for (symbol, price) in DEFAULT_PRICES {
        broker = broker.with_price(symbol, *price);
    }
    for (symbol, price) in &cli.prices {
        broker = broker.with_price(symbol, *price);
    }
    for config in &strategies {
        if broker.price(&config.symbol).is_none() {
            warn!("no seed price for {}, using {FALLBACK_PRICE}", config.symbol);
            broker = broker.with_price(&config.symbol, FALLBACK_PRICE);
        }
    }
    let broker = Arc::new(broker);
    let market_data: Arc<dyn MarketDataClient> = broker.clone();
    info!("market data: {}", market_data.name());

    // 4. Start the engine
    let clock = algo_core::time_util::system_clock();
    let engine = TradingEngine::new(engine_config, market_data, broker, clock);
    let started = engine.start(&strategies)?;
    info!("{started} strategy(ies) running, press Ctrl+C to stop");

    // 5. Run until Ctrl+C or an emergency stop
    let status_period = Duration::from_secs(cli.status_interval_sec.max(1));
    let mut status_tick = tokio::time::interval(status_period);
    loop {
        tokio::select! {
            res = tokio::signal::ctrl_c() => {
                res?;
                info!("shutdown signal received");
                break;
            }
            _ = status_tick.tick() => {
                log_status(&engine).await;
                if !engine.is_running() {
                    warn!("engine halted");
                    break;
                }
            }
        }
    }

    // 6. Graceful stop
    engine.stop().await;
    log_status(&engine).await;
    info!("goodbye");
    Ok(())
}

async fn log_status(engine: &TradingEngine) {
    let status = engine.status();
    let perf = engine.performance();
    let orders = engine.order_stats().await;
    info!(
        "status: running={} paused={} strategies={} positions={} trades={} \
         value={:.2} pnl={:.2} drawdown={:.2}% fill_rate={:.0}%",
        status.running,
        status.paused,
        status.active_strategies,
        status.active_positions,
        status.total_trades,
        engine.portfolio_value(),
        perf.total_return,
        perf.max_drawdown,
        orders.fill_rate * 100.0,
    );
    for state in engine.strategy_states() {
        info!(
            "  [{}] {} running={} qty={:.8} avg={:.6} pnl={:.4} trades={}{}",
            state.name,
            state.symbol,
            state.is_running,
            state.position.quantity,
            state.position.average_price,
            state.pnl,
            state.trades_count,
            state.last_error.as_deref().map(|e| format!(" last_error={e}")).unwrap_or_default(),
        );
    }
}
