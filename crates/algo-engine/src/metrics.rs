//! Portfolio-level performance statistics.
//!
//! [`PerformanceMetrics`] is a plain accumulator; the engine keeps it behind a
//! mutex and feeds it every executed trade and every portfolio valuation.
//! Daily returns are fractional (`Δvalue / value at day start`) and are only
//! appended when a valuation lands on a later UTC day than the previous one.

use std::collections::VecDeque;

use algo_core::time_util::{SharedClock, trading_day};
use algo_core::Trade;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_INITIAL_CAPITAL: f64 = 10_000.0;
/// One trading year of daily returns.
pub const MAX_DAILY_RETURNS: usize = 252;
/// Ratios and VaR stay at zero until this many daily returns exist.
pub const MIN_RETURNS_FOR_RATIOS: usize = 30;

const ANNUALIZATION: f64 = 252.0;

/// Flattened view for display.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSummary {
    pub total_return: f64,
    pub total_return_percent: f64,
    pub daily_pnl: f64,
    pub realized_pnl: f64,
    pub total_trades: usize,
    /// Percent.
    pub win_rate: f64,
    /// Percent of peak.
    pub max_drawdown: f64,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    pub var_95: f64,
    pub profit_factor: f64,
    pub is_profit: bool,
    pub days_active: i64,
}

pub struct PerformanceMetrics {
    clock: SharedClock,
    initial_capital: f64,
    start_time: DateTime<Utc>,

    total_pnl: f64,
    daily_pnl: f64,
    realized_pnl: f64,

    total_trades: usize,
    winning_trades: usize,
    losing_trades: usize,
    win_rate: f64,
    average_win: f64,
    average_loss: f64,
    profit_factor: f64,

    peak_value: f64,
    current_value: f64,
    current_drawdown: f64,
    max_drawdown: f64,
    max_drawdown_percent: f64,
    sharpe_ratio: f64,
    sortino_ratio: f64,
    var_95: f64,

    day: NaiveDate,
    day_start_value: f64,
    daily_returns: VecDeque<f64>,
}

impl PerformanceMetrics {
    pub fn new(initial_capital: f64, clock: SharedClock) -> Self {
        let now = clock.now();
        Self {
            clock,
            initial_capital,
            start_time: now,
            total_pnl: 0.0,
            daily_pnl: 0.0,
            realized_pnl: 0.0,
            total_trades: 0,
            winning_trades: 0,
            losing_trades: 0,
            win_rate: 0.0,
            average_win: 0.0,
            average_loss: 0.0,
            profit_factor: 0.0,
            peak_value: initial_capital,
            current_value: initial_capital,
            current_drawdown: 0.0,
            max_drawdown: 0.0,
            max_drawdown_percent: 0.0,
            sharpe_ratio: 0.0,
            sortino_ratio: 0.0,
            var_95: 0.0,
            day: trading_day(now),
            day_start_value: initial_capital,
            daily_returns: VecDeque::with_capacity(MAX_DAILY_RETURNS),
        }
    }

    pub fn update_from_trade(&mut self, trade: &Trade) {
        self.total_trades += 1;
        self.realized_pnl += trade.pnl;

        if trade.pnl > 0.0 {
            self.winning_trades += 1;
            let n = self.winning_trades as f64;
            self.average_win += (trade.pnl - self.average_win) / n;
        } else if trade.pnl < 0.0 {
            self.losing_trades += 1;
            let n = self.losing_trades as f64;
            self.average_loss += (trade.pnl.abs() - self.average_loss) / n;
        }

        self.win_rate = self.winning_trades as f64 / self.total_trades as f64;
        if self.average_loss > 0.0 {
            self.profit_factor = (self.average_win * self.winning_trades as f64)
                / (self.average_loss * self.losing_trades as f64);
        }
    }

    pub fn update_portfolio_value(&mut self, value: f64) {
        let today = trading_day(self.clock.now());
        if today > self.day {
            // `current_value` still holds the last valuation of the previous day.
            if self.day_start_value > 0.0 {
                self.daily_returns
                    .push_back((self.current_value - self.day_start_value) / self.day_start_value);
                if self.daily_returns.len() > MAX_DAILY_RETURNS {
                    self.daily_returns.pop_front();
                }
            }
            self.day = today;
            self.day_start_value = self.current_value;
        }

        self.current_value = value;
        self.total_pnl = value - self.initial_capital;
        self.daily_pnl = value - self.day_start_value;

        if value > self.peak_value {
            self.peak_value = value;
        }
        self.current_drawdown = self.peak_value - value;
        if self.current_drawdown > self.max_drawdown {
            self.max_drawdown = self.current_drawdown;
            self.max_drawdown_percent = if self.peak_value > 0.0 {
                self.max_drawdown / self.peak_value * 100.0
            } else {
                0.0
            };
        }

        self.calculate_risk_metrics();
    }

    fn calculate_risk_metrics(&mut self) {
        let n = self.daily_returns.len();
        if n < MIN_RETURNS_FOR_RATIOS {
            return;
        }
        let returns: Vec<f64> = self.daily_returns.iter().copied().collect();
        let mean = returns.iter().sum::<f64>() / n as f64;

        let stdev = stdev_around(&returns, mean);
        self.sharpe_ratio = if stdev > 0.0 { mean / stdev * ANNUALIZATION.sqrt() } else { 0.0 };

        let downside: Vec<f64> = returns.iter().copied().filter(|r| *r < 0.0).collect();
        let downside_stdev = stdev_around(&downside, 0.0);
        self.sortino_ratio =
            if downside_stdev > 0.0 { mean / downside_stdev * ANNUALIZATION.sqrt() } else { 0.0 };

        let mut sorted = returns;
        sorted.sort_by(f64::total_cmp);
        let idx = ((0.05 * n as f64) as usize).min(n - 1);
        self.var_95 = sorted[idx].abs();
    }

    pub fn initial_capital(&self) -> f64 {
        self.initial_capital
    }

    pub fn max_drawdown(&self) -> f64 {
        self.max_drawdown
    }

    pub fn peak_value(&self) -> f64 {
        self.peak_value
    }

    /// Decline from peak at the latest valuation, in percent.
    pub fn current_drawdown_percent(&self) -> f64 {
        if self.peak_value <= 0.0 {
            return 0.0;
        }
        self.current_drawdown / self.peak_value * 100.0
    }

    pub fn daily_returns(&self) -> impl Iterator<Item = f64> + '_ {
        self.daily_returns.iter().copied()
    }

    pub fn summary(&self) -> PerformanceSummary {
        PerformanceSummary {
            total_return: self.total_pnl,
            total_return_percent: if self.initial_capital > 0.0 {
                self.total_pnl / self.initial_capital * 100.0
            } else {
                0.0
            },
            daily_pnl: self.daily_pnl,
            realized_pnl: self.realized_pnl,
            total_trades: self.total_trades,
            win_rate: self.win_rate * 100.0,
            max_drawdown: self.max_drawdown_percent,
            sharpe_ratio: self.sharpe_ratio,
            sortino_ratio: self.sortino_ratio,
            var_95: self.var_95,
            profit_factor: self.profit_factor,
            is_profit: self.total_pnl > 0.0,
            days_active: (self.clock.now() - self.start_time).num_days(),
        }
    }
}

/// Sample standard deviation around a given center.
fn stdev_around(values: &[f64], center: f64) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let ss: f64 = values.iter().map(|v| (v - center) * (v - center)).sum();
    (ss / (values.len() - 1) as f64).sqrt()
}
