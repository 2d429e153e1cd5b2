//! Performance metrics calculator.
//!
//! Return series are built from non-stale daily valuations, with the first
//! return measured against the initial capital.

use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::backtest::{BacktestResult, DailyPnL, Trade};

fn to_f64(value: Decimal) -> f64 {
    f64::try_from(value).unwrap_or(0.0)
}

/// Comprehensive performance metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    // Basic statistics
    pub total_trades: usize,
    pub realized_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: Option<f64>,

    // P&L metrics
    pub realized_pnl: Decimal,
    pub gross_profit: Decimal,
    pub gross_loss: Decimal,
    pub profit_factor: Option<f64>,
    pub largest_winner: Decimal,
    pub largest_loser: Decimal,

    // Return metrics
    pub total_return: f64,
    pub cagr: f64,

    // Risk metrics
    pub max_drawdown: f64,
    pub drawdown_duration_days: i64,

    // Risk-adjusted returns
    pub sharpe_ratio: Option<f64>,
    pub sortino_ratio: Option<f64>,
    pub calmar_ratio: Option<f64>,

    pub trading_days: usize,
    pub total_fees: Decimal,
}

impl PerformanceMetrics {
    /// Generate a summary report.
    pub fn summary(&self) -> String {
        let opt = |v: Option<f64>| v.map(|x| format!("{:.2}", x)).unwrap_or_else(|| "n/a".into());
        format!(
            "Performance Summary\n\
             ====================\n\
             \n\
             Fills: {} ({} realized, W: {}, L: {})\n\
             Win Rate: {}\n\
             Profit Factor: {}\n\
             \n\
             Realized P&L: {:.2}\n\
             Largest Win: {:.2}\n\
             Largest Loss: {:.2}\n\
             \n\
             Total Return: {:.2}%\n\
             CAGR: {:.2}%\n\
             \n\
             Max Drawdown: {:.2}%\n\
             Sharpe Ratio: {}\n\
             Sortino Ratio: {}\n\
             Calmar Ratio: {}\n\
             \n\
             Fees: {:.2}",
            self.total_trades,
            self.realized_trades,
            self.winning_trades,
            self.losing_trades,
            self.win_rate
                .map(|w| format!("{:.1}%", w * 100.0))
                .unwrap_or_else(|| "n/a".into()),
            opt(self.profit_factor),
            self.realized_pnl,
            self.largest_winner,
            self.largest_loser,
            self.total_return * 100.0,
            self.cagr * 100.0,
            self.max_drawdown * 100.0,
            opt(self.sharpe_ratio),
            opt(self.sortino_ratio),
            opt(self.calmar_ratio),
            self.total_fees,
        )
    }
}

/// Drawdown analysis details.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DrawdownAnalysis {
    /// Largest peak-to-trough decline in currency.
    pub max_drawdown: Decimal,
    /// Same decline as a fraction of the peak.
    pub max_drawdown_pct: f64,
    pub max_drawdown_date: Option<NaiveDate>,
    /// Peak preceding the largest decline (`None` when the peak is the initial capital).
    pub peak_date: Option<NaiveDate>,
    /// First day back at or above that peak.
    pub recovery_date: Option<NaiveDate>,
    /// Days from the peak to the trough of the largest decline.
    pub duration_days: i64,
    pub drawdown_periods: usize,
}

/// Monthly return data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyReturn {
    pub year: i32,
    pub month: u32,
    /// Change in portfolio value over the month, as a fraction of the
    /// previous month's closing value.
    pub return_pct: f64,
    pub trades: usize,
}

/// Metrics calculator.
pub struct MetricsCalculator;

impl MetricsCalculator {
    /// Calculate all metrics from a backtest result.
    pub fn calculate(result: &BacktestResult) -> PerformanceMetrics {
        let trades = &result.trades;
        let realized: Vec<Decimal> = trades.iter().filter_map(|t| t.pnl).collect();

        let winning_trades = realized.iter().filter(|p| **p > Decimal::ZERO).count();
        let losing_trades = realized.len() - winning_trades;

        let gross_profit: Decimal = realized.iter().filter(|p| **p > Decimal::ZERO).sum();
        let gross_loss: Decimal = realized.iter().filter(|p| **p <= Decimal::ZERO).sum();

        let largest_winner = realized
            .iter()
            .copied()
            .filter(|p| *p > Decimal::ZERO)
            .max()
            .unwrap_or(Decimal::ZERO);
        let largest_loser = realized
            .iter()
            .copied()
            .filter(|p| *p <= Decimal::ZERO)
            .min()
            .unwrap_or(Decimal::ZERO);

        let trading_days = result.daily_pnl.iter().filter(|d| !d.stale).count();
        let cagr = Self::calculate_cagr(
            result.initial_capital,
            result.final_capital,
            (result.end_date - result.start_date).num_days() + 1,
        );

        let calmar_ratio = if result.max_drawdown > 0.0 {
            Some(cagr / result.max_drawdown)
        } else {
            None
        };

        PerformanceMetrics {
            total_trades: result.total_trades,
            realized_trades: realized.len(),
            winning_trades,
            losing_trades,
            win_rate: result.win_rate,
            realized_pnl: realized.iter().sum(),
            gross_profit,
            gross_loss,
            profit_factor: Self::calculate_profit_factor(gross_profit, gross_loss),
            largest_winner,
            largest_loser,
            total_return: result.total_return,
            cagr,
            max_drawdown: result.max_drawdown,
            drawdown_duration_days: result.drawdown.duration_days,
            sharpe_ratio: result.sharpe_ratio,
            sortino_ratio: result.sortino_ratio,
            calmar_ratio,
            trading_days,
            total_fees: result.total_fees,
        }
    }

    /// Daily simple returns from non-stale valuations.
    pub fn daily_returns(initial_capital: Decimal, daily: &[DailyPnL]) -> Vec<f64> {
        let mut prev = to_f64(initial_capital);
        let mut returns = Vec::new();
        for point in daily.iter().filter(|d| !d.stale) {
            let value = to_f64(point.portfolio_value);
            if prev != 0.0 {
                returns.push((value - prev) / prev);
            }
            prev = value;
        }
        returns
    }

    /// (final - initial) / initial.
    pub fn total_return(initial_capital: Decimal, final_capital: Decimal) -> f64 {
        if initial_capital.is_zero() {
            return 0.0;
        }
        to_f64((final_capital - initial_capital) / initial_capital)
    }

    /// Annualized Sharpe ratio over excess daily returns, population standard
    /// deviation. `None` with fewer than two returns or zero deviation.
    pub fn sharpe_ratio(returns: &[f64], risk_free_rate: f64, annualization_days: f64) -> Option<f64> {
        if returns.len() < 2 || annualization_days <= 0.0 {
            return None;
        }

        let daily_rf = risk_free_rate / annualization_days;
        let excess: Vec<f64> = returns.iter().map(|r| r - daily_rf).collect();
        let mean = excess.iter().sum::<f64>() / excess.len() as f64;
        let variance = excess.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / excess.len() as f64;
        let std_dev = variance.sqrt();

        if std_dev == 0.0 || !std_dev.is_finite() {
            return None;
        }

        Some(mean / std_dev * annualization_days.sqrt())
    }

    /// Annualized Sortino ratio (downside deviation of excess returns).
    pub fn sortino_ratio(returns: &[f64], risk_free_rate: f64, annualization_days: f64) -> Option<f64> {
        if returns.len() < 2 || annualization_days <= 0.0 {
            return None;
        }

        let daily_rf = risk_free_rate / annualization_days;
        let excess: Vec<f64> = returns.iter().map(|r| r - daily_rf).collect();
        let mean = excess.iter().sum::<f64>() / excess.len() as f64;

        // Downside deviation (only negative returns)
        let downside_variance = excess
            .iter()
            .filter(|&&r| r < 0.0)
            .map(|r| r.powi(2))
            .sum::<f64>()
            / excess.len() as f64;
        let downside_dev = downside_variance.sqrt();

        if downside_dev == 0.0 {
            return None;
        }

        Some(mean / downside_dev * annualization_days.sqrt())
    }

    /// Win rate over realized trades; `None` when nothing was realized.
    pub fn win_rate(trades: &[Trade]) -> Option<f64> {
        let realized: Vec<&Trade> = trades.iter().filter(|t| !t.is_opening()).collect();
        if realized.is_empty() {
            return None;
        }
        let winners = realized.iter().filter(|t| t.is_winner()).count();
        Some(winners as f64 / realized.len() as f64)
    }

    /// Calculate profit factor. `None` without losses.
    fn calculate_profit_factor(gross_profit: Decimal, gross_loss: Decimal) -> Option<f64> {
        let loss = to_f64(gross_loss.abs());
        if loss == 0.0 {
            return None;
        }
        Some(to_f64(gross_profit) / loss)
    }

    /// Calculate CAGR over `calendar_days` (crypto trades every day).
    fn calculate_cagr(initial: Decimal, final_val: Decimal, calendar_days: i64) -> f64 {
        let init = to_f64(initial);
        let fin = to_f64(final_val);

        if init <= 0.0 || fin <= 0.0 || calendar_days <= 0 {
            return 0.0;
        }

        let years = calendar_days as f64 / 365.0;
        (fin / init).powf(1.0 / years) - 1.0
    }

    /// Analyze drawdown with the running peak seeded at the initial capital.
    pub fn analyze_drawdown(initial_capital: Decimal, daily: &[DailyPnL]) -> DrawdownAnalysis {
        let mut analysis = DrawdownAnalysis::default();

        let mut peak = initial_capital;
        let mut peak_date: Option<NaiveDate> = None;
        let mut in_drawdown = false;
        let mut worst_peak = initial_capital;

        for point in daily {
            if point.portfolio_value >= peak {
                if in_drawdown {
                    analysis.drawdown_periods += 1;
                    if analysis.recovery_date.is_none()
                        && analysis.max_drawdown > Decimal::ZERO
                        && point.portfolio_value >= worst_peak
                    {
                        analysis.recovery_date = Some(point.date);
                    }
                }
                peak = point.portfolio_value;
                peak_date = Some(point.date);
                in_drawdown = false;
                continue;
            }

            in_drawdown = true;
            let drawdown = peak - point.portfolio_value;
            if drawdown > analysis.max_drawdown {
                analysis.max_drawdown = drawdown;
                analysis.max_drawdown_pct = if peak > Decimal::ZERO {
                    to_f64(drawdown / peak)
                } else {
                    0.0
                };
                analysis.max_drawdown_date = Some(point.date);
                analysis.peak_date = peak_date;
                analysis.recovery_date = None;
                analysis.duration_days = match (peak_date, daily.first()) {
                    (Some(p), _) => (point.date - p).num_days(),
                    (None, Some(first)) => (point.date - first.date).num_days() + 1,
                    (None, None) => 0,
                };
                worst_peak = peak;
            }
        }

        if in_drawdown {
            analysis.drawdown_periods += 1;
        }

        analysis
    }

    /// Calculate monthly returns from month-end valuations.
    pub fn monthly_returns(result: &BacktestResult) -> Vec<MonthlyReturn> {
        let mut month_end: BTreeMap<(i32, u32), Decimal> = BTreeMap::new();
        for point in &result.daily_pnl {
            month_end.insert((point.date.year(), point.date.month()), point.portfolio_value);
        }

        let mut trades: BTreeMap<(i32, u32), usize> = BTreeMap::new();
        for trade in &result.trades {
            let date = trade.timestamp.date_naive();
            *trades.entry((date.year(), date.month())).or_default() += 1;
        }

        let mut prev = result.initial_capital;
        month_end
            .into_iter()
            .map(|((year, month), value)| {
                let return_pct = if prev.is_zero() {
                    0.0
                } else {
                    to_f64((value - prev) / prev)
                };
                prev = value;
                MonthlyReturn {
                    year,
                    month,
                    return_pct,
                    trades: trades.get(&(year, month)).copied().unwrap_or(0),
                }
            })
            .collect()
    }
}
