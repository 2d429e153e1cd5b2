//! Performance metrics module.
//!
//! Provides performance calculations over a backtest:
//! - Total return, CAGR, monthly returns
//! - Sharpe ratio, Sortino ratio, Calmar ratio
//! - Maximum drawdown with peak, trough and recovery dates
//! - Win rate and profit factor over realized trades

pub mod calculator;

pub use calculator::{DrawdownAnalysis, MetricsCalculator, MonthlyReturn, PerformanceMetrics};
