//! Backtesting engine for option strategies.
//!
//! This module provides the backtesting framework:
//! - Day-by-day replay against historical snapshots
//! - Leg lifecycle (scheduled entry, scheduled exit, expiry settlement)
//! - Missing-data policies and coverage reporting
//! - Commission tracking
//! - Parallel batch runs

pub mod commission;
pub mod engine;
pub mod runner;
pub mod trade;

pub use commission::{Commission, CommissionModel};
pub use engine::{
    BacktestConfig, BacktestEngine, BacktestResult, BacktestState, CancellationToken, DataCoverage,
    MissingDataPolicy,
};
pub use runner::{BacktestJob, BacktestRunner};
pub use trade::{DailyPnL, LegPosition, PositionStatus, Trade, TradeReason};
