//! Risk analysis module.
//!
//! Provides:
//! - Terminal payoff analysis (extremes, breakevens)
//! - Risk metrics and advisory warnings for a strategy
//! - Portfolio Greeks aggregation and limit checks

pub mod analyzer;
pub mod payoff;
pub mod portfolio_greeks;
pub mod warnings;

pub use analyzer::{
    MarketContext, ReportedError, RiskAnalyzer, RiskConfig, RiskMetrics, RiskReport, RiskReward,
};
pub use payoff::{payoff_at, Direction, PayoffAnalysis, PayoffBound};
pub use portfolio_greeks::{GreekLimits, GreeksLimitCheck, PortfolioGreeks};
pub use warnings::RiskWarning;
