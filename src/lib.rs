//! Pricing, risk metrics and backtesting for multi-leg crypto option strategies.
//!
//! - [`pricing`]: Black-Scholes-Merton prices and Greeks
//! - [`strategy`]: strategy builders and leg aggregation
//! - [`risk`]: terminal payoff analysis, risk metrics and warnings
//! - [`backtest`]: day-by-day replay against historical snapshots
//! - [`metrics`]: performance statistics over a finished backtest
//! - [`service`]: facade over configuration, stores and market data

pub mod backtest;
pub mod config;
pub mod data;
pub mod error;
pub mod metrics;
pub mod pricing;
pub mod risk;
pub mod service;
pub mod store;
pub mod strategy;

// Re-export commonly used types
pub use backtest::{BacktestConfig, BacktestEngine, BacktestResult, DailyPnL, MissingDataPolicy, Trade};
pub use config::EngineConfig;
pub use data::{
    Action, Greeks, MarketDataProvider, MarketSnapshot, OptionContract, OptionType, Strategy,
    StrategyLeg, StrategyType,
};
pub use error::{EngineError, Result};
pub use metrics::{MetricsCalculator, PerformanceMetrics};
pub use pricing::{price, BlackScholes, PricingResult};
pub use risk::{MarketContext, PayoffBound, RiskAnalyzer, RiskMetrics, RiskReport, RiskReward, RiskWarning};
pub use service::{ContractInputs, OptionsEngine};
pub use strategy::{aggregate, StrategyAggregator, StrategyBuilder};
