//! Strategy construction and aggregation.
//!
//! - Builders for the standard multi-leg structures
//! - Leg and strategy validation
//! - Net premium and portfolio Greeks from per-leg pricing

pub mod aggregator;
pub mod builder;
pub mod validation;

pub use aggregator::{aggregate, Aggregate, LegValuation, StrategyAggregator, VolatilitySource};
pub use builder::StrategyBuilder;
pub use validation::{leg_errors, validate_for_backtest};
