//! Risk metrics for a strategy at a point in time.
//!
//! Combines the aggregator (net premium, Greeks) with the payoff analysis
//! (extremes, breakevens) and raises advisory warnings. Invalid legs and
//! pricing failures are reported in [`RiskReport::errors`] rather than
//! returned as an `Err`, so a caller always gets a report back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::payoff::{PayoffAnalysis, PayoffBound};
use super::portfolio_greeks::{GreekLimits, PortfolioGreeks};
use super::warnings::RiskWarning;
use crate::data::{Greeks, MarketSnapshot, Strategy, StrategyLeg};
use crate::error::EngineError;
use crate::strategy::{leg_errors, StrategyAggregator};

/// Risk analysis configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Ratios below this raise `LowRiskReward`.
    pub min_risk_reward: f64,
    /// Largest |net premium| as a fraction of notional before warning.
    pub max_premium_fraction: f64,
    /// Notional for the premium check (default: spot * total quantity).
    pub reference_notional: Option<f64>,
    pub greek_limits: GreekLimits,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            min_risk_reward: 0.2,
            max_premium_fraction: 0.25,
            reference_notional: None,
            greek_limits: GreekLimits::default(),
        }
    }
}

/// Reward per unit of risk.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum RiskReward {
    /// max_profit / |max_loss|.
    Ratio(f64),
    /// Loss is unbounded or zero.
    Undefined,
    /// Profit is unbounded while loss is finite.
    Unbounded,
}

impl RiskReward {
    pub fn from_bounds(max_profit: PayoffBound, max_loss: PayoffBound) -> Self {
        match (max_profit, max_loss) {
            (_, PayoffBound::Unbounded(_)) => Self::Undefined,
            (_, PayoffBound::Finite(loss)) if loss >= 0.0 => Self::Undefined,
            (PayoffBound::Unbounded(_), PayoffBound::Finite(_)) => Self::Unbounded,
            (PayoffBound::Finite(profit), PayoffBound::Finite(loss)) => Self::Ratio(profit / loss.abs()),
        }
    }
}

/// Risk figures for a strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskMetrics {
    /// Signed net premium: positive is paid, negative received.
    pub initial_cost: f64,
    pub max_profit: PayoffBound,
    /// Minimum of the payoff (negative when money can be lost).
    pub max_loss: PayoffBound,
    /// Ascending.
    pub breakeven_points: Vec<f64>,
    pub risk_reward_ratio: RiskReward,
    pub greeks: Greeks,
}

/// Error entry in a risk report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportedError {
    pub code: String,
    pub message: String,
}

impl From<&EngineError> for ReportedError {
    fn from(err: &EngineError) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

/// Output of [`RiskAnalyzer::build_risk_metrics`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskReport {
    /// Absent when any error was collected.
    pub metrics: Option<RiskMetrics>,
    pub errors: Vec<ReportedError>,
    pub warnings: Vec<RiskWarning>,
}

impl RiskReport {
    fn failed(errors: Vec<EngineError>) -> Self {
        Self {
            metrics: None,
            errors: errors.iter().map(ReportedError::from).collect(),
            warnings: Vec::new(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.errors.is_empty() && self.metrics.is_some()
    }
}

/// Market inputs for a risk calculation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketContext {
    pub snapshot: MarketSnapshot,
    pub valuation_time: DateTime<Utc>,
    pub rate: f64,
}

impl MarketContext {
    /// Value at the snapshot's own timestamp.
    pub fn new(snapshot: MarketSnapshot, rate: f64) -> Self {
        Self {
            valuation_time: snapshot.timestamp,
            snapshot,
            rate,
        }
    }

    pub fn at(mut self, valuation_time: DateTime<Utc>) -> Self {
        self.valuation_time = valuation_time;
        self
    }
}

/// Builds risk metrics and warnings.
#[derive(Debug, Clone)]
pub struct RiskAnalyzer {
    config: RiskConfig,
    default_volatility: f64,
}

impl RiskAnalyzer {
    pub fn new(config: RiskConfig, default_volatility: f64) -> Self {
        Self {
            config,
            default_volatility,
        }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    /// Payoff extremes and breakevens for legs opened at `initial_cost`.
    pub fn analyze(&self, legs: &[StrategyLeg], initial_cost: f64) -> PayoffAnalysis {
        PayoffAnalysis::new(legs, initial_cost)
    }

    /// Full risk report for `strategy` under `context`. Pure: the same
    /// inputs always produce the same report.
    pub fn build_risk_metrics(&self, strategy: &Strategy, context: &MarketContext) -> RiskReport {
        let mut errors = leg_errors(&strategy.legs);
        let quoted = &context.snapshot.underlying;
        for (idx, leg) in strategy.legs.iter().enumerate() {
            if &leg.contract.underlying != quoted {
                errors.push(EngineError::InvalidInput(format!(
                    "Leg {} ({}): snapshot quotes {}, not {}",
                    idx,
                    leg.instrument_name(),
                    quoted,
                    leg.contract.underlying
                )));
            }
        }
        if !errors.is_empty() {
            return RiskReport::failed(errors);
        }

        let aggregator = StrategyAggregator::new(context.rate, self.default_volatility);
        let aggregate =
            match aggregator.aggregate(&strategy.legs, &context.snapshot, context.valuation_time) {
                Ok(aggregate) => aggregate,
                Err(err) => return RiskReport::failed(vec![err]),
            };

        let payoff = self.analyze(&strategy.legs, aggregate.net_premium);
        let metrics = RiskMetrics {
            initial_cost: aggregate.net_premium,
            max_profit: payoff.max_profit,
            max_loss: payoff.max_loss,
            breakeven_points: payoff.breakeven_points.clone(),
            risk_reward_ratio: RiskReward::from_bounds(payoff.max_profit, payoff.max_loss),
            greeks: aggregate.greeks,
        };

        let mut warnings = aggregate.warnings;
        warnings.extend(self.warnings(
            &strategy.legs,
            &payoff,
            &metrics,
            context.snapshot.underlying_price,
        ));
        warnings.extend(
            PortfolioGreeks::from_valuations(&aggregate.legs)
                .check_limits(&self.config.greek_limits)
                .violations,
        );
        if context.snapshot.synthetic {
            warnings.push(RiskWarning::SyntheticDataUsed { snapshots: 1 });
        }

        debug!(
            "Risk metrics for {}: cost {:.2}, {} breakevens, {} warnings",
            strategy.name,
            metrics.initial_cost,
            metrics.breakeven_points.len(),
            warnings.len()
        );

        RiskReport {
            metrics: Some(metrics),
            errors: Vec::new(),
            warnings,
        }
    }

    /// Payoff and premium warnings.
    pub fn warnings(
        &self,
        legs: &[StrategyLeg],
        payoff: &PayoffAnalysis,
        metrics: &RiskMetrics,
        spot: f64,
    ) -> Vec<RiskWarning> {
        let mut warnings = Vec::new();

        if payoff.max_loss.is_unbounded() {
            warnings.push(RiskWarning::UnboundedLoss {
                slope: payoff.upper_slope,
            });
        }

        if let RiskReward::Ratio(ratio) = metrics.risk_reward_ratio {
            if ratio < self.config.min_risk_reward {
                warnings.push(RiskWarning::LowRiskReward {
                    ratio,
                    threshold: self.config.min_risk_reward,
                });
            }
        }

        let notional = self.config.reference_notional.unwrap_or_else(|| {
            spot * legs.iter().map(|l| l.quantity as f64).sum::<f64>()
        });
        let premium = metrics.initial_cost.abs();
        if notional > 0.0 && premium > self.config.max_premium_fraction * notional {
            warnings.push(RiskWarning::PremiumExceedsNotional {
                premium,
                notional,
                max_fraction: self.config.max_premium_fraction,
            });
        }

        warnings
    }
}
