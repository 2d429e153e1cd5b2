//! Portfolio Greeks aggregation and limit checks.
//!
//! Portfolio exposure is the signed, quantity-weighted sum of leg Greeks:
//! - Delta: sum(sign * quantity * leg_delta)
//! - Gamma, theta, vega and rho likewise

use serde::{Deserialize, Serialize};

use super::warnings::RiskWarning;
use crate::data::Greeks;
use crate::strategy::LegValuation;

/// Optional per-Greek limits. Unset limits are not checked.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GreekLimits {
    /// Maximum absolute portfolio delta.
    pub max_delta: Option<f64>,
    /// Maximum absolute portfolio gamma.
    pub max_gamma: Option<f64>,
    /// Minimum portfolio theta (per day).
    pub min_theta: Option<f64>,
    /// Maximum absolute portfolio vega (per vol point).
    pub max_vega: Option<f64>,
}

/// Aggregated portfolio Greeks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PortfolioGreeks {
    pub greeks: Greeks,
    /// Number of legs included.
    pub leg_count: usize,
}

impl PortfolioGreeks {
    /// Sum signed Greeks over priced legs.
    pub fn from_valuations(valuations: &[LegValuation]) -> Self {
        let mut portfolio = Self::default();
        for valuation in valuations {
            portfolio.greeks += valuation.signed_greeks();
            portfolio.leg_count += 1;
        }
        portfolio
    }

    /// Check if portfolio is within configured limits.
    pub fn check_limits(&self, limits: &GreekLimits) -> GreeksLimitCheck {
        let g = &self.greeks;
        let mut violations = Vec::new();

        let mut exceeds = |greek: &str, value: f64, limit: Option<f64>| {
            if let Some(limit) = limit {
                if value.abs() > limit {
                    violations.push(RiskWarning::GreekLimitExceeded {
                        greek: greek.to_string(),
                        value,
                        limit,
                    });
                }
            }
        };
        exceeds("delta", g.delta, limits.max_delta);
        exceeds("gamma", g.gamma, limits.max_gamma);
        exceeds("vega", g.vega, limits.max_vega);

        if let Some(min_theta) = limits.min_theta {
            if g.theta < min_theta {
                violations.push(RiskWarning::GreekLimitExceeded {
                    greek: "theta".to_string(),
                    value: g.theta,
                    limit: min_theta,
                });
            }
        }

        GreeksLimitCheck {
            is_within_limits: violations.is_empty(),
            violations,
        }
    }
}

/// Result of checking Greeks limits.
#[derive(Debug, Clone, PartialEq)]
pub struct GreeksLimitCheck {
    pub is_within_limits: bool,
    pub violations: Vec<RiskWarning>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Action;
    use crate::pricing::PricingResult;

    fn valuation(action: Action, quantity: u32, delta: f64, theta: f64) -> LegValuation {
        LegValuation {
            instrument_name: "BTC-29MAR24-45000-C".into(),
            action,
            quantity,
            volatility: 0.8,
            volatility_source: crate::strategy::VolatilitySource::Snapshot,
            pricing: PricingResult {
                price: 4000.0,
                delta,
                gamma: 0.00004,
                theta,
                vega: 51.0,
                rho: 18.0,
            },
        }
    }

    #[test]
    fn test_from_valuations() {
        let legs = vec![
            valuation(Action::Buy, 2, 0.55, -60.0),
            valuation(Action::Sell, 1, 0.30, -40.0),
        ];
        let portfolio = PortfolioGreeks::from_valuations(&legs);
        assert_eq!(portfolio.leg_count, 2);
        assert!((portfolio.greeks.delta - 0.80).abs() < 1e-12);
        assert!((portfolio.greeks.theta - (-80.0)).abs() < 1e-12);
        assert!((portfolio.greeks.vega - 51.0).abs() < 1e-12);
    }

    #[test]
    fn test_check_limits() {
        let portfolio = PortfolioGreeks::from_valuations(&[valuation(Action::Buy, 2, 0.55, -60.0)]);

        assert!(portfolio.check_limits(&GreekLimits::default()).is_within_limits);

        let limits = GreekLimits {
            max_delta: Some(1.0),
            min_theta: Some(0.0),
            ..Default::default()
        };
        let check = portfolio.check_limits(&limits);
        assert!(!check.is_within_limits);
        assert!(matches!(
            &check.violations[..],
            [RiskWarning::GreekLimitExceeded { greek, .. }] if greek == "theta"
        ));
    }
}
