//! Terminal payoff analysis.
//!
//! The payoff at expiry is
//!
//! ```text
//! V(S) = sum(sign * quantity * intrinsic(leg, S)) - initial_cost
//! ```
//!
//! which is piecewise linear with kinks at the distinct strikes. Prices are
//! non-negative, so the region below the lowest strike is a bounded segment
//! ending at S = 0; only the ray above the highest strike can be unbounded.

use serde::{Deserialize, Serialize};

use crate::data::{OptionType, StrategyLeg};

/// Direction an unbounded payoff runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

/// Extreme of the payoff function.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum PayoffBound {
    Finite(f64),
    Unbounded(Direction),
}

impl PayoffBound {
    pub fn finite(&self) -> Option<f64> {
        match self {
            Self::Finite(v) => Some(*v),
            Self::Unbounded(_) => None,
        }
    }

    pub fn is_unbounded(&self) -> bool {
        matches!(self, Self::Unbounded(_))
    }
}

/// Payoff function of a leg list with its extremes and breakevens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayoffAnalysis {
    pub initial_cost: f64,
    /// Terminal prices at which the payoff can change slope, starting at 0.
    pub kinks: Vec<f64>,
    /// Payoff at each kink.
    pub values: Vec<f64>,
    /// Slope of the ray above the highest strike.
    pub upper_slope: f64,
    pub max_profit: PayoffBound,
    pub max_loss: PayoffBound,
    pub breakeven_points: Vec<f64>,
}

impl PayoffAnalysis {
    /// Build the payoff of `legs` given the signed premium paid to open them.
    pub fn new(legs: &[StrategyLeg], initial_cost: f64) -> Self {
        let mut kinks: Vec<f64> = std::iter::once(0.0)
            .chain(legs.iter().map(|l| l.contract.strike_price))
            .filter(|k| k.is_finite() && *k >= 0.0)
            .collect();
        kinks.sort_by(f64::total_cmp);
        kinks.dedup();

        let values: Vec<f64> = kinks
            .iter()
            .map(|&s| payoff_at(legs, initial_cost, s))
            .collect();

        // Integer quantities, so the slope is an exact integer sum.
        let upper_slope: f64 = legs
            .iter()
            .filter(|l| l.contract.option_type == OptionType::Call)
            .map(|l| l.signed_quantity())
            .sum();

        let highest = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let lowest = values.iter().copied().fold(f64::INFINITY, f64::min);

        let max_profit = if upper_slope > 0.0 {
            PayoffBound::Unbounded(Direction::Up)
        } else {
            PayoffBound::Finite(highest)
        };
        let max_loss = if upper_slope < 0.0 {
            PayoffBound::Unbounded(Direction::Down)
        } else {
            PayoffBound::Finite(lowest)
        };

        let scale = kinks
            .last()
            .copied()
            .unwrap_or(0.0)
            .max(initial_cost.abs())
            .max(1.0);
        let breakeven_points = breakevens(&kinks, &values, upper_slope, scale);

        Self {
            initial_cost,
            kinks,
            values,
            upper_slope,
            max_profit,
            max_loss,
            breakeven_points,
        }
    }

    /// Payoff at terminal price `spot`.
    pub fn value_at(&self, spot: f64) -> f64 {
        let spot = spot.max(0.0);
        let last = self.kinks.len() - 1;
        if spot >= self.kinks[last] {
            return self.values[last] + self.upper_slope * (spot - self.kinks[last]);
        }
        let idx = self.kinks.partition_point(|&k| k <= spot).max(1);
        let (x0, x1) = (self.kinks[idx - 1], self.kinks[idx]);
        let (v0, v1) = (self.values[idx - 1], self.values[idx]);
        v0 + (v1 - v0) * (spot - x0) / (x1 - x0)
    }
}

/// Terminal payoff of `legs` at `spot`, net of `initial_cost`.
pub fn payoff_at(legs: &[StrategyLeg], initial_cost: f64, spot: f64) -> f64 {
    legs.iter()
        .map(|l| l.signed_quantity() * l.contract.intrinsic_value(spot))
        .sum::<f64>()
        - initial_cost
}

fn breakevens(kinks: &[f64], values: &[f64], upper_slope: f64, scale: f64) -> Vec<f64> {
    let eps = 1e-9 * scale;
    let mut roots = Vec::new();

    for (&x, &v) in kinks.iter().zip(values) {
        if v.abs() <= eps {
            roots.push(x);
        }
    }

    for i in 1..kinks.len() {
        let (x0, x1) = (kinks[i - 1], kinks[i]);
        let (v0, v1) = (values[i - 1], values[i]);
        if (v0 > eps && v1 < -eps) || (v0 < -eps && v1 > eps) {
            roots.push(x0 - v0 * (x1 - x0) / (v1 - v0));
        }
    }

    if let (Some(&x), Some(&v)) = (kinks.last(), values.last()) {
        if upper_slope != 0.0 && v.abs() > eps && v * upper_slope < 0.0 {
            roots.push(x - v / upper_slope);
        }
    }

    roots.sort_by(f64::total_cmp);
    roots.dedup_by(|a, b| (*a - *b).abs() <= eps);
    roots
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::OptionContract;
    use approx::assert_relative_eq;
    use chrono::NaiveDate;

    fn contract(option_type: OptionType, strike: f64) -> OptionContract {
        let expiry = NaiveDate::from_ymd_opt(2024, 3, 29).unwrap();
        OptionContract::listed("BTC", option_type, strike, expiry)
    }

    #[test]
    fn test_long_straddle() {
        let legs = vec![
            StrategyLeg::buy(contract(OptionType::Call, 45000.0), 1),
            StrategyLeg::buy(contract(OptionType::Put, 45000.0), 1),
        ];
        let payoff = PayoffAnalysis::new(&legs, 7800.0);

        assert_eq!(payoff.max_profit, PayoffBound::Unbounded(Direction::Up));
        assert_eq!(payoff.max_loss, PayoffBound::Finite(-7800.0));
        assert_eq!(payoff.breakeven_points.len(), 2);
        assert_relative_eq!(payoff.breakeven_points[0], 37200.0, epsilon = 1e-6);
        assert_relative_eq!(payoff.breakeven_points[1], 52800.0, epsilon = 1e-6);
    }

    #[test]
    fn test_iron_condor_bounded() {
        let legs = vec![
            StrategyLeg::buy(contract(OptionType::Put, 42000.0), 1),
            StrategyLeg::sell(contract(OptionType::Put, 44000.0), 1),
            StrategyLeg::sell(contract(OptionType::Call, 46000.0), 1),
            StrategyLeg::buy(contract(OptionType::Call, 48000.0), 1),
        ];
        let credit = 600.0;
        let payoff = PayoffAnalysis::new(&legs, -credit);

        assert_eq!(payoff.upper_slope, 0.0);
        assert_relative_eq!(payoff.max_profit.finite().unwrap(), credit, epsilon = 1e-9);
        assert_relative_eq!(payoff.max_loss.finite().unwrap(), -(2000.0 - credit), epsilon = 1e-9);
        assert_eq!(payoff.breakeven_points.len(), 2);
        assert_relative_eq!(payoff.breakeven_points[0], 43400.0, epsilon = 1e-6);
        assert_relative_eq!(payoff.breakeven_points[1], 46600.0, epsilon = 1e-6);
    }

    #[test]
    fn test_naked_short_call() {
        let legs = vec![StrategyLeg::sell(contract(OptionType::Call, 50000.0), 1)];
        let payoff = PayoffAnalysis::new(&legs, -1500.0);
        assert_eq!(payoff.max_loss, PayoffBound::Unbounded(Direction::Down));
        assert_eq!(payoff.max_profit, PayoffBound::Finite(1500.0));
        assert_eq!(payoff.breakeven_points, vec![51500.0]);
    }

    #[test]
    fn test_long_put_is_bounded_at_zero() {
        let legs = vec![StrategyLeg::buy(contract(OptionType::Put, 40000.0), 2)];
        let payoff = PayoffAnalysis::new(&legs, 3000.0);
        assert_eq!(payoff.max_profit, PayoffBound::Finite(77000.0));
        assert_eq!(payoff.max_loss, PayoffBound::Finite(-3000.0));
        assert_eq!(payoff.breakeven_points, vec![38500.0]);
    }

    #[test]
    fn test_flat_zero_segment_reports_both_ends() {
        // Bull call spread whose debit equals its width: payoff is 0 above the top strike
        // and -width below; breakevens collapse onto the top strike.
        let legs = vec![
            StrategyLeg::buy(contract(OptionType::Call, 100.0), 1),
            StrategyLeg::sell(contract(OptionType::Call, 110.0), 1),
        ];
        let payoff = PayoffAnalysis::new(&legs, 10.0);
        assert_eq!(payoff.breakeven_points, vec![110.0]);
        assert_eq!(payoff.max_profit, PayoffBound::Finite(0.0));
    }

    #[test]
    fn test_value_at_matches_direct_evaluation() {
        let legs = vec![
            StrategyLeg::buy(contract(OptionType::Call, 44000.0), 1),
            StrategyLeg::sell(contract(OptionType::Call, 45000.0), 2),
            StrategyLeg::buy(contract(OptionType::Call, 46000.0), 1),
        ];
        let payoff = PayoffAnalysis::new(&legs, 250.0);
        for spot in [0.0, 10000.0, 44000.0, 44500.0, 45000.0, 45999.0, 46000.0, 90000.0] {
            assert_relative_eq!(payoff.value_at(spot), payoff_at(&legs, 250.0, spot), epsilon = 1e-9);
        }
    }

    #[test]
    fn test_bound_serialization() {
        let json = serde_json::to_string(&PayoffBound::Unbounded(Direction::Down)).unwrap();
        assert_eq!(json, r#"{"kind":"unbounded","value":"down"}"#);
        let json = serde_json::to_string(&PayoffBound::Finite(-1400.0)).unwrap();
        assert_eq!(json, r#"{"kind":"finite","value":-1400.0}"#);
    }
}
