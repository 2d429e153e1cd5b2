//! Advisory warnings attached to risk reports and backtest results.
//!
//! Warnings never block a computation.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RiskWarning {
    /// The payoff keeps falling as the underlying rises.
    UnboundedLoss { slope: f64 },

    LowRiskReward { ratio: f64, threshold: f64 },

    PremiumExceedsNotional {
        premium: f64,
        notional: f64,
        max_fraction: f64,
    },

    GreekLimitExceeded {
        greek: String,
        value: f64,
        limit: f64,
    },

    /// No implied volatility in the snapshot; the configured default was used.
    DefaultVolatilityUsed { instrument: String, volatility: f64 },

    /// Inputs came from generated rather than observed market data.
    SyntheticDataUsed { snapshots: usize },
}

impl fmt::Display for RiskWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnboundedLoss { slope } => {
                write!(f, "Unbounded loss potential (payoff slope {:.2} above top strike)", slope)
            }
            Self::LowRiskReward { ratio, threshold } => {
                write!(f, "Risk/reward {:.3} below threshold {:.3}", ratio, threshold)
            }
            Self::PremiumExceedsNotional {
                premium,
                notional,
                max_fraction,
            } => write!(
                f,
                "Net premium {:.2} exceeds {:.0}% of notional {:.2}",
                premium,
                max_fraction * 100.0,
                notional
            ),
            Self::GreekLimitExceeded { greek, value, limit } => {
                write!(f, "{} {:.4} exceeds limit {:.4}", greek, value, limit)
            }
            Self::DefaultVolatilityUsed {
                instrument,
                volatility,
            } => write!(
                f,
                "No implied volatility for {}; used default {:.2}",
                instrument, volatility
            ),
            Self::SyntheticDataUsed { snapshots } => {
                write!(f, "{} synthetic market snapshot(s) used", snapshots)
            }
        }
    }
}
