//! Strategy aggregation.
//!
//! Prices every leg against one market snapshot and sums the signed results
//! into a net premium and portfolio Greeks.

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::data::{Action, Greeks, MarketSnapshot, StrategyLeg};
use crate::error::Result;
use crate::pricing::{BlackScholes, PricingResult};
use crate::risk::RiskWarning;

/// Leg count at which legs are priced on the rayon pool.
const PARALLEL_LEG_THRESHOLD: usize = 16;

/// Where a leg's volatility came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolatilitySource {
    Snapshot,
    Default,
}

/// One priced leg.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegValuation {
    pub instrument_name: String,
    pub action: Action,
    pub quantity: u32,
    pub volatility: f64,
    pub volatility_source: VolatilitySource,
    /// Per-contract model output (unsigned).
    pub pricing: PricingResult,
}

impl LegValuation {
    /// sign * quantity * price.
    pub fn signed_value(&self) -> f64 {
        self.action.sign() * self.quantity as f64 * self.pricing.price
    }

    pub fn signed_greeks(&self) -> Greeks {
        self.pricing
            .greeks()
            .scaled(self.action.sign() * self.quantity as f64)
    }
}

/// Portfolio-level valuation of a leg list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aggregate {
    /// Signed net premium: positive is a debit, negative a credit.
    pub net_premium: f64,
    pub greeks: Greeks,
    pub legs: Vec<LegValuation>,
    pub warnings: Vec<RiskWarning>,
}

/// Prices leg lists with a fixed rate and fallback volatility.
#[derive(Debug, Clone, Copy)]
pub struct StrategyAggregator {
    model: BlackScholes,
    default_volatility: f64,
}

impl StrategyAggregator {
    pub fn new(rate: f64, default_volatility: f64) -> Self {
        Self {
            model: BlackScholes::new(rate),
            default_volatility,
        }
    }

    pub fn rate(&self) -> f64 {
        self.model.rate
    }

    pub fn aggregate(
        &self,
        legs: &[StrategyLeg],
        snapshot: &MarketSnapshot,
        valuation_time: DateTime<Utc>,
    ) -> Result<Aggregate> {
        let valuations: Vec<LegValuation> = if legs.len() >= PARALLEL_LEG_THRESHOLD {
            legs.par_iter()
                .map(|leg| self.value_leg(leg, snapshot, valuation_time))
                .collect::<Result<Vec<_>>>()?
        } else {
            legs.iter()
                .map(|leg| self.value_leg(leg, snapshot, valuation_time))
                .collect::<Result<Vec<_>>>()?
        };

        let mut net_premium = 0.0;
        let mut greeks = Greeks::default();
        let mut warnings = Vec::new();
        for valuation in &valuations {
            net_premium += valuation.signed_value();
            greeks += valuation.signed_greeks();
            if valuation.volatility_source == VolatilitySource::Default {
                warn!(
                    "No implied volatility for {}; using default {:.2}",
                    valuation.instrument_name, valuation.volatility
                );
                warnings.push(RiskWarning::DefaultVolatilityUsed {
                    instrument: valuation.instrument_name.clone(),
                    volatility: valuation.volatility,
                });
            }
        }

        Ok(Aggregate {
            net_premium,
            greeks,
            legs: valuations,
            warnings,
        })
    }

    fn value_leg(
        &self,
        leg: &StrategyLeg,
        snapshot: &MarketSnapshot,
        valuation_time: DateTime<Utc>,
    ) -> Result<LegValuation> {
        let (volatility, volatility_source) = match snapshot.quote(leg.instrument_name()) {
            Some(quote) => (quote.implied_volatility, VolatilitySource::Snapshot),
            None => (self.default_volatility, VolatilitySource::Default),
        };

        let pricing = self.model.price_contract(
            &leg.contract,
            snapshot.underlying_price,
            valuation_time,
            volatility,
        )?;

        Ok(LegValuation {
            instrument_name: leg.instrument_name().to_string(),
            action: leg.action,
            quantity: leg.quantity,
            volatility,
            volatility_source,
            pricing,
        })
    }
}

/// Aggregate `legs` against `snapshot` at `valuation_time`.
pub fn aggregate(
    legs: &[StrategyLeg],
    snapshot: &MarketSnapshot,
    valuation_time: DateTime<Utc>,
    rate: f64,
    default_volatility: f64,
) -> Result<Aggregate> {
    StrategyAggregator::new(rate, default_volatility).aggregate(legs, snapshot, valuation_time)
}
