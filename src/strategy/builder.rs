//! Builders for the common multi-leg structures.
//!
//! Every builder produces a plain [`Strategy`]; the strategy type is only a
//! label and the legs are what get priced.

use chrono::NaiveDate;

use crate::data::{Action, OptionContract, OptionType, Strategy, StrategyLeg, StrategyType};
use crate::error::{EngineError, Result};

/// Builder for creating standard option strategies on one expiry.
pub struct StrategyBuilder {
    underlying: String,
    expiration: NaiveDate,
    quantity: u32,
    name: Option<String>,
    entry_date: Option<NaiveDate>,
    exit_date: Option<NaiveDate>,
}

impl StrategyBuilder {
    pub fn new(underlying: &str, expiration: NaiveDate) -> Self {
        Self {
            underlying: underlying.to_string(),
            expiration,
            quantity: 1,
            name: None,
            entry_date: None,
            exit_date: None,
        }
    }

    /// Contracts per wing (butterflies sell twice this at the body).
    pub fn quantity(mut self, quantity: u32) -> Self {
        self.quantity = quantity;
        self
    }

    pub fn name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    /// Entry and exit dates applied to every leg.
    pub fn schedule(mut self, entry: Option<NaiveDate>, exit: Option<NaiveDate>) -> Self {
        self.entry_date = entry;
        self.exit_date = exit;
        self
    }

    fn leg(&self, option_type: OptionType, strike: f64, action: Action, quantity: u32) -> StrategyLeg {
        let contract = OptionContract::listed(&self.underlying, option_type, strike, self.expiration);
        StrategyLeg::new(contract, action, quantity).with_schedule(self.entry_date, self.exit_date)
    }

    fn finish(self, default_name: String, strategy_type: StrategyType, legs: Vec<StrategyLeg>) -> Strategy {
        let name = self.name.unwrap_or(default_name);
        Strategy::new(name, strategy_type, legs)
    }

    fn label(&self, kind: &str) -> String {
        format!(
            "{} {} {}",
            self.underlying,
            self.expiration.format("%Y-%m-%d"),
            kind
        )
    }

    pub fn single_leg(self, option_type: OptionType, strike: f64, action: Action) -> Strategy {
        let leg = self.leg(option_type, strike, action, self.quantity);
        let name = self.label(&format!("{:?} {:?} {}", action, option_type, strike).to_lowercase());
        self.finish(name, StrategyType::SingleLeg, vec![leg])
    }

    /// Call and put at the same strike, same side.
    pub fn straddle(self, strike: f64, action: Action) -> Strategy {
        let legs = vec![
            self.leg(OptionType::Call, strike, action, self.quantity),
            self.leg(OptionType::Put, strike, action, self.quantity),
        ];
        let name = self.label("straddle");
        self.finish(name, StrategyType::Straddle, legs)
    }

    /// Out-of-the-money put and call, same side.
    pub fn strangle(self, put_strike: f64, call_strike: f64, action: Action) -> Result<Strategy> {
        if put_strike >= call_strike {
            return Err(EngineError::InvalidInput(format!(
                "Strangle put strike {} must be below call strike {}",
                put_strike, call_strike
            )));
        }
        let legs = vec![
            self.leg(OptionType::Put, put_strike, action, self.quantity),
            self.leg(OptionType::Call, call_strike, action, self.quantity),
        ];
        let name = self.label("strangle");
        Ok(self.finish(name, StrategyType::Strangle, legs))
    }

    /// Short iron condor: long put wing, short put, short call, long call wing.
    pub fn iron_condor(
        self,
        long_put: f64,
        short_put: f64,
        short_call: f64,
        long_call: f64,
    ) -> Result<Strategy> {
        if !(long_put < short_put && short_put < short_call && short_call < long_call) {
            return Err(EngineError::InvalidInput(format!(
                "Iron condor strikes must ascend: {} < {} < {} < {}",
                long_put, short_put, short_call, long_call
            )));
        }
        let q = self.quantity;
        let legs = vec![
            self.leg(OptionType::Put, long_put, Action::Buy, q),
            self.leg(OptionType::Put, short_put, Action::Sell, q),
            self.leg(OptionType::Call, short_call, Action::Sell, q),
            self.leg(OptionType::Call, long_call, Action::Buy, q),
        ];
        let name = self.label("iron condor");
        Ok(self.finish(name, StrategyType::IronCondor, legs))
    }

    /// Long butterfly: buy the wings, sell twice the body.
    pub fn butterfly(
        self,
        option_type: OptionType,
        lower: f64,
        middle: f64,
        upper: f64,
    ) -> Result<Strategy> {
        if !(lower < middle && middle < upper) {
            return Err(EngineError::InvalidInput(format!(
                "Butterfly strikes must ascend: {} < {} < {}",
                lower, middle, upper
            )));
        }
        let q = self.quantity;
        let body = q.checked_mul(2).ok_or_else(|| {
            EngineError::InvalidInput(format!("Butterfly quantity {} is too large", q))
        })?;
        let legs = vec![
            self.leg(option_type, lower, Action::Buy, q),
            self.leg(option_type, middle, Action::Sell, body),
            self.leg(option_type, upper, Action::Buy, q),
        ];
        let name = self.label("butterfly");
        Ok(self.finish(name, StrategyType::Butterfly, legs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expiry() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 29).unwrap()
    }

    #[test]
    fn test_straddle() {
        let s = StrategyBuilder::new("BTC", expiry()).quantity(2).straddle(45000.0, Action::Buy);
        assert_eq!(s.strategy_type, StrategyType::Straddle);
        assert_eq!(s.legs.len(), 2);
        assert!(s.legs.iter().all(|l| l.quantity == 2 && l.action == Action::Buy));
        assert_eq!(s.legs[0].instrument_name(), "BTC-29MAR24-45000-C");
        assert_eq!(s.legs[1].instrument_name(), "BTC-29MAR24-45000-P");
        assert_eq!(s.name, "BTC 2024-03-29 straddle");
    }

    #[test]
    fn test_iron_condor_shape() {
        let s = StrategyBuilder::new("BTC", expiry())
            .name("weekly condor")
            .iron_condor(42000.0, 44000.0, 46000.0, 48000.0)
            .unwrap();
        assert_eq!(s.name, "weekly condor");
        let signed: Vec<f64> = s.legs.iter().map(|l| l.signed_quantity()).collect();
        assert_eq!(signed, vec![1.0, -1.0, -1.0, 1.0]);

        assert!(StrategyBuilder::new("BTC", expiry())
            .iron_condor(44000.0, 42000.0, 46000.0, 48000.0)
            .is_err());
    }

    #[test]
    fn test_butterfly_body_is_doubled() {
        let s = StrategyBuilder::new("ETH", expiry())
            .butterfly(OptionType::Call, 2400.0, 2500.0, 2600.0)
            .unwrap();
        assert_eq!(s.legs[1].quantity, 2);
        assert_eq!(s.legs[1].action, Action::Sell);
        let net: f64 = s.legs.iter().map(|l| l.signed_quantity()).sum();
        assert_eq!(net, 0.0);

        let oversized = StrategyBuilder::new("ETH", expiry())
            .quantity(u32::MAX / 2 + 1)
            .butterfly(OptionType::Call, 2400.0, 2500.0, 2600.0);
        assert!(matches!(oversized, Err(EngineError::InvalidInput(_))));
    }

    #[test]
    fn test_schedule_applies_to_all_legs() {
        let entry = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let s = StrategyBuilder::new("BTC", expiry())
            .schedule(Some(entry), None)
            .strangle(40000.0, 50000.0, Action::Sell)
            .unwrap();
        assert!(s.legs.iter().all(|l| l.entry_date == Some(entry) && l.exit_date.is_none()));
        assert!(StrategyBuilder::new("BTC", expiry())
            .strangle(50000.0, 40000.0, Action::Sell)
            .is_err());
    }
}
