//! Trading fees for option fills.
//!
//! Crypto venues charge per contract either a flat amount or a fraction of
//! the underlying's price, usually capped at a fraction of the option's own
//! price so cheap wings are not charged more than they are worth. Settlement
//! at expiry is free. The default model charges nothing.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Fee charged on one fill.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Commission {
    pub contracts: u32,
    /// Fee per contract before the premium cap.
    pub per_contract: Decimal,
    /// The premium cap lowered the fee.
    pub capped: bool,
    pub total: Decimal,
}

/// Fee schedule applied to every opening and closing fill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommissionModel {
    /// Flat fee per contract in quote currency.
    pub per_contract: Decimal,
    /// Fee per contract as a fraction of the underlying price (0.0003 = 3bp).
    pub underlying_rate: Decimal,
    /// Per-contract fee never exceeds this fraction of the option price
    /// (0 = no cap).
    pub premium_cap: Decimal,
    /// Floor per fill, applied when any fee is charged.
    pub min_per_order: Decimal,
}

impl Default for CommissionModel {
    fn default() -> Self {
        Self::zero()
    }
}

impl CommissionModel {
    /// Flat fee per contract, nothing else.
    pub fn new(per_contract: Decimal) -> Self {
        Self {
            per_contract,
            ..Self::zero()
        }
    }

    /// Underlying-linked fee with a premium cap, the usual venue schedule.
    pub fn venue(underlying_rate: Decimal, premium_cap: Decimal) -> Self {
        Self {
            underlying_rate,
            premium_cap,
            ..Self::zero()
        }
    }

    pub fn zero() -> Self {
        Self {
            per_contract: Decimal::ZERO,
            underlying_rate: Decimal::ZERO,
            premium_cap: Decimal::ZERO,
            min_per_order: Decimal::ZERO,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.per_contract.is_zero() && self.underlying_rate.is_zero() && self.min_per_order.is_zero()
    }

    /// Fee for `contracts` filled at `option_price` with the underlying at `spot`.
    pub fn calculate(&self, contracts: u32, spot: Decimal, option_price: Decimal) -> Commission {
        let base = self.per_contract + self.underlying_rate * spot;
        let (per_contract, capped) = if self.premium_cap > Decimal::ZERO {
            let cap = self.premium_cap * option_price.abs();
            if base > cap {
                (cap, true)
            } else {
                (base, false)
            }
        } else {
            (base, false)
        };

        let mut total = per_contract * Decimal::from(contracts);
        if total > Decimal::ZERO && total < self.min_per_order {
            total = self.min_per_order;
        }

        Commission {
            contracts,
            per_contract: base,
            capped,
            total,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_default_is_free() {
        let model = CommissionModel::default();
        assert!(model.is_zero());
        assert_eq!(model.calculate(100, dec!(45000), dec!(2500)).total, dec!(0));
    }

    #[test]
    fn test_flat_fee() {
        let model = CommissionModel::new(dec!(0.5));
        assert_eq!(model.calculate(10, dec!(45000), dec!(2500)).total, dec!(5));
        assert_eq!(model.calculate(3, dec!(1), dec!(0)).total, dec!(1.5));
    }

    #[test]
    fn test_underlying_fee_with_premium_cap() {
        let model = CommissionModel::venue(dec!(0.0003), dec!(0.125));

        // 3bp of 45000 = 13.5 per contract, well under 12.5% of 2500
        let atm = model.calculate(2, dec!(45000), dec!(2500));
        assert_eq!(atm.total, dec!(27));
        assert!(!atm.capped);

        // Far wing worth 40: capped at 5 per contract
        let wing = model.calculate(2, dec!(45000), dec!(40));
        assert!(wing.capped);
        assert_eq!(wing.per_contract, dec!(13.5));
        assert_eq!(wing.total, dec!(10));
    }

    #[test]
    fn test_minimum_only_applies_to_charged_fills() {
        let model = CommissionModel {
            per_contract: dec!(0.1),
            min_per_order: dec!(1),
            ..CommissionModel::zero()
        };
        assert_eq!(model.calculate(2, dec!(45000), dec!(100)).total, dec!(1));
        assert_eq!(model.calculate(20, dec!(45000), dec!(100)).total, dec!(2));

        let capped_to_nothing = CommissionModel {
            premium_cap: dec!(0.125),
            ..model
        };
        assert_eq!(capped_to_nothing.calculate(2, dec!(45000), dec!(0)).total, dec!(0));
    }
}
