//! Black-Scholes-Merton pricing for European options (no dividend yield).
//!
//! Conventions:
//! - Time to expiry in years, ACT/365 from the contract's settlement instant
//! - Theta per calendar day
//! - Vega per 1 vol point (1%)
//! - Rho per 1% move in the rate
//!
//! At or past expiry the price collapses to intrinsic value and every Greek
//! except delta is zero. Delta at expiry is 1/0 (calls) or -1/0 (puts), with
//! 0.5 / -0.5 exactly at the strike.

use std::f64::consts::{PI, SQRT_2};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use statrs::function::erf::erfc;

use crate::data::{Greeks, OptionContract, OptionType};
use crate::error::{EngineError, Result};

const SECONDS_PER_YEAR: f64 = 365.0 * 86_400.0;

/// Price and Greeks of one contract.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricingResult {
    pub price: f64,
    pub delta: f64,
    pub gamma: f64,
    pub theta: f64,
    pub vega: f64,
    pub rho: f64,
}

impl PricingResult {
    pub fn greeks(&self) -> Greeks {
        Greeks {
            delta: self.delta,
            gamma: self.gamma,
            theta: self.theta,
            vega: self.vega,
            rho: self.rho,
        }
    }
}

/// Year fraction between two instants (negative when `to` is before `from`).
pub fn year_fraction(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds() as f64 / 1000.0 / SECONDS_PER_YEAR
}

/// Standard normal CDF, `0.5 * erfc(-x / sqrt(2))`.
pub fn norm_cdf(x: f64) -> f64 {
    0.5 * erfc(-x / SQRT_2)
}

/// Standard normal PDF.
pub fn norm_pdf(x: f64) -> f64 {
    (-0.5 * x * x).exp() / (2.0 * PI).sqrt()
}

/// Price a contract at `valuation_time`.
pub fn price(
    contract: &OptionContract,
    spot: f64,
    valuation_time: DateTime<Utc>,
    rate: f64,
    volatility: f64,
) -> Result<PricingResult> {
    BlackScholes::new(rate).price_contract(contract, spot, valuation_time, volatility)
}

/// Implied volatility of a contract quoted at `price`. `None` when the quote
/// is outside arbitrage bounds or the contract has settled.
pub fn implied_volatility(
    contract: &OptionContract,
    spot: f64,
    valuation_time: DateTime<Utc>,
    rate: f64,
    price: f64,
) -> Option<f64> {
    let time = year_fraction(valuation_time, contract.expiry_time());
    BlackScholes::new(rate).implied_vol(
        spot,
        contract.strike_price,
        time,
        price,
        contract.option_type,
    )
}

/// Black-Scholes calculator for options pricing and Greeks.
#[derive(Debug, Clone, Copy)]
pub struct BlackScholes {
    /// Risk-free interest rate (continuously compounded).
    pub rate: f64,
}

impl Default for BlackScholes {
    fn default() -> Self {
        Self { rate: 0.05 }
    }
}

impl BlackScholes {
    pub fn new(rate: f64) -> Self {
        Self { rate }
    }

    /// Validate inputs and price a contract with its Greeks.
    pub fn price_contract(
        &self,
        contract: &OptionContract,
        spot: f64,
        valuation_time: DateTime<Utc>,
        vol: f64,
    ) -> Result<PricingResult> {
        let strike = contract.strike_price;
        if !spot.is_finite() || spot <= 0.0 {
            return Err(EngineError::InvalidInput(format!(
                "Spot must be positive, got {} for {}",
                spot, contract.instrument_name
            )));
        }
        if !strike.is_finite() || strike <= 0.0 {
            return Err(EngineError::InvalidInput(format!(
                "Strike must be positive, got {} for {}",
                strike, contract.instrument_name
            )));
        }
        if !self.rate.is_finite() {
            return Err(EngineError::InvalidInput(format!(
                "Rate must be finite, got {}",
                self.rate
            )));
        }
        if !vol.is_finite() || vol <= 0.0 {
            return Err(EngineError::InvalidVolatility {
                instrument: contract.instrument_name.clone(),
                volatility: vol,
            });
        }

        let time = year_fraction(valuation_time, contract.expiry_time());
        Ok(self.evaluate(spot, strike, time, vol, contract.option_type))
    }

    /// Price and Greeks for already-validated inputs.
    pub fn evaluate(
        &self,
        spot: f64,
        strike: f64,
        time: f64,
        vol: f64,
        opt_type: OptionType,
    ) -> PricingResult {
        PricingResult {
            price: self.price(spot, strike, time, vol, opt_type),
            delta: self.delta(spot, strike, time, vol, opt_type),
            gamma: self.gamma(spot, strike, time, vol),
            theta: self.theta(spot, strike, time, vol, opt_type),
            vega: self.vega(spot, strike, time, vol),
            rho: self.rho(spot, strike, time, vol, opt_type),
        }
    }

    /// Calculate d1 parameter.
    fn d1(&self, spot: f64, strike: f64, time: f64, vol: f64) -> f64 {
        let numerator = (spot / strike).ln() + (self.rate + 0.5 * vol * vol) * time;
        numerator / (vol * time.sqrt())
    }

    /// Calculate d2 parameter.
    fn d2(&self, spot: f64, strike: f64, time: f64, vol: f64) -> f64 {
        self.d1(spot, strike, time, vol) - vol * time.sqrt()
    }

    /// Calculate call option price.
    pub fn call_price(&self, spot: f64, strike: f64, time: f64, vol: f64) -> f64 {
        if time <= 0.0 {
            return (spot - strike).max(0.0);
        }

        let d1 = self.d1(spot, strike, time, vol);
        let d2 = self.d2(spot, strike, time, vol);

        spot * norm_cdf(d1) - strike * (-self.rate * time).exp() * norm_cdf(d2)
    }

    /// Calculate put option price.
    pub fn put_price(&self, spot: f64, strike: f64, time: f64, vol: f64) -> f64 {
        if time <= 0.0 {
            return (strike - spot).max(0.0);
        }

        let d1 = self.d1(spot, strike, time, vol);
        let d2 = self.d2(spot, strike, time, vol);

        strike * (-self.rate * time).exp() * norm_cdf(-d2) - spot * norm_cdf(-d1)
    }

    /// Calculate option price based on type.
    pub fn price(&self, spot: f64, strike: f64, time: f64, vol: f64, opt_type: OptionType) -> f64 {
        match opt_type {
            OptionType::Call => self.call_price(spot, strike, time, vol),
            OptionType::Put => self.put_price(spot, strike, time, vol),
        }
    }

    /// Calculate delta.
    pub fn delta(&self, spot: f64, strike: f64, time: f64, vol: f64, opt_type: OptionType) -> f64 {
        if time <= 0.0 {
            let call_delta = if spot > strike {
                1.0
            } else if spot < strike {
                0.0
            } else {
                0.5
            };
            return match opt_type {
                OptionType::Call => call_delta,
                OptionType::Put => call_delta - 1.0,
            };
        }

        let d1 = self.d1(spot, strike, time, vol);

        match opt_type {
            OptionType::Call => norm_cdf(d1),
            OptionType::Put => norm_cdf(d1) - 1.0,
        }
    }

    /// Calculate gamma (same for calls and puts).
    pub fn gamma(&self, spot: f64, strike: f64, time: f64, vol: f64) -> f64 {
        if time <= 0.0 || vol <= 0.0 {
            return 0.0;
        }

        let d1 = self.d1(spot, strike, time, vol);
        norm_pdf(d1) / (spot * vol * time.sqrt())
    }

    /// Calculate vega (same for calls and puts), per 1% change in volatility.
    pub fn vega(&self, spot: f64, strike: f64, time: f64, vol: f64) -> f64 {
        if time <= 0.0 {
            return 0.0;
        }

        let d1 = self.d1(spot, strike, time, vol);
        spot * norm_pdf(d1) * time.sqrt() / 100.0
    }

    /// Calculate theta, per calendar day.
    pub fn theta(&self, spot: f64, strike: f64, time: f64, vol: f64, opt_type: OptionType) -> f64 {
        if time <= 0.0 {
            return 0.0;
        }

        let d1 = self.d1(spot, strike, time, vol);
        let d2 = self.d2(spot, strike, time, vol);
        let discount = (-self.rate * time).exp();

        let decay = -spot * norm_pdf(d1) * vol / (2.0 * time.sqrt());

        let annual = match opt_type {
            OptionType::Call => decay - self.rate * strike * discount * norm_cdf(d2),
            OptionType::Put => decay + self.rate * strike * discount * norm_cdf(-d2),
        };
        annual / 365.0
    }

    /// Calculate rho, per 1% move in the rate.
    pub fn rho(&self, spot: f64, strike: f64, time: f64, vol: f64, opt_type: OptionType) -> f64 {
        if time <= 0.0 {
            return 0.0;
        }

        let d2 = self.d2(spot, strike, time, vol);
        let discount = (-self.rate * time).exp();

        match opt_type {
            OptionType::Call => strike * time * discount * norm_cdf(d2) / 100.0,
            OptionType::Put => -strike * time * discount * norm_cdf(-d2) / 100.0,
        }
    }

    /// Calculate implied volatility from option price using Newton-Raphson.
    pub fn implied_vol(
        &self,
        spot: f64,
        strike: f64,
        time: f64,
        price: f64,
        opt_type: OptionType,
    ) -> Option<f64> {
        if time <= 0.0 || price <= 0.0 || spot <= 0.0 || strike <= 0.0 {
            return None;
        }

        // Brenner-Subrahmanyam seed
        let mut vol = (price / spot) * (2.0 * PI / time).sqrt();
        vol = vol.clamp(0.01, 5.0);

        let max_iter = 100;
        let tolerance = 1e-8 * spot.max(1.0);

        for _ in 0..max_iter {
            let diff = self.price(spot, strike, time, vol, opt_type) - price;

            if diff.abs() < tolerance {
                return Some(vol);
            }

            // Unscaled vega
            let vega = spot * norm_pdf(self.d1(spot, strike, time, vol)) * time.sqrt();
            if vega.abs() < 1e-10 {
                break;
            }

            vol -= diff / vega;
            vol = vol.clamp(0.001, 10.0);
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::{Duration, NaiveDate, TimeZone};

    const T30: f64 = 30.0 / 365.0;

    #[test]
    fn test_norm_cdf_reference_values() {
        assert_relative_eq!(norm_cdf(0.0), 0.5, epsilon = 1e-12);
        assert_relative_eq!(norm_cdf(1.0), 0.841_344_746_068_543, epsilon = 1e-9);
        assert_relative_eq!(norm_cdf(-1.96), 0.024_997_895_148_220, epsilon = 1e-9);
        assert_relative_eq!(norm_cdf(-8.0), 6.220_960_574_271_78e-16, max_relative = 1e-6);
    }

    #[test]
    fn test_black_scholes_call_price() {
        let bs = BlackScholes::new(0.05);
        // Hull reference: S=100, K=100, T=1, vol=0.20 -> 10.4506
        let price = bs.call_price(100.0, 100.0, 1.0, 0.20);
        assert_relative_eq!(price, 10.4506, epsilon = 1e-4);
    }

    #[test]
    fn test_btc_atm_scenario() {
        let bs = BlackScholes::new(0.05);
        let call = bs.evaluate(45000.0, 45000.0, T30, 0.8, OptionType::Call);
        let put = bs.evaluate(45000.0, 45000.0, T30, 0.8, OptionType::Put);

        let parity = 45000.0 - 45000.0 * (-0.05 * T30).exp();
        assert_relative_eq!(call.price - put.price, parity, max_relative = 1e-6);
        assert!(call.delta > 0.52 && call.delta < 0.56, "delta {}", call.delta);
        assert_relative_eq!(call.delta - put.delta, 1.0, epsilon = 1e-12);
        assert_relative_eq!(call.gamma, put.gamma, epsilon = 1e-15);
        assert_relative_eq!(call.vega, put.vega, epsilon = 1e-12);
        assert!(call.theta < 0.0);
    }

    #[test]
    fn test_put_call_parity_grid() {
        for &rate in &[0.0, 0.03, 0.08] {
            let bs = BlackScholes::new(rate);
            for &strike in &[30000.0, 45000.0, 60000.0] {
                for &time in &[1.0 / 365.0, T30, 0.5, 2.0] {
                    for &vol in &[0.2, 0.8, 1.5] {
                        let spot = 45000.0;
                        let call = bs.call_price(spot, strike, time, vol);
                        let put = bs.put_price(spot, strike, time, vol);
                        let rhs = spot - strike * (-rate * time).exp();
                        let scale = spot.max(call.abs()).max(put.abs());
                        assert!(
                            ((call - put) - rhs).abs() <= 1e-6 * scale,
                            "parity broken K={} T={} vol={}",
                            strike,
                            time,
                            vol
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn test_strike_monotonicity() {
        let bs = BlackScholes::new(0.05);
        let strikes: Vec<f64> = (0..40).map(|i| 30000.0 + i as f64 * 1000.0).collect();
        for pair in strikes.windows(2) {
            let c0 = bs.call_price(45000.0, pair[0], T30, 0.8);
            let c1 = bs.call_price(45000.0, pair[1], T30, 0.8);
            let p0 = bs.put_price(45000.0, pair[0], T30, 0.8);
            let p1 = bs.put_price(45000.0, pair[1], T30, 0.8);
            assert!(c1 <= c0);
            assert!(p1 >= p0);
        }
    }

    #[test]
    fn test_converges_to_intrinsic() {
        let bs = BlackScholes::new(0.05);
        let time = 1e-9;
        assert_relative_eq!(bs.call_price(46000.0, 45000.0, time, 0.8), 1000.0, epsilon = 1e-2);
        assert_relative_eq!(bs.put_price(46000.0, 45000.0, time, 0.8), 0.0, epsilon = 1e-2);
        assert_relative_eq!(bs.put_price(44000.0, 45000.0, time, 0.8), 1000.0, epsilon = 1e-2);
    }

    #[test]
    fn test_expired_contract_greeks() {
        let bs = BlackScholes::new(0.05);
        let itm = bs.evaluate(46000.0, 45000.0, 0.0, 0.8, OptionType::Call);
        assert_eq!(itm.price, 1000.0);
        assert_eq!(itm.delta, 1.0);
        assert_eq!(itm.gamma, 0.0);
        assert_eq!(itm.theta, 0.0);
        assert_eq!(itm.vega, 0.0);
        assert_eq!(itm.rho, 0.0);

        let otm_put = bs.evaluate(46000.0, 45000.0, -0.1, 0.8, OptionType::Put);
        assert_eq!(otm_put.price, 0.0);
        assert_eq!(otm_put.delta, 0.0);

        let atm_call = bs.evaluate(45000.0, 45000.0, 0.0, 0.8, OptionType::Call);
        let atm_put = bs.evaluate(45000.0, 45000.0, 0.0, 0.8, OptionType::Put);
        assert_eq!(atm_call.delta, 0.5);
        assert_eq!(atm_put.delta, -0.5);
    }

    #[test]
    fn test_delta_matches_finite_difference() {
        let bs = BlackScholes::new(0.05);
        let h = 1.0;
        let up = bs.call_price(45000.0 + h, 44000.0, T30, 0.8);
        let down = bs.call_price(45000.0 - h, 44000.0, T30, 0.8);
        let numeric = (up - down) / (2.0 * h);
        assert_relative_eq!(bs.delta(45000.0, 44000.0, T30, 0.8, OptionType::Call), numeric, epsilon = 1e-6);

        let vol_up = bs.put_price(45000.0, 44000.0, T30, 0.81);
        let vol_down = bs.put_price(45000.0, 44000.0, T30, 0.79);
        let numeric_vega = (vol_up - vol_down) / 2.0;
        assert_relative_eq!(bs.vega(45000.0, 44000.0, T30, 0.8), numeric_vega, max_relative = 1e-3);
    }

    #[test]
    fn test_price_contract_validation() {
        let expiry = NaiveDate::from_ymd_opt(2024, 3, 29).unwrap();
        let contract = OptionContract::listed("BTC", OptionType::Call, 45000.0, expiry);
        let now = Utc.with_ymd_and_hms(2024, 2, 28, 8, 0, 0).unwrap();

        assert!(matches!(
            price(&contract, 0.0, now, 0.05, 0.8),
            Err(EngineError::InvalidInput(_))
        ));
        assert!(matches!(
            price(&contract, 45000.0, now, 0.05, 0.0),
            Err(EngineError::InvalidVolatility { .. })
        ));

        let bad_strike = OptionContract::new("X", "BTC", OptionType::Put, -1.0, expiry);
        assert!(matches!(
            price(&bad_strike, 45000.0, now, 0.05, 0.8),
            Err(EngineError::InvalidInput(_))
        ));

        // 2024-02-28 08:00 to 2024-03-29 08:00 is exactly 30 days
        let priced = price(&contract, 45000.0, now, 0.05, 0.8).unwrap();
        let direct = BlackScholes::new(0.05).evaluate(45000.0, 45000.0, T30, 0.8, OptionType::Call);
        assert_relative_eq!(priced.price, direct.price, epsilon = 1e-9);

        let after = contract.expiry_time() + Duration::hours(1);
        let settled = price(&contract, 47000.0, after, 0.05, 0.8).unwrap();
        assert_eq!(settled.price, 2000.0);
    }

    #[test]
    fn test_implied_vol() {
        let bs = BlackScholes::new(0.05);
        let vol = 0.65;
        let price = bs.put_price(45000.0, 42000.0, T30, vol);

        let iv = bs
            .implied_vol(45000.0, 42000.0, T30, price, OptionType::Put)
            .unwrap();
        assert_relative_eq!(iv, vol, epsilon = 1e-4);
        assert!(bs.implied_vol(45000.0, 42000.0, 0.0, price, OptionType::Put).is_none());
    }
}
