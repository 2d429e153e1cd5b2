//! Option pricing.
//!
//! Closed-form Black-Scholes-Merton valuation of European contracts:
//! - Price and Greeks (delta, gamma, theta, vega, rho)
//! - Intrinsic settlement at or past expiry
//! - Implied volatility inversion for feeds that only quote prices

pub mod black_scholes;

pub use black_scholes::{
    implied_volatility, norm_cdf, norm_pdf, price, year_fraction, BlackScholes, PricingResult,
};
