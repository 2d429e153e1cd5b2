//! Input validation for legs and strategies.
//!
//! Leg checks run before any pricing; strategy checks run before a backtest
//! processes its first day.

use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::data::{Strategy, StrategyLeg};
use crate::error::{EngineError, Result};

/// Every problem with a leg list, in leg order.
pub fn leg_errors(legs: &[StrategyLeg]) -> Vec<EngineError> {
    if legs.is_empty() {
        return vec![EngineError::InvalidInput("Strategy has no legs".into())];
    }

    let underlying = &legs[0].contract.underlying;
    let mut errors = Vec::new();
    for (idx, leg) in legs.iter().enumerate() {
        let name = leg.instrument_name();
        if &leg.contract.underlying != underlying {
            errors.push(EngineError::InvalidInput(format!(
                "Leg {} ({}): underlying {} differs from {}",
                idx, name, leg.contract.underlying, underlying
            )));
        }
        if leg.quantity < 1 {
            errors.push(EngineError::InvalidInput(format!(
                "Leg {} ({}): quantity must be at least 1",
                idx, name
            )));
        }
        let strike = leg.contract.strike_price;
        if !strike.is_finite() || strike <= 0.0 {
            errors.push(EngineError::InvalidInput(format!(
                "Leg {} ({}): strike must be positive, got {}",
                idx, name, strike
            )));
        }
        if name.trim().is_empty() {
            errors.push(EngineError::InvalidInput(format!(
                "Leg {}: instrument name is empty",
                idx
            )));
        }
    }
    errors
}

/// Checks a backtest needs beyond the leg checks.
pub fn validate_for_backtest(
    strategy: &Strategy,
    start_date: NaiveDate,
    end_date: NaiveDate,
    initial_capital: Decimal,
) -> Result<()> {
    let invalid = |msg: String| EngineError::InvalidStrategy(msg);

    if let Some(err) = leg_errors(&strategy.legs).into_iter().next() {
        return Err(invalid(err.to_string()));
    }

    if start_date > end_date {
        return Err(invalid(format!(
            "Start date {} is after end date {}",
            start_date, end_date
        )));
    }

    if initial_capital <= Decimal::ZERO {
        return Err(invalid(format!(
            "Initial capital must be positive, got {}",
            initial_capital
        )));
    }

    for leg in &strategy.legs {
        if let (Some(entry), Some(exit)) = (leg.entry_date, leg.exit_date) {
            if exit < entry {
                return Err(invalid(format!(
                    "{}: exit date {} precedes entry date {}",
                    leg.instrument_name(),
                    exit,
                    entry
                )));
            }
        }
    }

    Ok(())
}
