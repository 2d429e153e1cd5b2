//! Error types shared across the engine.

use chrono::NaiveDate;
use thiserror::Error;

use crate::data::MarketDataError;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// Non-positive strike/spot, empty leg list, quantity < 1, non-finite numbers.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Non-positive volatility for a leg that must be priced.
    #[error("Invalid volatility {volatility} for {instrument}")]
    InvalidVolatility { instrument: String, volatility: f64 },

    /// Strategy rejected before a backtest started.
    #[error("Invalid strategy: {0}")]
    InvalidStrategy(String),

    /// Missing snapshot under the `fail` missing-data policy.
    #[error("No market data for {underlying} on {date}")]
    MarketDataGap { underlying: String, date: NaiveDate },

    /// Non-recoverable failure from the market data collaborator.
    #[error("Market data error: {0}")]
    MarketData(#[from] MarketDataError),

    #[error("No usable market data for {underlying} between {start} and {end}")]
    InsufficientData {
        underlying: String,
        start: NaiveDate,
        end: NaiveDate,
    },

    #[error("Backtest cancelled before {0}")]
    Cancelled(NaiveDate),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl EngineError {
    /// Stable machine-readable code for reports and the CLI.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::InvalidVolatility { .. } => "INVALID_VOLATILITY",
            Self::InvalidStrategy(_) => "INVALID_STRATEGY",
            Self::MarketDataGap { .. } => "MARKET_DATA_GAP",
            Self::MarketData(_) => "MARKET_DATA",
            Self::InsufficientData { .. } => "INSUFFICIENT_DATA",
            Self::Cancelled(_) => "CANCELLED",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Config(_) => "CONFIG",
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            EngineError::InvalidStrategy("no legs".into()).code(),
            "INVALID_STRATEGY"
        );
        let err = EngineError::InvalidVolatility {
            instrument: "BTC-27DEC24-45000-C".into(),
            volatility: 0.0,
        };
        assert_eq!(err.code(), "INVALID_VOLATILITY");
        assert!(err.to_string().contains("BTC-27DEC24-45000-C"));
    }
}
