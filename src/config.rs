//! Engine configuration.
//!
//! Loaded from TOML; every section and field has a default, so an empty
//! file is a valid configuration:
//!
//! ```toml
//! [pricing]
//! risk_free_rate = 0.05
//! default_volatility = 0.8
//! iv_unit = "percent"
//!
//! [risk]
//! min_risk_reward = 0.2
//! max_premium_fraction = 0.25
//!
//! [risk.greek_limits]
//! max_delta = 5.0
//!
//! [backtest]
//! missing_data = "skip"
//! annualization_days = 252
//!
//! [backtest.retry]
//! max_attempts = 3
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::backtest::BacktestConfig;
use crate::data::{IvUnit, NormalizeConfig, PriceUnit};
use crate::error::{EngineError, Result};
use crate::risk::RiskConfig;
use crate::strategy::StrategyAggregator;

/// Pricing inputs shared by risk and backtest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PricingConfig {
    /// Continuously compounded annual rate.
    pub risk_free_rate: f64,
    /// Used when a snapshot has no implied volatility for a leg.
    pub default_volatility: f64,
    /// Unit of implied volatility in raw feed payloads.
    pub iv_unit: IvUnit,
    /// Unit of mark prices in raw feed payloads.
    pub price_unit: PriceUnit,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            risk_free_rate: 0.05,
            default_volatility: 0.8,
            iv_unit: IvUnit::Percent,
            price_unit: PriceUnit::Quote,
        }
    }
}

impl PricingConfig {
    pub fn aggregator(&self) -> StrategyAggregator {
        StrategyAggregator::new(self.risk_free_rate, self.default_volatility)
    }

    pub fn normalize_config(&self) -> NormalizeConfig {
        NormalizeConfig {
            iv_unit: self.iv_unit,
            price_unit: self.price_unit,
            rate: self.risk_free_rate,
        }
    }
}

/// Where file-backed market data lives.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    pub data_dir: Option<PathBuf>,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub pricing: PricingConfig,
    pub risk: RiskConfig,
    pub backtest: BacktestConfig,
    pub data: DataConfig,
}

impl EngineConfig {
    /// Load and validate a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
            .map_err(|e| EngineError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|e| EngineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot work with.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(EngineError::Config(msg));

        if !self.pricing.risk_free_rate.is_finite() {
            return invalid(format!("pricing.risk_free_rate must be finite, got {}", self.pricing.risk_free_rate));
        }
        if !(self.pricing.default_volatility > 0.0 && self.pricing.default_volatility.is_finite()) {
            return invalid(format!(
                "pricing.default_volatility must be positive, got {}",
                self.pricing.default_volatility
            ));
        }
        if self.risk.max_premium_fraction <= 0.0 {
            return invalid(format!(
                "risk.max_premium_fraction must be positive, got {}",
                self.risk.max_premium_fraction
            ));
        }
        if self.backtest.annualization_days == 0 {
            return invalid("backtest.annualization_days must be at least 1".into());
        }
        if self.backtest.retry.max_attempts == 0 {
            return invalid("backtest.retry.max_attempts must be at least 1".into());
        }
        let fees = &self.backtest.commission;
        if [fees.per_contract, fees.underlying_rate, fees.premium_cap, fees.min_per_order]
            .iter()
            .any(|v| v.is_sign_negative() && !v.is_zero())
        {
            return invalid("backtest.commission values must not be negative".into());
        }
        if self.backtest.worker_threads == Some(0) {
            return invalid("backtest.worker_threads must be at least 1 when set".into());
        }
        Ok(())
    }
}
