//! Core data types for strategy pricing and backtesting.
//!
//! Contracts and legs are what the trader defines; snapshots are what the
//! market data collaborator supplies. All dates are UTC calendar dates.

use std::collections::BTreeMap;
use std::ops::{Add, AddAssign};

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EngineError, Result};

/// Hour (UTC) at which crypto options settle on their expiration date.
pub const EXPIRY_HOUR_UTC: u32 = 8;

/// Option type (call or put).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionType {
    Call,
    Put,
}

impl OptionType {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "C" | "CALL" => Some(Self::Call),
            "P" | "PUT" => Some(Self::Put),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Call => "C",
            Self::Put => "P",
        }
    }
}

/// Side of a leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Buy,
    Sell,
}

impl Action {
    /// +1 for buy, -1 for sell.
    pub fn sign(&self) -> f64 {
        match self {
            Self::Buy => 1.0,
            Self::Sell => -1.0,
        }
    }

    /// The action that unwinds this one.
    pub fn opposite(&self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }
}

/// Greeks for an option contract or a whole portfolio.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Greeks {
    pub delta: f64,
    pub gamma: f64,
    pub theta: f64,
    pub vega: f64,
    pub rho: f64,
}

impl Greeks {
    /// Multiply every Greek by `factor` (signed quantity).
    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            delta: self.delta * factor,
            gamma: self.gamma * factor,
            theta: self.theta * factor,
            vega: self.vega * factor,
            rho: self.rho * factor,
        }
    }
}

impl Add for Greeks {
    type Output = Greeks;

    fn add(self, rhs: Greeks) -> Greeks {
        Greeks {
            delta: self.delta + rhs.delta,
            gamma: self.gamma + rhs.gamma,
            theta: self.theta + rhs.theta,
            vega: self.vega + rhs.vega,
            rho: self.rho + rhs.rho,
        }
    }
}

impl AddAssign for Greeks {
    fn add_assign(&mut self, rhs: Greeks) {
        *self = *self + rhs;
    }
}

/// A single listed option contract. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionContract {
    /// Unique identifier, e.g. "BTC-27DEC24-45000-C".
    pub instrument_name: String,

    /// Underlying symbol (e.g., "BTC").
    pub underlying: String,

    pub option_type: OptionType,

    pub strike_price: f64,

    /// Expiration date (UTC calendar date).
    pub expiration_date: NaiveDate,
}

impl OptionContract {
    pub fn new(
        instrument_name: impl Into<String>,
        underlying: impl Into<String>,
        option_type: OptionType,
        strike_price: f64,
        expiration_date: NaiveDate,
    ) -> Self {
        Self {
            instrument_name: instrument_name.into(),
            underlying: underlying.into(),
            option_type,
            strike_price,
            expiration_date,
        }
    }

    /// Build a contract with a venue-style instrument name.
    pub fn listed(
        underlying: &str,
        option_type: OptionType,
        strike_price: f64,
        expiration_date: NaiveDate,
    ) -> Self {
        let name = format!(
            "{}-{}-{}-{}",
            underlying,
            expiration_date.format("%-d%b%y").to_string().to_uppercase(),
            strike_price,
            option_type.as_str()
        );
        Self::new(name, underlying, option_type, strike_price, expiration_date)
    }

    /// Parse an instrument name of the form `BTC-27DEC24-45000-C`.
    pub fn parse_instrument(name: &str) -> Result<Self> {
        let parts: Vec<&str> = name.split('-').collect();
        if parts.len() != 4 {
            return Err(EngineError::InvalidInput(format!(
                "Unrecognised instrument name: {}",
                name
            )));
        }

        let expiration_date = NaiveDate::parse_from_str(parts[1], "%d%b%y").map_err(|e| {
            EngineError::InvalidInput(format!("Bad expiry in {}: {}", name, e))
        })?;
        let strike_price: f64 = parts[2].parse().map_err(|_| {
            EngineError::InvalidInput(format!("Bad strike in {}", name))
        })?;
        let option_type = OptionType::from_str(parts[3]).ok_or_else(|| {
            EngineError::InvalidInput(format!("Bad option type in {}", name))
        })?;

        Ok(Self::new(name, parts[0], option_type, strike_price, expiration_date))
    }

    /// Settlement instant of the contract.
    pub fn expiry_time(&self) -> DateTime<Utc> {
        let settle = NaiveTime::from_hms_opt(EXPIRY_HOUR_UTC, 0, 0).unwrap_or_default();
        self.expiration_date.and_time(settle).and_utc()
    }

    /// Whether the contract has settled at `at`.
    pub fn is_expired(&self, at: DateTime<Utc>) -> bool {
        self.expiry_time() <= at
    }

    /// Payoff of one long contract at terminal price `spot`.
    pub fn intrinsic_value(&self, spot: f64) -> f64 {
        match self.option_type {
            OptionType::Call => (spot - self.strike_price).max(0.0),
            OptionType::Put => (self.strike_price - spot).max(0.0),
        }
    }
}

/// One buy/sell position in a single contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyLeg {
    pub contract: OptionContract,
    pub action: Action,
    pub quantity: u32,

    /// First day the leg may be opened in a backtest (default: first usable day).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_date: Option<NaiveDate>,

    /// Day the leg is closed at model price (default: held to settlement).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_date: Option<NaiveDate>,
}

impl StrategyLeg {
    pub fn new(contract: OptionContract, action: Action, quantity: u32) -> Self {
        Self {
            contract,
            action,
            quantity,
            entry_date: None,
            exit_date: None,
        }
    }

    pub fn buy(contract: OptionContract, quantity: u32) -> Self {
        Self::new(contract, Action::Buy, quantity)
    }

    pub fn sell(contract: OptionContract, quantity: u32) -> Self {
        Self::new(contract, Action::Sell, quantity)
    }

    pub fn with_schedule(mut self, entry: Option<NaiveDate>, exit: Option<NaiveDate>) -> Self {
        self.entry_date = entry;
        self.exit_date = exit;
        self
    }

    /// sign(action) * quantity.
    pub fn signed_quantity(&self) -> f64 {
        self.action.sign() * self.quantity as f64
    }

    pub fn instrument_name(&self) -> &str {
        &self.contract.instrument_name
    }
}

/// Classification tag; it does not change how a strategy is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyType {
    SingleLeg,
    Straddle,
    Strangle,
    IronCondor,
    Butterfly,
    Custom,
}

/// A user-defined multi-leg strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Strategy {
    pub id: Uuid,
    pub name: String,
    pub strategy_type: StrategyType,
    pub legs: Vec<StrategyLeg>,
}

impl Strategy {
    pub fn new(name: impl Into<String>, strategy_type: StrategyType, legs: Vec<StrategyLeg>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            strategy_type,
            legs,
        }
    }

    /// Replace the whole leg list; legs are never edited in place.
    pub fn replace_legs(&mut self, legs: Vec<StrategyLeg>) {
        self.legs = legs;
    }

    /// Underlying of the first leg.
    pub fn underlying(&self) -> Option<&str> {
        self.legs.first().map(|l| l.contract.underlying.as_str())
    }
}

/// Quote for one instrument inside a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InstrumentQuote {
    pub mark_price: f64,
    /// Implied volatility as a fraction (0.8 = 80%).
    pub implied_volatility: f64,
}

/// Market state for one underlying at one instant. Never mutated by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub underlying: String,
    pub underlying_price: f64,
    pub timestamp: DateTime<Utc>,

    /// Quotes keyed by instrument name.
    #[serde(default)]
    pub quotes: BTreeMap<String, InstrumentQuote>,

    /// Set when the data was generated rather than observed.
    #[serde(default)]
    pub synthetic: bool,
}

impl MarketSnapshot {
    pub fn new(underlying: impl Into<String>, underlying_price: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            underlying: underlying.into(),
            underlying_price,
            timestamp,
            quotes: BTreeMap::new(),
            synthetic: false,
        }
    }

    pub fn with_quote(mut self, instrument: impl Into<String>, mark_price: f64, implied_volatility: f64) -> Self {
        self.quotes.insert(
            instrument.into(),
            InstrumentQuote {
                mark_price,
                implied_volatility,
            },
        );
        self
    }

    pub fn quote(&self, instrument: &str) -> Option<&InstrumentQuote> {
        self.quotes.get(instrument)
    }

    /// Calendar date of the snapshot.
    pub fn date(&self) -> NaiveDate {
        self.timestamp.date_naive()
    }
}

/// One entry of a live option chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainQuote {
    pub contract: OptionContract,
    pub quote: InstrumentQuote,
    pub underlying_price: f64,
}
