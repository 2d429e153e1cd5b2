//! Fills, daily valuations and leg positions for backtesting.
//!
//! Handles the leg lifecycle:
//! - Pending until its entry day arrives
//! - Open (marked to model price every usable day)
//! - Closed on its exit date or settled at intrinsic value on expiry

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::data::{Action, StrategyLeg};

/// Why a fill happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeReason {
    /// Leg opened on (or after) its entry day.
    Entry,
    /// Leg closed at model price on (or after) its exit day.
    ScheduledExit,
    /// Leg settled at intrinsic value at expiry.
    Expiry,
}

/// One executed fill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub timestamp: DateTime<Utc>,
    /// Side of this fill (a close is the opposite of the leg's action).
    pub action: Action,
    pub instrument_name: String,
    pub quantity: u32,
    /// Per-contract fill price.
    pub price: Decimal,
    pub fee: Decimal,
    /// Realized P&L net of entry and exit fees; `None` for openings.
    pub pnl: Option<Decimal>,
    /// Portfolio value right after the fill.
    pub portfolio_value: Decimal,
    pub reason: TradeReason,
}

impl Trade {
    pub fn is_opening(&self) -> bool {
        self.pnl.is_none()
    }

    /// Check if trade was profitable.
    pub fn is_winner(&self) -> bool {
        self.pnl.map(|p| p > Decimal::ZERO).unwrap_or(false)
    }
}

/// Portfolio valuation at the end of one day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyPnL {
    pub date: NaiveDate,
    pub portfolio_value: Decimal,
    /// portfolio_value - initial_capital.
    pub cumulative_pnl: Decimal,
    /// Carried forward from the previous usable day.
    #[serde(default)]
    pub stale: bool,
}

/// Status of a leg inside a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionStatus {
    /// Waiting for its entry day.
    Pending,
    Open,
    Closed,
}

/// Run state of one strategy leg.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegPosition {
    pub leg: StrategyLeg,
    pub status: PositionStatus,
    pub entry_price: Option<Decimal>,
    pub entry_fee: Decimal,
    pub opened_on: Option<NaiveDate>,
    /// Last per-contract mark.
    pub last_price: Decimal,
}

impl LegPosition {
    pub fn new(leg: StrategyLeg) -> Self {
        Self {
            leg,
            status: PositionStatus::Pending,
            entry_price: None,
            entry_fee: Decimal::ZERO,
            opened_on: None,
            last_price: Decimal::ZERO,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }

    pub fn is_pending(&self) -> bool {
        self.status == PositionStatus::Pending
    }

    /// +quantity for buys, -quantity for sells.
    pub fn signed_quantity(&self) -> Decimal {
        let qty = Decimal::from(self.leg.quantity);
        match self.leg.action {
            Action::Buy => qty,
            Action::Sell => -qty,
        }
    }

    /// Whether the leg's entry day has arrived.
    pub fn entry_due(&self, date: NaiveDate) -> bool {
        self.is_pending() && self.leg.entry_date.map(|d| d <= date).unwrap_or(true)
    }

    /// Whether the leg's exit day has arrived.
    pub fn exit_due(&self, date: NaiveDate) -> bool {
        self.is_open() && self.leg.exit_date.map(|d| d <= date).unwrap_or(false)
    }

    /// Signed value of the position at `price` per contract.
    pub fn market_value(&self, price: Decimal) -> Decimal {
        self.signed_quantity() * price
    }

    /// Open at `price`. Returns the cash flow (negative when paying).
    pub fn open(&mut self, date: NaiveDate, price: Decimal, fee: Decimal) -> Decimal {
        self.status = PositionStatus::Open;
        self.entry_price = Some(price);
        self.entry_fee = fee;
        self.opened_on = Some(date);
        self.last_price = price;
        -self.market_value(price) - fee
    }

    /// Close at `price`. Returns (cash flow, realized P&L).
    pub fn close(&mut self, price: Decimal, fee: Decimal) -> (Decimal, Decimal) {
        let entry = self.entry_price.unwrap_or(price);
        let pnl = self.signed_quantity() * (price - entry) - self.entry_fee - fee;
        self.status = PositionStatus::Closed;
        self.last_price = price;
        (self.market_value(price) - fee, pnl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{OptionContract, OptionType};
    use rust_decimal_macros::dec;

    fn leg(action: Action, quantity: u32) -> StrategyLeg {
        let expiry = NaiveDate::from_ymd_opt(2024, 3, 29).unwrap();
        StrategyLeg::new(
            OptionContract::listed("BTC", OptionType::Call, 45000.0, expiry),
            action,
            quantity,
        )
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    #[test]
    fn test_long_round_trip() {
        let mut pos = LegPosition::new(leg(Action::Buy, 2));
        assert!(pos.entry_due(day(1)));

        let cash = pos.open(day(1), dec!(4000), dec!(1));
        assert_eq!(cash, dec!(-8001));
        assert!(pos.is_open());

        let (cash, pnl) = pos.close(dec!(4500), dec!(1));
        assert_eq!(cash, dec!(8999));
        assert_eq!(pnl, dec!(998));
        assert_eq!(pos.status, PositionStatus::Closed);
    }

    #[test]
    fn test_short_round_trip() {
        let mut pos = LegPosition::new(leg(Action::Sell, 1));
        let cash = pos.open(day(1), dec!(1500), dec!(0));
        assert_eq!(cash, dec!(1500));
        assert_eq!(pos.market_value(dec!(1500)), dec!(-1500));

        let (cash, pnl) = pos.close(dec!(2000), dec!(0));
        assert_eq!(cash, dec!(-2000));
        assert_eq!(pnl, dec!(-500));
    }

    #[test]
    fn test_schedule_checks() {
        let mut pos = LegPosition::new(leg(Action::Buy, 1).with_schedule(Some(day(3)), Some(day(5))));
        assert!(!pos.entry_due(day(2)));
        assert!(pos.entry_due(day(4)));
        pos.open(day(4), dec!(100), dec!(0));
        assert!(!pos.exit_due(day(4)));
        assert!(pos.exit_due(day(6)));
    }

    #[test]
    fn test_trade_flags() {
        let ts = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
            .and_utc();
        let mut trade = Trade {
            timestamp: ts,
            action: Action::Buy,
            instrument_name: "BTC-29MAR24-45000-C".into(),
            quantity: 1,
            price: dec!(4000),
            fee: dec!(0),
            pnl: None,
            portfolio_value: dec!(100_000),
            reason: TradeReason::Entry,
        };
        assert!(trade.is_opening());
        assert!(!trade.is_winner());
        trade.pnl = Some(dec!(25));
        assert!(trade.is_winner());
    }
}
