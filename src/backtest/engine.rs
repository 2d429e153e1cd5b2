//! Core backtesting engine.
//!
//! Runs the simulation loop over calendar days (crypto trades every day):
//! 1. Check for cancellation
//! 2. Fetch the day's market snapshot (with bounded retries)
//! 3. Handle gaps per the missing-data policy
//! 4. Settle expired legs at intrinsic value
//! 5. Close legs whose exit date has arrived
//! 6. Open legs whose entry date has arrived
//! 7. Mark open legs to model and record the daily valuation

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::data::{MarketDataError, MarketDataProvider, MarketSnapshot, RetryPolicy, RetryingProvider, Strategy};
use crate::error::{EngineError, Result};
use crate::metrics::{DrawdownAnalysis, MetricsCalculator};
use crate::risk::RiskWarning;
use crate::strategy::{validate_for_backtest, StrategyAggregator, VolatilitySource};

use super::commission::CommissionModel;
use super::trade::{DailyPnL, LegPosition, Trade, TradeReason};

/// What to do with a day that has no usable snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingDataPolicy {
    /// Record nothing for the day.
    #[default]
    Skip,
    /// Repeat the previous valuation, flagged stale.
    StaleForward,
    /// Abort the run.
    Fail,
}

/// Configuration for backtest execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BacktestConfig {
    pub missing_data: MissingDataPolicy,

    /// Annual risk-free rate for the Sharpe and Sortino ratios.
    pub risk_free_rate: f64,

    /// Periods per year used to annualize daily ratios.
    pub annualization_days: u32,

    /// Use snapshots flagged synthetic instead of treating them as gaps.
    pub accept_synthetic_data: bool,

    pub commission: CommissionModel,

    pub retry: RetryPolicy,

    /// Rayon threads for batch runs (default: available cores).
    pub worker_threads: Option<usize>,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            missing_data: MissingDataPolicy::Skip,
            risk_free_rate: 0.0,
            annualization_days: 252,
            accept_synthetic_data: false,
            commission: CommissionModel::default(),
            retry: RetryPolicy::default(),
            worker_threads: None,
        }
    }
}

/// Lifecycle of one engine run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BacktestState {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Cooperative cancellation, checked at day boundaries.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// How much of the requested range had usable data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataCoverage {
    pub total_days: usize,
    pub usable_days: usize,
    pub missing_days: usize,
    /// Missing days carried forward under `stale_forward`.
    pub stale_days: usize,
    pub synthetic_days: usize,
    pub missing_dates: Vec<NaiveDate>,
}

/// Result of a completed backtest. Never partially built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestResult {
    pub id: Uuid,
    pub strategy_id: Uuid,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub initial_capital: Decimal,
    pub final_capital: Decimal,
    /// (final - initial) / initial.
    pub total_return: f64,
    pub sharpe_ratio: Option<f64>,
    pub sortino_ratio: Option<f64>,
    /// Largest peak-to-trough decline as a fraction.
    pub max_drawdown: f64,
    pub drawdown: DrawdownAnalysis,
    /// Winning share of realized trades.
    pub win_rate: Option<f64>,
    pub total_trades: usize,
    pub total_fees: Decimal,
    pub daily_pnl: Vec<DailyPnL>,
    pub trades: Vec<Trade>,
    pub coverage: DataCoverage,
    pub synthetic_data_used: bool,
    pub warnings: Vec<RiskWarning>,
}

impl BacktestResult {
    /// Generate summary string.
    pub fn summary(&self) -> String {
        let ratio = |v: Option<f64>| v.map(|x| format!("{:.2}", x)).unwrap_or_else(|| "n/a".into());
        format!(
            "Backtest Results ({} to {})\n\
             ----------------------------------------\n\
             Total Return: {:.2}%\n\
             Final Capital: {:.2}\n\
             Max Drawdown: {:.2}%\n\
             Sharpe Ratio: {}\n\
             Sortino Ratio: {}\n\
             \n\
             Trades: {}\n\
             Win Rate: {}\n\
             Total Fees: {:.2}\n\
             \n\
             Coverage: {}/{} days ({} missing, {} stale, {} synthetic)",
            self.start_date,
            self.end_date,
            self.total_return * 100.0,
            self.final_capital,
            self.max_drawdown * 100.0,
            ratio(self.sharpe_ratio),
            ratio(self.sortino_ratio),
            self.total_trades,
            self.win_rate
                .map(|w| format!("{:.1}%", w * 100.0))
                .unwrap_or_else(|| "n/a".into()),
            self.total_fees,
            self.coverage.usable_days,
            self.coverage.total_days,
            self.coverage.missing_days,
            self.coverage.stale_days,
            self.coverage.synthetic_days,
        )
    }
}

impl fmt::Display for BacktestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Decimal places kept on model and settlement prices.
const PRICE_DP: u32 = 8;

fn money(value: f64, what: &str) -> Result<Decimal> {
    Decimal::try_from(value)
        .map(|d| d.round_dp(PRICE_DP))
        .map_err(|e| EngineError::InvalidInput(format!("{} {} is not representable: {}", what, value, e)))
}

/// The main backtesting engine. One engine runs one backtest at a time.
pub struct BacktestEngine {
    config: BacktestConfig,
    aggregator: StrategyAggregator,
    state: BacktestState,
    cancel: CancellationToken,
    initial_capital: Decimal,
    cash: Decimal,
    positions: Vec<LegPosition>,
    trades: Vec<Trade>,
    daily: Vec<DailyPnL>,
    coverage: DataCoverage,
    total_fees: Decimal,
    warnings: Vec<RiskWarning>,
    default_vol_warned: BTreeSet<String>,
}

impl BacktestEngine {
    /// Create a new backtest engine.
    pub fn new(config: BacktestConfig, aggregator: StrategyAggregator) -> Self {
        Self {
            config,
            aggregator,
            state: BacktestState::Pending,
            cancel: CancellationToken::new(),
            initial_capital: Decimal::ZERO,
            cash: Decimal::ZERO,
            positions: Vec::new(),
            trades: Vec::new(),
            daily: Vec::new(),
            coverage: DataCoverage::default(),
            total_fees: Decimal::ZERO,
            warnings: Vec::new(),
            default_vol_warned: BTreeSet::new(),
        }
    }

    /// Use an externally owned cancellation token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> BacktestState {
        self.state
    }

    pub fn config(&self) -> &BacktestConfig {
        &self.config
    }

    /// Replay `strategy` over `[start_date, end_date]`.
    pub fn run<P: MarketDataProvider + ?Sized>(
        &mut self,
        strategy: &Strategy,
        start_date: NaiveDate,
        end_date: NaiveDate,
        initial_capital: Decimal,
        provider: &P,
    ) -> Result<BacktestResult> {
        self.state = BacktestState::Pending;
        if let Err(err) = validate_for_backtest(strategy, start_date, end_date, initial_capital) {
            self.state = BacktestState::Failed;
            warn!("Backtest of {} rejected: {}", strategy.name, err);
            return Err(err);
        }

        self.reset(strategy, initial_capital);
        self.state = BacktestState::Running;
        info!(
            "Backtest {} ({}): {} to {}, capital {}",
            strategy.name, strategy.id, start_date, end_date, initial_capital
        );

        let provider = RetryingProvider::new(provider, self.config.retry.clone());
        match self.simulate(strategy, start_date, end_date, &provider) {
            Ok(result) => {
                self.state = BacktestState::Completed;
                info!(
                    "Backtest {} completed: return {:.2}%, {} trades, {}/{} usable days",
                    strategy.name,
                    result.total_return * 100.0,
                    result.total_trades,
                    result.coverage.usable_days,
                    result.coverage.total_days
                );
                self.clear();
                Ok(result)
            }
            Err(err) => {
                self.state = BacktestState::Failed;
                warn!("Backtest {} failed: {}", strategy.name, err);
                self.clear();
                Err(err)
            }
        }
    }

    fn reset(&mut self, strategy: &Strategy, initial_capital: Decimal) {
        self.clear();
        self.initial_capital = initial_capital;
        self.cash = initial_capital;
        self.positions = strategy.legs.iter().cloned().map(LegPosition::new).collect();
    }

    fn clear(&mut self) {
        self.cash = Decimal::ZERO;
        self.positions.clear();
        self.trades.clear();
        self.daily.clear();
        self.coverage = DataCoverage::default();
        self.total_fees = Decimal::ZERO;
        self.warnings.clear();
        self.default_vol_warned.clear();
    }

    fn simulate<P: MarketDataProvider>(
        &mut self,
        strategy: &Strategy,
        start_date: NaiveDate,
        end_date: NaiveDate,
        provider: &P,
    ) -> Result<BacktestResult> {
        let underlying = strategy
            .underlying()
            .ok_or_else(|| EngineError::InvalidStrategy("Strategy has no legs".into()))?
            .to_string();

        for date in start_date.iter_days().take_while(|d| *d <= end_date) {
            if self.cancel.is_cancelled() {
                info!("Backtest {} cancelled at {}", strategy.name, date);
                return Err(EngineError::Cancelled(date));
            }

            self.coverage.total_days += 1;
            match self.fetch(provider, &underlying, date)? {
                Some(snapshot) => self.process_day(date, &snapshot)?,
                None => self.handle_gap(&underlying, date)?,
            }
        }

        if self.coverage.usable_days == 0 {
            return Err(EngineError::InsufficientData {
                underlying,
                start: start_date,
                end: end_date,
            });
        }

        Ok(self.build_result(strategy, start_date, end_date))
    }

    /// Usable snapshot for the day, `None` for a gap.
    fn fetch<P: MarketDataProvider>(
        &self,
        provider: &P,
        underlying: &str,
        date: NaiveDate,
    ) -> Result<Option<MarketSnapshot>> {
        match provider.market_snapshot(underlying, date) {
            Ok(snapshot) if snapshot.synthetic && !self.config.accept_synthetic_data => {
                warn!("Rejecting synthetic snapshot for {} on {}", underlying, date);
                Ok(None)
            }
            Ok(snapshot)
                if !snapshot.underlying_price.is_finite() || snapshot.underlying_price <= 0.0 =>
            {
                warn!(
                    "Ignoring snapshot for {} on {} with price {}",
                    underlying, date, snapshot.underlying_price
                );
                Ok(None)
            }
            Ok(snapshot) => Ok(Some(snapshot)),
            Err(MarketDataError::NotFound(_)) => Ok(None),
            Err(err @ MarketDataError::Malformed(_)) => {
                warn!("Unusable market data for {} on {}: {}", underlying, date, err);
                Ok(None)
            }
            Err(err @ MarketDataError::Transient(_)) => {
                warn!("Giving up on {} {} after retries: {}", underlying, date, err);
                Ok(None)
            }
            Err(err @ MarketDataError::Fatal(_)) => Err(EngineError::MarketData(err)),
        }
    }

    fn handle_gap(&mut self, underlying: &str, date: NaiveDate) -> Result<()> {
        self.coverage.missing_days += 1;
        self.coverage.missing_dates.push(date);

        match self.config.missing_data {
            MissingDataPolicy::Skip => {
                warn!("No market data for {} on {}; skipping day", underlying, date);
            }
            MissingDataPolicy::StaleForward => match self.daily.last() {
                Some(prev) => {
                    warn!("No market data for {} on {}; carrying {} forward", underlying, date, prev.date);
                    let stale = DailyPnL {
                        date,
                        stale: true,
                        ..prev.clone()
                    };
                    self.daily.push(stale);
                    self.coverage.stale_days += 1;
                }
                None => {
                    warn!("No market data for {} on {} and nothing to carry forward", underlying, date);
                }
            },
            MissingDataPolicy::Fail => {
                return Err(EngineError::MarketDataGap {
                    underlying: underlying.to_string(),
                    date,
                });
            }
        }
        Ok(())
    }

    /// Process one day with a usable snapshot.
    fn process_day(&mut self, date: NaiveDate, snapshot: &MarketSnapshot) -> Result<()> {
        let now = snapshot.timestamp;
        let spot = money(snapshot.underlying_price, "spot")?;
        self.coverage.usable_days += 1;
        if snapshot.synthetic {
            self.coverage.synthetic_days += 1;
        }

        // Settle first so an expired leg is never marked or traded again.
        for idx in 0..self.positions.len() {
            let position = &self.positions[idx];
            if position.is_open() && position.leg.contract.is_expired(now) {
                let intrinsic = position.leg.contract.intrinsic_value(snapshot.underlying_price);
                let price = money(intrinsic, "settlement price")?;
                self.fill(idx, now, price, spot, TradeReason::Expiry);
            }
        }

        let prices = self.model_prices(snapshot, now)?;
        for (idx, price) in &prices {
            if self.positions[*idx].is_open() {
                self.positions[*idx].last_price = *price;
            }
        }

        for idx in 0..self.positions.len() {
            if self.positions[idx].exit_due(date) {
                if let Some(price) = prices.get(&idx) {
                    self.fill(idx, now, *price, spot, TradeReason::ScheduledExit);
                }
            }
        }

        for idx in 0..self.positions.len() {
            if self.positions[idx].entry_due(date) {
                if let Some(price) = prices.get(&idx) {
                    self.fill(idx, now, *price, spot, TradeReason::Entry);
                }
            }
        }

        let portfolio_value = self.portfolio_value();
        debug!(
            "{}: spot {:.2}, cash {}, value {}",
            date, snapshot.underlying_price, self.cash, portfolio_value
        );
        self.daily.push(DailyPnL {
            date,
            portfolio_value,
            cumulative_pnl: portfolio_value - self.initial_capital,
            stale: false,
        });
        Ok(())
    }

    /// Model price for every leg that is pending or open and not yet expired.
    fn model_prices(&mut self, snapshot: &MarketSnapshot, now: DateTime<Utc>) -> Result<HashMap<usize, Decimal>> {
        let live: Vec<usize> = self
            .positions
            .iter()
            .enumerate()
            .filter(|(_, p)| (p.is_open() || p.is_pending()) && !p.leg.contract.is_expired(now))
            .map(|(idx, _)| idx)
            .collect();
        if live.is_empty() {
            return Ok(HashMap::new());
        }

        let legs: Vec<_> = live.iter().map(|&idx| self.positions[idx].leg.clone()).collect();
        let aggregate = self.aggregator.aggregate(&legs, snapshot, now)?;

        let mut prices = HashMap::with_capacity(live.len());
        for (&idx, valuation) in live.iter().zip(&aggregate.legs) {
            if valuation.volatility_source == VolatilitySource::Default
                && self.default_vol_warned.insert(valuation.instrument_name.clone())
            {
                self.warnings.push(RiskWarning::DefaultVolatilityUsed {
                    instrument: valuation.instrument_name.clone(),
                    volatility: valuation.volatility,
                });
            }
            prices.insert(idx, money(valuation.pricing.price, "model price")?);
        }
        Ok(prices)
    }

    /// Execute the next lifecycle step of one leg at `price`.
    fn fill(
        &mut self,
        idx: usize,
        timestamp: DateTime<Utc>,
        price: Decimal,
        spot: Decimal,
        reason: TradeReason,
    ) {
        let commission = match reason {
            TradeReason::Expiry => Decimal::ZERO,
            _ => {
                self.config
                    .commission
                    .calculate(self.positions[idx].leg.quantity, spot, price)
                    .total
            }
        };

        let position = &mut self.positions[idx];
        let (action, cash_flow, pnl) = match reason {
            TradeReason::Entry => {
                let date = timestamp.date_naive();
                (position.leg.action, position.open(date, price, commission), None)
            }
            TradeReason::ScheduledExit | TradeReason::Expiry => {
                let (cash_flow, pnl) = position.close(price, commission);
                (position.leg.action.opposite(), cash_flow, Some(pnl))
            }
        };
        let instrument_name = position.leg.instrument_name().to_string();
        let quantity = position.leg.quantity;

        self.cash += cash_flow;
        self.total_fees += commission;

        let trade = Trade {
            timestamp,
            action,
            instrument_name,
            quantity,
            price,
            fee: commission,
            pnl,
            portfolio_value: self.portfolio_value(),
            reason,
        };
        debug!(
            "{:?} {:?} {} x{} @ {} (pnl {:?})",
            reason, trade.action, trade.instrument_name, trade.quantity, trade.price, trade.pnl
        );
        self.trades.push(trade);
    }

    /// Cash plus the signed marks of open legs.
    fn portfolio_value(&self) -> Decimal {
        self.cash
            + self
                .positions
                .iter()
                .filter(|p| p.is_open())
                .map(|p| p.market_value(p.last_price))
                .sum::<Decimal>()
    }

    /// Build the final backtest result.
    fn build_result(&mut self, strategy: &Strategy, start_date: NaiveDate, end_date: NaiveDate) -> BacktestResult {
        let final_capital = self
            .daily
            .last()
            .map(|d| d.portfolio_value)
            .unwrap_or(self.initial_capital);

        let annualization = self.config.annualization_days as f64;
        let returns = MetricsCalculator::daily_returns(self.initial_capital, &self.daily);
        let drawdown = MetricsCalculator::analyze_drawdown(self.initial_capital, &self.daily);

        let synthetic_data_used = self.coverage.synthetic_days > 0;
        let mut warnings = std::mem::take(&mut self.warnings);
        if synthetic_data_used {
            warn!("{} synthetic snapshot(s) used in backtest {}", self.coverage.synthetic_days, strategy.name);
            warnings.push(RiskWarning::SyntheticDataUsed {
                snapshots: self.coverage.synthetic_days,
            });
        }

        let trades = std::mem::take(&mut self.trades);
        BacktestResult {
            id: Uuid::new_v4(),
            strategy_id: strategy.id,
            start_date,
            end_date,
            initial_capital: self.initial_capital,
            final_capital,
            total_return: MetricsCalculator::total_return(self.initial_capital, final_capital),
            sharpe_ratio: MetricsCalculator::sharpe_ratio(&returns, self.config.risk_free_rate, annualization),
            sortino_ratio: MetricsCalculator::sortino_ratio(&returns, self.config.risk_free_rate, annualization),
            max_drawdown: drawdown.max_drawdown_pct,
            drawdown,
            win_rate: MetricsCalculator::win_rate(&trades),
            total_trades: trades.len(),
            total_fees: self.total_fees,
            daily_pnl: std::mem::take(&mut self.daily),
            trades,
            coverage: std::mem::take(&mut self.coverage),
            synthetic_data_used,
            warnings,
        }
    }
}
