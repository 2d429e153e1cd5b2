//! Service facade.
//!
//! [`OptionsEngine`] wires configuration, persistence and market data
//! together and exposes the operations callers use: contract pricing, risk
//! reports, and backtests with their stored results.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::backtest::{BacktestEngine, BacktestJob, BacktestResult, BacktestRunner, DailyPnL, Trade};
use crate::config::EngineConfig;
use crate::data::{MarketDataError, MarketDataProvider, MarketSnapshot, OptionContract, Strategy};
use crate::error::{EngineError, Result};
use crate::metrics::{MetricsCalculator, PerformanceMetrics};
use crate::pricing::{BlackScholes, PricingResult};
use crate::risk::{MarketContext, RiskAnalyzer, RiskReport};
use crate::store::{BacktestStore, InMemoryBacktestStore, InMemoryStrategyStore, StrategyStore};

/// Market inputs for pricing a single contract.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ContractInputs {
    pub spot: f64,
    pub valuation_time: DateTime<Utc>,
    pub rate: f64,
    pub volatility: f64,
}

/// Entry point for pricing, risk and backtests.
pub struct OptionsEngine {
    config: EngineConfig,
    strategies: Arc<dyn StrategyStore>,
    backtests: Arc<dyn BacktestStore>,
    provider: Arc<dyn MarketDataProvider>,
}

impl OptionsEngine {
    pub fn new(
        config: EngineConfig,
        strategies: Arc<dyn StrategyStore>,
        backtests: Arc<dyn BacktestStore>,
        provider: Arc<dyn MarketDataProvider>,
    ) -> Self {
        Self {
            config,
            strategies,
            backtests,
            provider,
        }
    }

    /// Engine backed by in-memory stores.
    pub fn in_memory(config: EngineConfig, provider: Arc<dyn MarketDataProvider>) -> Self {
        Self::new(
            config,
            Arc::new(InMemoryStrategyStore::new()),
            Arc::new(InMemoryBacktestStore::new()),
            provider,
        )
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn strategies(&self) -> &dyn StrategyStore {
        self.strategies.as_ref()
    }

    pub fn price_contract(&self, contract: &OptionContract, inputs: ContractInputs) -> Result<PricingResult> {
        BlackScholes::new(inputs.rate).price_contract(
            contract,
            inputs.spot,
            inputs.valuation_time,
            inputs.volatility,
        )
    }

    pub fn build_risk_metrics(&self, strategy: &Strategy, context: &MarketContext) -> RiskReport {
        RiskAnalyzer::new(self.config.risk.clone(), self.config.pricing.default_volatility)
            .build_risk_metrics(strategy, context)
    }

    /// Snapshot assembled from the live option chain. Contracts already
    /// settled at `valuation_time` are left out.
    pub fn live_market_context(&self, underlying: &str, valuation_time: DateTime<Utc>) -> Result<MarketContext> {
        let what = format!("option chain {}", underlying);
        let chain = self
            .config
            .backtest
            .retry
            .run(&what, || self.provider.option_chain(underlying))?;

        let underlying_price = chain
            .iter()
            .map(|q| q.underlying_price)
            .find(|p| p.is_finite() && *p > 0.0)
            .ok_or_else(|| {
                EngineError::MarketData(MarketDataError::NotFound(format!(
                    "no priced quotes in {}",
                    what
                )))
            })?;

        let mut snapshot = MarketSnapshot::new(underlying, underlying_price, valuation_time);
        for entry in chain.into_iter().filter(|q| !q.contract.is_expired(valuation_time)) {
            snapshot.quotes.insert(entry.contract.instrument_name, entry.quote);
        }
        if snapshot.quotes.is_empty() {
            warn!("Option chain for {} has no live contracts at {}", underlying, valuation_time);
        }

        Ok(MarketContext::new(snapshot, self.config.pricing.risk_free_rate))
    }

    /// Backtest a stored strategy. Only completed runs are persisted.
    pub fn run_backtest(
        &self,
        strategy_id: Uuid,
        start_date: NaiveDate,
        end_date: NaiveDate,
        initial_capital: Decimal,
    ) -> Result<BacktestResult> {
        let strategy = self.strategies.get(strategy_id)?;
        let mut engine = BacktestEngine::new(self.config.backtest.clone(), self.config.pricing.aggregator());
        let result = engine.run(&strategy, start_date, end_date, initial_capital, self.provider.as_ref())?;
        self.backtests.save(result.clone())?;
        Ok(result)
    }

    /// Run several stored strategies in parallel. Each entry fails or
    /// succeeds on its own.
    pub fn run_backtests(
        &self,
        requests: &[(Uuid, NaiveDate, NaiveDate, Decimal)],
    ) -> Result<Vec<Result<BacktestResult>>> {
        let mut outcomes: Vec<Option<Result<BacktestResult>>> = Vec::with_capacity(requests.len());
        let mut jobs = Vec::new();
        for &(strategy_id, start_date, end_date, initial_capital) in requests {
            match self.strategies.get(strategy_id) {
                Ok(strategy) => {
                    jobs.push(BacktestJob {
                        strategy,
                        start_date,
                        end_date,
                        initial_capital,
                    });
                    outcomes.push(None);
                }
                Err(err) => outcomes.push(Some(Err(err))),
            }
        }

        let runner = BacktestRunner::new(self.config.backtest.clone(), self.config.pricing.aggregator())?;
        let mut results = runner.run_many(&jobs, self.provider.as_ref()).into_iter();

        let mut saved = 0;
        let mut out = Vec::with_capacity(outcomes.len());
        for outcome in outcomes {
            let result = match outcome {
                Some(err) => err,
                None => match results.next() {
                    Some(Ok(result)) => match self.backtests.save(result.clone()) {
                        Ok(_) => {
                            saved += 1;
                            Ok(result)
                        }
                        Err(err) => {
                            warn!("Could not save backtest {}: {}", result.id, err);
                            Err(err)
                        }
                    },
                    Some(Err(err)) => Err(err),
                    None => Err(EngineError::InvalidInput("batch result missing".into())),
                },
            };
            out.push(result);
        }
        info!("Batch finished: {}/{} backtests saved", saved, requests.len());
        Ok(out)
    }

    pub fn get_backtest(&self, backtest_id: Uuid) -> Result<BacktestResult> {
        self.backtests.get(backtest_id)
    }

    pub fn get_daily_pnl(&self, backtest_id: Uuid) -> Result<Vec<DailyPnL>> {
        Ok(self.backtests.get(backtest_id)?.daily_pnl)
    }

    pub fn get_trades(&self, backtest_id: Uuid) -> Result<Vec<Trade>> {
        Ok(self.backtests.get(backtest_id)?.trades)
    }

    pub fn performance(&self, backtest_id: Uuid) -> Result<PerformanceMetrics> {
        let result = self.backtests.get(backtest_id)?;
        Ok(MetricsCalculator::calculate(&result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{
        Action, ChainQuote, InMemoryProvider, InstrumentQuote, OptionType, RetryPolicy,
    };
    use crate::risk::RiskWarning;
    use crate::strategy::StrategyBuilder;
    use approx::assert_relative_eq;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    fn provider() -> InMemoryProvider {
        let mut provider = InMemoryProvider::new();
        for (d, spot) in [(1, 45000.0), (2, 46000.0), (4, 44000.0), (5, 45500.0)] {
            let ts = Utc.with_ymd_and_hms(2024, 3, d, 0, 0, 0).unwrap();
            provider.insert(MarketSnapshot::new("BTC", spot, ts));
        }
        provider
    }

    fn engine(provider: InMemoryProvider) -> OptionsEngine {
        let mut config = EngineConfig::default();
        config.backtest.retry = RetryPolicy::none();
        config.backtest.worker_threads = Some(2);
        OptionsEngine::in_memory(config, Arc::new(provider))
    }

    #[test]
    fn test_price_contract() {
        let engine = engine(InMemoryProvider::new());
        let contract = OptionContract::listed("BTC", OptionType::Call, 45000.0, day(29));
        let inputs = ContractInputs {
            spot: 45000.0,
            valuation_time: Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
            rate: 0.05,
            volatility: 0.8,
        };
        let priced = engine.price_contract(&contract, inputs).unwrap();
        assert!(priced.price > 0.0);
        assert!(priced.delta > 0.5 && priced.delta < 0.6);

        let bad = ContractInputs { volatility: 0.0, ..inputs };
        assert!(matches!(
            engine.price_contract(&contract, bad),
            Err(EngineError::InvalidVolatility { .. })
        ));
    }

    #[test]
    fn test_backtest_is_persisted() {
        let engine = engine(provider());
        let strategy = StrategyBuilder::new("BTC", day(29)).straddle(45000.0, Action::Buy);
        let id = engine.strategies().create(strategy).unwrap();

        let result = engine.run_backtest(id, day(1), day(5), dec!(100_000)).unwrap();
        assert_eq!(result.daily_pnl.len(), 4);
        assert_eq!(result.coverage.missing_dates, vec![day(3)]);

        assert_eq!(engine.get_daily_pnl(result.id).unwrap(), result.daily_pnl);
        assert_eq!(engine.get_trades(result.id).unwrap(), result.trades);
        assert_eq!(engine.performance(result.id).unwrap().total_trades, result.total_trades);
    }

    #[test]
    fn test_failed_backtest_is_not_persisted() {
        let engine = engine(InMemoryProvider::new());
        let strategy = StrategyBuilder::new("BTC", day(29)).straddle(45000.0, Action::Buy);
        let id = engine.strategies().create(strategy).unwrap();

        let err = engine.run_backtest(id, day(1), day(5), dec!(100_000)).unwrap_err();
        assert!(matches!(err, EngineError::InsufficientData { .. }));
        assert!(matches!(
            engine.run_backtest(Uuid::new_v4(), day(1), day(5), dec!(1)),
            Err(EngineError::NotFound(_))
        ));
    }

    #[test]
    fn test_run_backtests_keeps_request_order() {
        let engine = engine(provider());
        let long = StrategyBuilder::new("BTC", day(29)).straddle(45000.0, Action::Buy);
        let short = StrategyBuilder::new("BTC", day(29)).straddle(45000.0, Action::Sell);
        let long_id = engine.strategies().create(long).unwrap();
        let short_id = engine.strategies().create(short).unwrap();

        let results = engine
            .run_backtests(&[
                (long_id, day(1), day(5), dec!(100_000)),
                (Uuid::new_v4(), day(1), day(5), dec!(100_000)),
                (short_id, day(1), day(5), dec!(100_000)),
            ])
            .unwrap();

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].as_ref().unwrap().strategy_id, long_id);
        assert!(matches!(results[1], Err(EngineError::NotFound(_))));
        let short_result = results[2].as_ref().unwrap();
        assert_eq!(short_result.strategy_id, short_id);
        assert!(engine.get_backtest(short_result.id).is_ok());
    }

    /// Refuses results for one strategy.
    struct RefusingStore {
        refused: Uuid,
        inner: InMemoryBacktestStore,
    }

    impl BacktestStore for RefusingStore {
        fn save(&self, result: BacktestResult) -> Result<Uuid> {
            if result.strategy_id == self.refused {
                return Err(EngineError::InvalidInput("store is read-only".into()));
            }
            self.inner.save(result)
        }

        fn get(&self, id: Uuid) -> Result<BacktestResult> {
            self.inner.get(id)
        }
    }

    #[test]
    fn test_save_failure_stays_with_its_entry() {
        let long = StrategyBuilder::new("BTC", day(29)).straddle(45000.0, Action::Buy);
        let short = StrategyBuilder::new("BTC", day(29)).straddle(45000.0, Action::Sell);
        let (long_id, short_id) = (long.id, short.id);

        let strategies = Arc::new(InMemoryStrategyStore::new());
        strategies.create(long).unwrap();
        strategies.create(short).unwrap();
        let mut config = EngineConfig::default();
        config.backtest.retry = RetryPolicy::none();
        let engine = OptionsEngine::new(
            config,
            strategies,
            Arc::new(RefusingStore {
                refused: long_id,
                inner: InMemoryBacktestStore::new(),
            }),
            Arc::new(provider()),
        );

        let results = engine
            .run_backtests(&[
                (long_id, day(1), day(5), dec!(100_000)),
                (short_id, day(1), day(5), dec!(100_000)),
            ])
            .unwrap();

        assert!(matches!(results[0], Err(EngineError::InvalidInput(_))));
        let short_result = results[1].as_ref().unwrap();
        assert_eq!(short_result.strategy_id, short_id);
        assert!(engine.get_backtest(short_result.id).is_ok());
    }

    #[test]
    fn test_live_market_context() {
        let valuation = Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap();
        let quote = InstrumentQuote {
            mark_price: 2500.0,
            implied_volatility: 0.75,
        };
        let live = OptionContract::listed("BTC", OptionType::Call, 45000.0, day(29));
        let settled = OptionContract::listed("BTC", OptionType::Put, 45000.0, day(8));
        let chain = vec![
            ChainQuote {
                contract: live.clone(),
                quote,
                underlying_price: 45200.0,
            },
            ChainQuote {
                contract: settled.clone(),
                quote,
                underlying_price: 45200.0,
            },
        ];
        let engine = engine(InMemoryProvider::new().with_chain("BTC", chain));

        let context = engine.live_market_context("BTC", valuation).unwrap();
        assert_eq!(context.valuation_time, valuation);
        assert_relative_eq!(context.snapshot.underlying_price, 45200.0);
        assert_relative_eq!(context.rate, 0.05);
        assert!(context.snapshot.quote(&live.instrument_name).is_some());
        assert!(context.snapshot.quote(&settled.instrument_name).is_none());

        let strategy = StrategyBuilder::new("BTC", day(29)).single_leg(OptionType::Call, 45000.0, Action::Buy);
        let report = engine.build_risk_metrics(&strategy, &context);
        assert!(report.is_ok());
        assert!(!report
            .warnings
            .iter()
            .any(|w| matches!(w, RiskWarning::DefaultVolatilityUsed { .. })));

        assert!(engine.live_market_context("ETH", valuation).is_err());
    }
}
