//! Parallel execution of independent backtests.
//!
//! Each job gets its own engine; runs share nothing but the read-only
//! market data provider.

use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::NaiveDate;
use rayon::prelude::*;
use rust_decimal::Decimal;
use tracing::info;

use crate::data::{MarketDataProvider, Strategy};
use crate::error::{EngineError, Result};
use crate::strategy::StrategyAggregator;

use super::engine::{BacktestConfig, BacktestEngine, BacktestResult};

/// One backtest request.
#[derive(Debug, Clone)]
pub struct BacktestJob {
    pub strategy: Strategy,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub initial_capital: Decimal,
}

/// Runs batches of backtests on a dedicated rayon pool.
pub struct BacktestRunner {
    config: BacktestConfig,
    aggregator: StrategyAggregator,
    pool: rayon::ThreadPool,
}

impl BacktestRunner {
    /// Pool sized by `config.worker_threads`, or available cores when unset.
    pub fn new(config: BacktestConfig, aggregator: StrategyAggregator) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.worker_threads.unwrap_or(0))
            .thread_name(|i| format!("backtest-{}", i))
            .build()
            .map_err(|e| EngineError::Config(format!("failed to build backtest pool: {}", e)))?;
        Ok(Self {
            config,
            aggregator,
            pool,
        })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Run every job; results are in job order.
    pub fn run_many<P: MarketDataProvider + ?Sized>(
        &self,
        jobs: &[BacktestJob],
        provider: &P,
    ) -> Vec<Result<BacktestResult>> {
        let done = AtomicUsize::new(0);
        let total = jobs.len();
        info!("Running {} backtests on {} threads", total, self.threads());

        self.pool.install(|| {
            jobs.par_iter()
                .map(|job| {
                    let mut engine = BacktestEngine::new(self.config.clone(), self.aggregator);
                    let result = engine.run(
                        &job.strategy,
                        job.start_date,
                        job.end_date,
                        job.initial_capital,
                        provider,
                    );

                    let finished = done.fetch_add(1, Ordering::Relaxed) + 1;
                    if finished % (total / 10).max(1) == 0 || finished == total {
                        info!("  {}/{} backtests finished", finished, total);
                    }
                    result
                })
                .collect()
        })
    }
}
