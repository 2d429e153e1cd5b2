//! Persistence collaborators.
//!
//! The engine only needs create/get/update/delete for strategies and
//! save/get for finished backtests. The in-memory stores back the CLI and
//! tests; anything durable implements the same traits.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use uuid::Uuid;

use crate::backtest::BacktestResult;
use crate::data::Strategy;
use crate::error::{EngineError, Result};

pub trait StrategyStore: Send + Sync {
    fn create(&self, strategy: Strategy) -> Result<Uuid>;
    fn get(&self, id: Uuid) -> Result<Strategy>;
    /// Replace an existing strategy; `NotFound` if it was never created.
    fn update(&self, strategy: Strategy) -> Result<()>;
    fn delete(&self, id: Uuid) -> Result<()>;
}

pub trait BacktestStore: Send + Sync {
    fn save(&self, result: BacktestResult) -> Result<Uuid>;
    fn get(&self, id: Uuid) -> Result<BacktestResult>;
}

// A panic while holding the lock cannot leave a HashMap half-written, so a
// poisoned lock is still safe to use.
fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
pub struct InMemoryStrategyStore {
    strategies: RwLock<HashMap<Uuid, Strategy>>,
}

impl InMemoryStrategyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        read(&self.strategies).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl StrategyStore for InMemoryStrategyStore {
    fn create(&self, strategy: Strategy) -> Result<Uuid> {
        let mut strategies = write(&self.strategies);
        if strategies.contains_key(&strategy.id) {
            return Err(EngineError::InvalidInput(format!(
                "Strategy {} already exists",
                strategy.id
            )));
        }
        let id = strategy.id;
        strategies.insert(id, strategy);
        Ok(id)
    }

    fn get(&self, id: Uuid) -> Result<Strategy> {
        read(&self.strategies)
            .get(&id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("strategy {}", id)))
    }

    fn update(&self, strategy: Strategy) -> Result<()> {
        let mut strategies = write(&self.strategies);
        match strategies.get_mut(&strategy.id) {
            Some(existing) => {
                *existing = strategy;
                Ok(())
            }
            None => Err(EngineError::NotFound(format!("strategy {}", strategy.id))),
        }
    }

    fn delete(&self, id: Uuid) -> Result<()> {
        write(&self.strategies)
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| EngineError::NotFound(format!("strategy {}", id)))
    }
}

#[derive(Debug, Default)]
pub struct InMemoryBacktestStore {
    results: RwLock<HashMap<Uuid, BacktestResult>>,
}

impl InMemoryBacktestStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        read(&self.results).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl BacktestStore for InMemoryBacktestStore {
    fn save(&self, result: BacktestResult) -> Result<Uuid> {
        let id = result.id;
        write(&self.results).insert(id, result);
        Ok(id)
    }

    fn get(&self, id: Uuid) -> Result<BacktestResult> {
        read(&self.results)
            .get(&id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("backtest {}", id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Action;
    use crate::strategy::StrategyBuilder;
    use chrono::NaiveDate;

    fn straddle() -> Strategy {
        StrategyBuilder::new("BTC", NaiveDate::from_ymd_opt(2024, 3, 29).unwrap())
            .straddle(45000.0, Action::Buy)
    }

    #[test]
    fn test_strategy_crud() {
        let store = InMemoryStrategyStore::new();
        let strategy = straddle();
        let id = store.create(strategy.clone()).unwrap();
        assert_eq!(id, strategy.id);
        assert_eq!(store.get(id).unwrap(), strategy);

        // Duplicate ids are rejected
        assert!(store.create(strategy.clone()).is_err());

        let mut renamed = strategy.clone();
        renamed.name = "renamed".into();
        renamed.replace_legs(strategy.legs[..1].to_vec());
        store.update(renamed).unwrap();
        let stored = store.get(id).unwrap();
        assert_eq!(stored.name, "renamed");
        assert_eq!(stored.legs.len(), 1);

        store.delete(id).unwrap();
        assert!(store.is_empty());
        assert!(matches!(store.get(id), Err(EngineError::NotFound(_))));
        assert!(matches!(store.delete(id), Err(EngineError::NotFound(_))));
    }

    #[test]
    fn test_update_unknown_strategy() {
        let store = InMemoryStrategyStore::new();
        let err = store.update(straddle()).unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[test]
    fn test_backtest_get_unknown() {
        let store = InMemoryBacktestStore::new();
        assert!(store.is_empty());
        assert!(matches!(store.get(Uuid::new_v4()), Err(EngineError::NotFound(_))));
    }
}
