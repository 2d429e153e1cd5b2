//! Market data collaborator interface.
//!
//! The engine never fetches data itself; it asks a [`MarketDataProvider`]
//! for one snapshot per day and, for live risk, an option chain. Transient
//! failures are retried by [`RetryingProvider`] with bounded exponential
//! backoff.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use super::types::{ChainQuote, MarketSnapshot};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MarketDataError {
    /// No data exists for the request; recoverable as a coverage gap.
    #[error("Not found: {0}")]
    NotFound(String),

    /// One day's payload is unreadable or fails normalization; recoverable
    /// as a coverage gap.
    #[error("Malformed payload: {0}")]
    Malformed(String),

    /// Temporary failure (timeouts, rate limits); worth retrying.
    #[error("Transient failure: {0}")]
    Transient(String),

    /// Provider-wide permanent failure (bad credentials, unsupported request).
    #[error("Fatal failure: {0}")]
    Fatal(String),
}

impl MarketDataError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Source of market snapshots and option chains.
pub trait MarketDataProvider: Send + Sync {
    /// Snapshot for `underlying` on a UTC calendar date.
    fn market_snapshot(
        &self,
        underlying: &str,
        date: NaiveDate,
    ) -> Result<MarketSnapshot, MarketDataError>;

    /// Current listed contracts with quotes.
    fn option_chain(&self, underlying: &str) -> Result<Vec<ChainQuote>, MarketDataError>;
}

impl<P: MarketDataProvider + ?Sized> MarketDataProvider for Arc<P> {
    fn market_snapshot(
        &self,
        underlying: &str,
        date: NaiveDate,
    ) -> Result<MarketSnapshot, MarketDataError> {
        (**self).market_snapshot(underlying, date)
    }

    fn option_chain(&self, underlying: &str) -> Result<Vec<ChainQuote>, MarketDataError> {
        (**self).option_chain(underlying)
    }
}

impl<P: MarketDataProvider + ?Sized> MarketDataProvider for &P {
    fn market_snapshot(
        &self,
        underlying: &str,
        date: NaiveDate,
    ) -> Result<MarketSnapshot, MarketDataError> {
        (**self).market_snapshot(underlying, date)
    }

    fn option_chain(&self, underlying: &str) -> Result<Vec<ChainQuote>, MarketDataError> {
        (**self).option_chain(underlying)
    }
}

/// Bounded retry schedule for transient failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 200,
            max_backoff_ms: 2_000,
        }
    }
}

impl RetryPolicy {
    /// No retries at all.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
        }
    }

    /// Delay before retry number `attempt` (0-based): initial * 2^attempt, capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let ms = self
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }

    /// Run `op`, retrying transient errors.
    pub fn run<T>(
        &self,
        what: &str,
        mut op: impl FnMut() -> Result<T, MarketDataError>,
    ) -> Result<T, MarketDataError> {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            match op() {
                Err(e) if e.is_transient() && attempt + 1 < attempts => {
                    let delay = self.backoff(attempt);
                    warn!(
                        "{} failed (attempt {}/{}): {}; retrying in {:?}",
                        what,
                        attempt + 1,
                        attempts,
                        e,
                        delay
                    );
                    if !delay.is_zero() {
                        std::thread::sleep(delay);
                    }
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

/// Provider wrapper adding bounded retries.
pub struct RetryingProvider<P> {
    inner: P,
    policy: RetryPolicy,
}

impl<P: MarketDataProvider> RetryingProvider<P> {
    pub fn new(inner: P, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }
}

impl<P: MarketDataProvider> MarketDataProvider for RetryingProvider<P> {
    fn market_snapshot(
        &self,
        underlying: &str,
        date: NaiveDate,
    ) -> Result<MarketSnapshot, MarketDataError> {
        let what = format!("snapshot {} {}", underlying, date);
        self.policy
            .run(&what, || self.inner.market_snapshot(underlying, date))
    }

    fn option_chain(&self, underlying: &str) -> Result<Vec<ChainQuote>, MarketDataError> {
        let what = format!("option chain {}", underlying);
        self.policy.run(&what, || self.inner.option_chain(underlying))
    }
}

/// Snapshots and chains held in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryProvider {
    snapshots: HashMap<(String, NaiveDate), MarketSnapshot>,
    chains: HashMap<String, Vec<ChainQuote>>,
}

impl InMemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a snapshot under its own underlying and date.
    pub fn insert(&mut self, snapshot: MarketSnapshot) {
        let key = (snapshot.underlying.clone(), snapshot.date());
        self.snapshots.insert(key, snapshot);
    }

    pub fn with_snapshot(mut self, snapshot: MarketSnapshot) -> Self {
        self.insert(snapshot);
        self
    }

    pub fn with_chain(mut self, underlying: &str, chain: Vec<ChainQuote>) -> Self {
        self.chains.insert(underlying.to_string(), chain);
        self
    }
}

impl MarketDataProvider for InMemoryProvider {
    fn market_snapshot(
        &self,
        underlying: &str,
        date: NaiveDate,
    ) -> Result<MarketSnapshot, MarketDataError> {
        self.snapshots
            .get(&(underlying.to_string(), date))
            .cloned()
            .ok_or_else(|| MarketDataError::NotFound(format!("{} {}", underlying, date)))
    }

    fn option_chain(&self, underlying: &str) -> Result<Vec<ChainQuote>, MarketDataError> {
        self.chains
            .get(underlying)
            .cloned()
            .ok_or_else(|| MarketDataError::NotFound(format!("option chain {}", underlying)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Flaky {
        failures: u32,
        calls: AtomicU32,
    }

    impl MarketDataProvider for Flaky {
        fn market_snapshot(
            &self,
            underlying: &str,
            _date: NaiveDate,
        ) -> Result<MarketSnapshot, MarketDataError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                return Err(MarketDataError::Transient("timeout".into()));
            }
            let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
            Ok(MarketSnapshot::new(underlying, 42000.0, ts))
        }

        fn option_chain(&self, _underlying: &str) -> Result<Vec<ChainQuote>, MarketDataError> {
            Err(MarketDataError::Fatal("unsupported".into()))
        }
    }

    fn no_wait(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
        }
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(0), Duration::from_millis(200));
        assert_eq!(policy.backoff(1), Duration::from_millis(400));
        assert_eq!(policy.backoff(10), Duration::from_millis(2_000));
        assert_eq!(policy.backoff(80), Duration::from_millis(2_000));
    }

    #[test]
    fn test_retry_recovers_from_transient() {
        let provider = RetryingProvider::new(
            Flaky {
                failures: 2,
                calls: AtomicU32::new(0),
            },
            no_wait(3),
        );
        let date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        assert!(provider.market_snapshot("BTC", date).is_ok());
        assert_eq!(provider.inner().calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_retry_gives_up() {
        let provider = RetryingProvider::new(
            Flaky {
                failures: 5,
                calls: AtomicU32::new(0),
            },
            no_wait(2),
        );
        let date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let err = provider.market_snapshot("BTC", date).unwrap_err();
        assert!(err.is_transient());
        assert_eq!(provider.inner().calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_fatal_is_not_retried() {
        let provider = RetryingProvider::new(
            Flaky {
                failures: 0,
                calls: AtomicU32::new(0),
            },
            no_wait(5),
        );
        assert!(matches!(
            provider.option_chain("BTC"),
            Err(MarketDataError::Fatal(_))
        ));
    }

    #[test]
    fn test_in_memory_lookup() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        let provider = InMemoryProvider::new().with_snapshot(MarketSnapshot::new("BTC", 43000.0, ts));
        let date = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        assert_eq!(provider.market_snapshot("BTC", date).unwrap().underlying_price, 43000.0);
        assert!(matches!(
            provider.market_snapshot("ETH", date),
            Err(MarketDataError::NotFound(_))
        ));
    }
}
