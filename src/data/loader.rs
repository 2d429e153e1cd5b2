//! File-backed market data provider.
//!
//! Snapshots are stored as raw feed payloads, one JSON file per underlying
//! per day:
//!
//! ```text
//! <data_dir>/<UNDERLYING>/<YYYY-MM-DD>.json
//! ```
//!
//! Each file is passed through [`SnapshotNormalizer`] on read. The most
//! recent file doubles as the live option chain.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde_json::Value;
use tracing::debug;

use super::normalize::{NormalizeConfig, SnapshotNormalizer};
use super::provider::{MarketDataError, MarketDataProvider};
use super::types::{ChainQuote, MarketSnapshot, OptionContract};

/// Reads normalized snapshots from a directory tree.
pub struct JsonFileProvider {
    data_dir: PathBuf,
    normalizer: SnapshotNormalizer,
}

impl JsonFileProvider {
    /// Create a provider pointing to the snapshot directory.
    pub fn new(data_dir: impl AsRef<Path>, config: NormalizeConfig) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            normalizer: SnapshotNormalizer::new(config),
        }
    }

    /// Get the path to an underlying's snapshot file for a given date.
    fn snapshot_path(&self, underlying: &str, date: NaiveDate) -> PathBuf {
        self.data_dir
            .join(underlying)
            .join(format!("{}.json", date.format("%Y-%m-%d")))
    }

    /// List dates with a snapshot file for an underlying, ascending.
    pub fn available_dates(&self, underlying: &str) -> Result<Vec<NaiveDate>, MarketDataError> {
        let dir = self.data_dir.join(underlying);
        if !dir.exists() {
            return Ok(vec![]);
        }

        let entries = fs::read_dir(&dir)
            .map_err(|e| MarketDataError::Transient(format!("{}: {}", dir.display(), e)))?;

        let mut dates = Vec::new();
        for entry in entries.flatten() {
            let file_name = entry.file_name();
            let name = file_name.to_string_lossy();
            if let Some(stem) = name.strip_suffix(".json") {
                if let Ok(date) = NaiveDate::parse_from_str(stem, "%Y-%m-%d") {
                    dates.push(date);
                }
            }
        }
        dates.sort();
        Ok(dates)
    }

    fn read_payload(&self, path: &Path) -> Result<Value, MarketDataError> {
        let content = fs::read_to_string(path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => MarketDataError::NotFound(path.display().to_string()),
            _ => MarketDataError::Transient(format!("{}: {}", path.display(), e)),
        })?;
        serde_json::from_str(&content)
            .map_err(|e| MarketDataError::Malformed(format!("{}: {}", path.display(), e)))
    }
}

impl MarketDataProvider for JsonFileProvider {
    fn market_snapshot(
        &self,
        underlying: &str,
        date: NaiveDate,
    ) -> Result<MarketSnapshot, MarketDataError> {
        let path = self.snapshot_path(underlying, date);
        let raw = self.read_payload(&path)?;
        let normalized = self
            .normalizer
            .normalize(&raw, underlying, date)
            .map_err(|e| MarketDataError::Malformed(format!("{}: {}", path.display(), e)))?;

        debug!(
            "Loaded {} quotes for {} on {} ({} rejected)",
            normalized.snapshot.quotes.len(),
            underlying,
            date,
            normalized.rejected.len()
        );
        Ok(normalized.snapshot)
    }

    fn option_chain(&self, underlying: &str) -> Result<Vec<ChainQuote>, MarketDataError> {
        let latest = self
            .available_dates(underlying)?
            .pop()
            .ok_or_else(|| MarketDataError::NotFound(format!("option chain {}", underlying)))?;
        let snapshot = self.market_snapshot(underlying, latest)?;

        Ok(snapshot
            .quotes
            .iter()
            .filter_map(|(name, quote)| {
                let contract = OptionContract::parse_instrument(name).ok()?;
                Some(ChainQuote {
                    contract,
                    quote: *quote,
                    underlying_price: snapshot.underlying_price,
                })
            })
            .collect())
    }
}
