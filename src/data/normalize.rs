//! Normalization of raw market data payloads.
//!
//! Feeds deliver loosely-shaped JSON: keys may be missing, numbers may be
//! strings, IV may be quoted in percent. Everything is converted here into
//! a strict [`MarketSnapshot`]; nothing downstream inspects optional fields.
//!
//! Accepted payload shape:
//!
//! ```json
//! {
//!   "underlying": "BTC",
//!   "timestamp": "2024-03-01T00:00:00Z",
//!   "underlying_price": 45000.0,
//!   "synthetic": false,
//!   "quotes": [
//!     { "instrument_name": "BTC-29MAR24-45000-C", "mark_price": 3900.0, "mark_iv": 80.0 }
//!   ]
//! }
//! ```
//!
//! A quote with a price but no IV gets its IV implied; a quote with IV but no
//! price gets a model price; a quote with neither is rejected.

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::error::{EngineError, Result};
use crate::pricing::{implied_volatility, BlackScholes};

use super::types::{InstrumentQuote, MarketSnapshot, OptionContract};

const PRICE_KEYS: &[&str] = &["underlying_price", "index_price", "spot"];
const MARK_KEYS: &[&str] = &["mark_price", "mark", "price"];
const IV_KEYS: &[&str] = &["implied_volatility", "mark_iv", "iv"];

/// Unit of implied volatility in the feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IvUnit {
    /// 0.8 means 80%.
    Fraction,
    /// 80.0 means 80%.
    Percent,
}

/// Currency of option mark prices in the feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceUnit {
    /// Quote currency (USD).
    Quote,
    /// Units of the underlying (inverse options); multiplied by spot.
    Underlying,
}

/// Normalizer settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizeConfig {
    pub iv_unit: IvUnit,
    pub price_unit: PriceUnit,
    /// Rate used when implying volatility from a price.
    pub rate: f64,
}

impl Default for NormalizeConfig {
    fn default() -> Self {
        Self {
            iv_unit: IvUnit::Percent,
            price_unit: PriceUnit::Quote,
            rate: 0.05,
        }
    }
}

/// A quote dropped during normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedQuote {
    pub instrument_name: String,
    pub reason: String,
}

/// Normalized snapshot plus whatever was dropped on the way.
#[derive(Debug, Clone)]
pub struct NormalizedSnapshot {
    pub snapshot: MarketSnapshot,
    pub rejected: Vec<RejectedQuote>,
}

/// Converts raw payloads into strict snapshots.
#[derive(Debug, Clone, Default)]
pub struct SnapshotNormalizer {
    config: NormalizeConfig,
}

impl SnapshotNormalizer {
    pub fn new(config: NormalizeConfig) -> Self {
        Self { config }
    }

    /// Normalize one payload. `underlying` and `date` fill in missing keys.
    pub fn normalize(
        &self,
        raw: &Value,
        underlying: &str,
        date: NaiveDate,
    ) -> Result<NormalizedSnapshot> {
        let obj = raw
            .as_object()
            .ok_or_else(|| EngineError::InvalidInput("Snapshot payload must be an object".into()))?;

        let underlying = obj
            .get("underlying")
            .and_then(Value::as_str)
            .unwrap_or(underlying)
            .to_string();

        let underlying_price = number(raw, PRICE_KEYS).ok_or_else(|| {
            EngineError::InvalidInput(format!("Snapshot for {} has no underlying price", underlying))
        })?;
        if underlying_price <= 0.0 {
            return Err(EngineError::InvalidInput(format!(
                "Snapshot for {} has non-positive underlying price {}",
                underlying, underlying_price
            )));
        }

        let timestamp = obj
            .get("timestamp")
            .and_then(parse_timestamp)
            .unwrap_or_else(|| date.and_time(NaiveTime::default()).and_utc());

        let synthetic = obj
            .get("synthetic")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let mut snapshot = MarketSnapshot::new(underlying, underlying_price, timestamp);
        snapshot.synthetic = synthetic;

        let mut rejected = Vec::new();
        let quotes = obj
            .get("quotes")
            .or_else(|| obj.get("result"))
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[]);

        for entry in quotes {
            match self.normalize_quote(entry, underlying_price, timestamp) {
                Ok((name, quote)) => {
                    snapshot.quotes.insert(name, quote);
                }
                Err(r) => {
                    warn!("Dropping quote {}: {}", r.instrument_name, r.reason);
                    rejected.push(r);
                }
            }
        }

        Ok(NormalizedSnapshot { snapshot, rejected })
    }

    fn normalize_quote(
        &self,
        entry: &Value,
        underlying_price: f64,
        timestamp: DateTime<Utc>,
    ) -> std::result::Result<(String, InstrumentQuote), RejectedQuote> {
        let name = entry
            .get("instrument_name")
            .and_then(Value::as_str)
            .ok_or_else(|| RejectedQuote {
                instrument_name: "<unnamed>".into(),
                reason: "missing instrument_name".into(),
            })?
            .to_string();
        let reject = |reason: String| RejectedQuote {
            instrument_name: name.clone(),
            reason,
        };

        let spot = number(entry, PRICE_KEYS).unwrap_or(underlying_price);
        let mark = number(entry, MARK_KEYS).map(|p| match self.config.price_unit {
            PriceUnit::Quote => p,
            PriceUnit::Underlying => p * spot,
        });
        let iv = number(entry, IV_KEYS).map(|v| match self.config.iv_unit {
            IvUnit::Fraction => v,
            IvUnit::Percent => v / 100.0,
        });

        if let Some(v) = iv {
            if v <= 0.0 {
                return Err(reject(format!("non-positive implied volatility {}", v)));
            }
        }

        let (mark_price, implied_volatility) = match (mark, iv) {
            (Some(p), Some(v)) => (p, v),
            (Some(p), None) => {
                let contract =
                    OptionContract::parse_instrument(&name).map_err(|e| reject(e.to_string()))?;
                let v = implied_volatility(&contract, spot, timestamp, self.config.rate, p)
                    .ok_or_else(|| reject(format!("cannot imply volatility from price {}", p)))?;
                (p, v)
            }
            (None, Some(v)) => {
                let contract =
                    OptionContract::parse_instrument(&name).map_err(|e| reject(e.to_string()))?;
                let priced = BlackScholes::new(self.config.rate)
                    .price_contract(&contract, spot, timestamp, v)
                    .map_err(|e| reject(e.to_string()))?;
                (priced.price, v)
            }
            (None, None) => return Err(reject("no mark price or implied volatility".into())),
        };

        Ok((
            name,
            InstrumentQuote {
                mark_price,
                implied_volatility,
            },
        ))
    }
}

/// First key holding a number or numeric string.
fn number(value: &Value, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|k| match value.get(*k)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
    .filter(|v: &f64| v.is_finite())
}

/// RFC 3339 string or epoch milliseconds.
fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(n) => n.as_i64().and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use serde_json::json;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
    }

    #[test]
    fn test_full_payload() {
        let raw = json!({
            "underlying": "BTC",
            "timestamp": "2024-03-01T00:00:00Z",
            "underlying_price": "45000",
            "quotes": [
                { "instrument_name": "BTC-29MAR24-45000-C", "mark_price": 3900.0, "mark_iv": 80.0 },
                { "instrument_name": "BTC-29MAR24-40000-P", "mark_iv": "75.5" },
                { "instrument_name": "BTC-29MAR24-50000-C" },
                { "mark_price": 12.0 }
            ]
        });

        let normalized = SnapshotNormalizer::default().normalize(&raw, "BTC", day()).unwrap();
        let snap = &normalized.snapshot;
        assert_eq!(snap.underlying_price, 45000.0);
        assert_eq!(snap.quotes.len(), 2);
        assert_relative_eq!(snap.quote("BTC-29MAR24-45000-C").unwrap().implied_volatility, 0.8);

        let put = snap.quote("BTC-29MAR24-40000-P").unwrap();
        assert_relative_eq!(put.implied_volatility, 0.755);
        assert!(put.mark_price > 0.0);

        assert_eq!(normalized.rejected.len(), 2);
        assert!(!snap.synthetic);
    }

    #[test]
    fn test_implies_vol_from_price() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let contract = OptionContract::parse_instrument("BTC-29MAR24-45000-C").unwrap();
        let price = BlackScholes::new(0.05)
            .price_contract(&contract, 45000.0, ts, 0.7)
            .unwrap()
            .price;

        let raw = json!({
            "index_price": 45000.0,
            "timestamp": ts.timestamp_millis(),
            "result": [ { "instrument_name": "BTC-29MAR24-45000-C", "mark_price": price } ]
        });
        let normalized = SnapshotNormalizer::default().normalize(&raw, "BTC", day()).unwrap();
        let quote = normalized.snapshot.quote("BTC-29MAR24-45000-C").unwrap();
        assert_relative_eq!(quote.implied_volatility, 0.7, epsilon = 1e-4);
        assert_eq!(normalized.snapshot.underlying, "BTC");
        assert_eq!(normalized.snapshot.timestamp, ts);
    }

    #[test]
    fn test_inverse_prices_and_fraction_iv() {
        let config = NormalizeConfig {
            iv_unit: IvUnit::Fraction,
            price_unit: PriceUnit::Underlying,
            rate: 0.0,
        };
        let raw = json!({
            "underlying_price": 40000.0,
            "synthetic": true,
            "quotes": [ { "instrument_name": "BTC-29MAR24-45000-C", "mark_price": 0.05, "iv": 0.6 } ]
        });
        let normalized = SnapshotNormalizer::new(config).normalize(&raw, "BTC", day()).unwrap();
        let quote = normalized.snapshot.quote("BTC-29MAR24-45000-C").unwrap();
        assert_relative_eq!(quote.mark_price, 2000.0);
        assert_relative_eq!(quote.implied_volatility, 0.6);
        assert!(normalized.snapshot.synthetic);
        assert_eq!(normalized.snapshot.date(), day());
    }

    #[test]
    fn test_rejects_bad_payloads() {
        let normalizer = SnapshotNormalizer::default();
        assert!(normalizer.normalize(&json!([]), "BTC", day()).is_err());
        assert!(normalizer.normalize(&json!({ "quotes": [] }), "BTC", day()).is_err());
        assert!(normalizer
            .normalize(&json!({ "underlying_price": -5.0 }), "BTC", day())
            .is_err());

        let raw = json!({
            "underlying_price": 45000.0,
            "quotes": [ { "instrument_name": "BTC-29MAR24-45000-C", "mark_price": 10.0, "mark_iv": 0.0 } ]
        });
        let normalized = normalizer.normalize(&raw, "BTC", day()).unwrap();
        assert!(normalized.snapshot.quotes.is_empty());
        assert_eq!(normalized.rejected[0].instrument_name, "BTC-29MAR24-45000-C");
    }
}
