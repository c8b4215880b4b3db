//! Fiat cross-rate table and the pure conversion logic over it.

use crate::core::error::ConversionError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::warn;

/// Rates captured by one fetch, keyed `base -> quote -> multiplier`.
///
/// The pivot currency is the one every other rate was fetched against, so any
/// pair whose legs are both known relative to the pivot can be composed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateTable {
    pivot: String,
    captured_at: DateTime<Utc>,
    rates: BTreeMap<String, BTreeMap<String, f64>>,
}

impl RateTable {
    pub fn new(pivot: &str, captured_at: DateTime<Utc>) -> Self {
        Self {
            pivot: pivot.to_ascii_uppercase(),
            captured_at,
            rates: BTreeMap::new(),
        }
    }

    pub fn pivot(&self) -> &str {
        &self.pivot
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    /// Records `1 base = rate quote`. Non-positive or non-finite rates are
    /// dropped so they can never be mistaken for a usable value.
    pub fn insert(&mut self, base: &str, quote: &str, rate: f64) {
        if !rate.is_finite() || rate <= 0.0 {
            warn!("Ignoring unusable rate {rate} for {base}/{quote}");
            return;
        }
        self.rates
            .entry(base.to_ascii_uppercase())
            .or_default()
            .insert(quote.to_ascii_uppercase(), rate);
    }

    pub fn with_rate(mut self, base: &str, quote: &str, rate: f64) -> Self {
        self.insert(base, quote, rate);
        self
    }

    /// The rate exactly as fetched, without inversion or composition.
    pub fn direct(&self, base: &str, quote: &str) -> Option<f64> {
        self.rates
            .get(&base.to_ascii_uppercase())
            .and_then(|quotes| quotes.get(&quote.to_ascii_uppercase()))
            .copied()
    }

    /// Resolves `from -> to`: identity, direct, inverse of the reverse pair,
    /// then composition through the pivot. `None` means unknown, never 1.0.
    pub fn rate(&self, from: &str, to: &str) -> Option<f64> {
        if from.eq_ignore_ascii_case(to) {
            return Some(1.0);
        }
        self.leg(from, to).or_else(|| {
            let to_pivot = self.leg(from, &self.pivot)?;
            let from_pivot = self.leg(&self.pivot, to)?;
            Some(to_pivot * from_pivot)
        })
    }

    pub fn convert(&self, value: f64, from: &str, to: &str) -> Result<f64, ConversionError> {
        self.rate(from, to)
            .map(|rate| value * rate)
            .ok_or_else(|| ConversionError::rate_unknown(from, to))
    }

    /// Every currency that appears in the table, pivot included.
    pub fn currencies(&self) -> BTreeSet<&str> {
        let mut currencies = BTreeSet::from([self.pivot.as_str()]);
        for (base, quotes) in &self.rates {
            currencies.insert(base.as_str());
            currencies.extend(quotes.keys().map(String::as_str));
        }
        currencies
    }

    /// Flattened `(base, quote, rate)` view for bulk consumers.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, f64)> {
        self.rates.iter().flat_map(|(base, quotes)| {
            quotes
                .iter()
                .map(move |(quote, rate)| (base.as_str(), quote.as_str(), *rate))
        })
    }

    pub fn len(&self) -> usize {
        self.rates.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn leg(&self, from: &str, to: &str) -> Option<f64> {
        if from.eq_ignore_ascii_case(to) {
            return Some(1.0);
        }
        self.direct(from, to)
            .or_else(|| self.direct(to, from).map(|rate| 1.0 / rate))
    }
}
