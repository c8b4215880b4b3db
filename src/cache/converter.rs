use crate::cache::rates::RateCache;
use crate::core::error::{ConversionError, FetchError};
use crate::core::rates::RateTable;
use std::sync::Arc;
use tracing::debug;

/// Per-transaction amounts that convert with one rate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValueBundle {
    pub price: f64,
    pub cost: f64,
    pub fee: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConvertedValues {
    pub price: f64,
    pub cost: f64,
    pub fee: f64,
    pub rate: f64,
}

/// Conversion over whatever table the rate cache currently holds.
#[derive(Clone)]
pub struct CurrencyConverter {
    rates: Arc<RateCache>,
}

impl CurrencyConverter {
    pub fn new(rates: Arc<RateCache>) -> Self {
        Self { rates }
    }

    /// The rate `from -> to`. Without any table only the identity is known.
    pub fn rate(&self, from: &str, to: &str) -> Result<f64, ConversionError> {
        if from.eq_ignore_ascii_case(to) {
            return Ok(1.0);
        }
        self.rates
            .rate_table()
            .and_then(|table| table.rate(from, to))
            .ok_or_else(|| ConversionError::rate_unknown(from, to))
    }

    pub fn convert(&self, value: f64, from: &str, to: &str) -> Result<f64, ConversionError> {
        self.rate(from, to).map(|rate| value * rate)
    }

    pub fn convert_values(
        &self,
        values: ValueBundle,
        from: &str,
        to: &str,
    ) -> Result<ConvertedValues, ConversionError> {
        let rate = self.rate(from, to)?;
        Ok(ConvertedValues {
            price: values.price * rate,
            cost: values.cost * rate,
            fee: values.fee * rate,
            rate,
        })
    }

    /// Fetches rates if none have ever been held. Safe to call repeatedly.
    pub async fn ensure_rates_loaded(&self) -> Result<(), FetchError> {
        if self.rates.load_rates_if_missing().await? {
            debug!("Rates loaded on demand");
        }
        Ok(())
    }

    pub fn rate_table(&self) -> Option<Arc<RateTable>> {
        self.rates.rate_table()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::testing::{ScriptedSource, table};
    use crate::core::ledger::MemoryLedger;
    use crate::store::memory::MemoryStore;
    use std::time::Duration;

    fn converter(source: Arc<ScriptedSource>) -> CurrencyConverter {
        let cache = RateCache::new(
            source,
            Arc::new(MemoryLedger::new()),
            Arc::new(MemoryStore::new()),
            "EUR",
            Duration::from_secs(300),
        );
        CurrencyConverter::new(Arc::new(cache))
    }

    #[tokio::test]
    async fn test_identity_without_rates() {
        let converter = converter(ScriptedSource::new());
        assert_eq!(converter.convert(12.5, "usd", "USD").unwrap(), 12.5);
        assert_eq!(
            converter.convert(1.0, "USD", "EUR"),
            Err(ConversionError::rate_unknown("USD", "EUR"))
        );
        assert!(converter.rate_table().is_none());
    }

    #[tokio::test]
    async fn test_ensure_rates_loaded_is_idempotent() {
        let source = ScriptedSource::new();
        source.push_rates(Ok(table()));
        let converter = converter(source.clone());

        converter.ensure_rates_loaded().await.unwrap();
        converter.ensure_rates_loaded().await.unwrap();
        assert_eq!(source.rate_calls(), 1);

        assert_eq!(converter.convert(10.0, "EUR", "USD").unwrap(), 12.5);
        assert!((converter.convert(12.5, "USD", "PLN").unwrap() - 40.0).abs() < 1e-9);
        assert_eq!(converter.rate_table().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_bundle_uses_one_rate() {
        let source = ScriptedSource::new();
        source.push_rates(Ok(table()));
        let converter = converter(source);
        converter.ensure_rates_loaded().await.unwrap();

        let converted = converter
            .convert_values(
                ValueBundle {
                    price: 20000.0,
                    cost: 2010.0,
                    fee: 10.0,
                },
                "EUR",
                "PLN",
            )
            .unwrap();
        assert_eq!(
            converted,
            ConvertedValues {
                price: 80000.0,
                cost: 8040.0,
                fee: 40.0,
                rate: 4.0
            }
        );
    }

    #[tokio::test]
    async fn test_failed_load_leaves_rates_unknown() {
        let source = ScriptedSource::new();
        source.push_rates(Err(FetchError::MalformedResponse("bad".into())));
        let converter = converter(source);

        assert!(converter.ensure_rates_loaded().await.is_err());
        assert!(converter.convert(1.0, "EUR", "PLN").is_err());
    }
}
