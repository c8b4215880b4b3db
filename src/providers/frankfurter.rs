use crate::core::config::FrankfurterProviderConfig;
use crate::core::error::FetchError;
use crate::core::market::FiatRateProvider;
use crate::core::rates::RateTable;
use crate::providers::util::{build_client, get_json};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// ECB reference rates from a Frankfurter instance.
pub struct FrankfurterProvider {
    base_url: String,
    client: Client,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct LatestResponse {
    base: String,
    date: Option<NaiveDate>,
    rates: HashMap<String, f64>,
}

impl FrankfurterProvider {
    pub fn new(config: &FrankfurterProviderConfig, timeout: Duration) -> Result<Self, FetchError> {
        Ok(FrankfurterProvider {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client: build_client(timeout)?,
            timeout,
        })
    }
}

#[async_trait]
impl FiatRateProvider for FrankfurterProvider {
    #[instrument(name = "FrankfurterRatesFetch", skip(self, currencies), fields(pivot = %pivot))]
    async fn fetch_fiat_rates(
        &self,
        pivot: &str,
        currencies: &[String],
    ) -> Result<RateTable, FetchError> {
        let pivot = pivot.to_ascii_uppercase();
        let mut symbols: Vec<String> = currencies
            .iter()
            .map(|c| c.to_ascii_uppercase())
            .filter(|c| *c != pivot)
            .collect();
        symbols.sort();
        symbols.dedup();

        let mut table = RateTable::new(&pivot, Utc::now());
        if symbols.is_empty() {
            return Ok(table);
        }

        let url = format!(
            "{}/latest?from={}&to={}",
            self.base_url,
            pivot,
            symbols.join(",")
        );
        let response: LatestResponse = get_json(&self.client, &url, self.timeout).await?;
        if !response.base.eq_ignore_ascii_case(&pivot) {
            return Err(FetchError::MalformedResponse(format!(
                "Asked for rates from {pivot}, got {}",
                response.base
            )));
        }
        if response.rates.is_empty() {
            return Err(FetchError::NoDataAvailable(format!("No rates from {pivot}")));
        }

        for (quote, rate) in &response.rates {
            table.insert(&pivot, quote, *rate);
        }
        for missing in symbols.iter().filter(|s| table.direct(&pivot, s).is_none()) {
            warn!("No {pivot}/{missing} rate in response");
        }
        debug!(
            "Loaded {} rates from {pivot} dated {:?}",
            table.len(),
            response.date
        );
        Ok(table)
    }
}
