use crate::core::config::CoinGeckoProviderConfig;
use crate::core::error::FetchError;
use crate::core::market::{BtcPriceProvider, PriceSnapshot};
use crate::providers::util::{build_client, get_json};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, instrument};

/// BTC spot price from the CoinGecko `simple/price` endpoint.
pub struct CoinGeckoProvider {
    base_url: String,
    currencies: [String; 2],
    client: Client,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct SimplePriceResponse {
    bitcoin: Option<HashMap<String, serde_json::Value>>,
}

impl CoinGeckoProvider {
    pub fn new(config: &CoinGeckoProviderConfig, timeout: Duration) -> Result<Self, FetchError> {
        let [a, b] = &config.reference_currencies;
        Ok(CoinGeckoProvider {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            currencies: [a.to_ascii_uppercase(), b.to_ascii_uppercase()],
            client: build_client(timeout)?,
            timeout,
        })
    }

    fn url(&self) -> String {
        format!(
            "{}/api/v3/simple/price?ids=bitcoin&vs_currencies={},{}&include_last_updated_at=true",
            self.base_url,
            self.currencies[0].to_ascii_lowercase(),
            self.currencies[1].to_ascii_lowercase()
        )
    }
}

fn price_for(
    quotes: &HashMap<String, serde_json::Value>,
    currency: &str,
) -> Result<f64, FetchError> {
    let value = quotes
        .get(&currency.to_ascii_lowercase())
        .ok_or_else(|| FetchError::NoDataAvailable(format!("No BTC price in {currency}")))?;
    let price = value.as_f64().ok_or_else(|| {
        FetchError::MalformedResponse(format!("BTC price in {currency} is not a number: {value}"))
    })?;
    if !price.is_finite() || price <= 0.0 {
        return Err(FetchError::MalformedResponse(format!(
            "Unusable BTC price in {currency}: {price}"
        )));
    }
    Ok(price)
}

#[async_trait]
impl BtcPriceProvider for CoinGeckoProvider {
    #[instrument(name = "CoinGeckoPriceFetch", skip(self))]
    async fn fetch_btc_price(&self) -> Result<PriceSnapshot, FetchError> {
        let response: SimplePriceResponse = get_json(&self.client, &self.url(), self.timeout).await?;
        let quotes = response
            .bitcoin
            .ok_or_else(|| FetchError::NoDataAvailable("No bitcoin entry in response".to_string()))?;

        let [currency_a, currency_b] = &self.currencies;
        let price_in_a = price_for(&quotes, currency_a)?;
        let price_in_b = price_for(&quotes, currency_b)?;
        let captured_at = quotes
            .get("last_updated_at")
            .and_then(serde_json::Value::as_i64)
            .and_then(|ts| Utc.timestamp_opt(ts, 0).single())
            .unwrap_or_else(Utc::now);

        debug!("BTC at {price_in_a} {currency_a} / {price_in_b} {currency_b}");
        Ok(PriceSnapshot {
            currency_a: currency_a.clone(),
            price_in_a,
            currency_b: currency_b.clone(),
            price_in_b,
            captured_at,
        })
    }
}
