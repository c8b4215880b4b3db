pub mod coingecko;
pub mod frankfurter;
pub mod util;

use crate::core::config::AppConfig;
use crate::core::error::FetchError;
use crate::core::market::{BtcPriceProvider, FiatRateProvider, MarketDataSource, PriceSnapshot};
use crate::core::rates::RateTable;
use anyhow::Result;
use async_trait::async_trait;
use coingecko::CoinGeckoProvider;
use frankfurter::FrankfurterProvider;
use std::sync::Arc;

/// Joins a price feed and a fiat rate feed into one market data source.
pub struct CompositeMarketData {
    prices: Box<dyn BtcPriceProvider>,
    rates: Box<dyn FiatRateProvider>,
}

impl CompositeMarketData {
    pub fn new(prices: Box<dyn BtcPriceProvider>, rates: Box<dyn FiatRateProvider>) -> Self {
        Self { prices, rates }
    }
}

#[async_trait]
impl MarketDataSource for CompositeMarketData {
    async fn fetch_btc_price(&self) -> Result<PriceSnapshot, FetchError> {
        self.prices.fetch_btc_price().await
    }

    async fn fetch_fiat_rates(
        &self,
        pivot: &str,
        currencies: &[String],
    ) -> Result<RateTable, FetchError> {
        self.rates.fetch_fiat_rates(pivot, currencies).await
    }
}

pub fn build_market_data(config: &AppConfig) -> Result<Arc<dyn MarketDataSource>> {
    let timeout = config.refresh.fetch_timeout();
    let prices = CoinGeckoProvider::new(&config.providers.coingecko(), timeout)?;
    let rates = FrankfurterProvider::new(&config.providers.frankfurter(), timeout)?;
    Ok(Arc::new(CompositeMarketData::new(
        Box::new(prices),
        Box::new(rates),
    )))
}
