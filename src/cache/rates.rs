use crate::core::error::{ConversionError, FetchError};
use crate::core::ledger::Ledger;
use crate::core::market::{MarketDataSource, MarketState, PriceQuote, PriceSnapshot};
use crate::core::rates::RateTable;
use crate::store::{SnapshotStore, StoredMarket};
use std::collections::BTreeSet;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Latest known BTC price and fiat rates.
///
/// Reads never touch the network: they clone the current `Arc<MarketState>`
/// and work on that. Refreshes build a new state and swap the pointer, so a
/// reader sees either all of a refresh or none of it. Refreshes are
/// serialised by `refresh_guard`; a failed fetch leaves the state untouched.
pub struct RateCache {
    source: Arc<dyn MarketDataSource>,
    ledger: Arc<dyn Ledger>,
    store: Arc<dyn SnapshotStore>,
    pivot: String,
    stale_after: Duration,
    tracked: RwLock<BTreeSet<String>>,
    state: RwLock<Arc<MarketState>>,
    refresh_guard: Mutex<()>,
}

impl RateCache {
    pub fn new(
        source: Arc<dyn MarketDataSource>,
        ledger: Arc<dyn Ledger>,
        store: Arc<dyn SnapshotStore>,
        pivot: &str,
        stale_after: Duration,
    ) -> Self {
        let restored = match store.load() {
            Ok(Some(stored)) => {
                info!("Restored last known market data, serving it as stale");
                MarketState::from(stored)
            }
            Ok(None) => MarketState::default(),
            Err(e) => {
                warn!(error = %e, "Failed to restore market data");
                MarketState::default()
            }
        };
        RateCache {
            source,
            ledger,
            store,
            pivot: pivot.to_ascii_uppercase(),
            stale_after,
            tracked: RwLock::new(BTreeSet::new()),
            state: RwLock::new(Arc::new(restored)),
            refresh_guard: Mutex::new(()),
        }
    }

    /// The state every read in one computation should use.
    pub fn state(&self) -> Arc<MarketState> {
        Arc::clone(&self.state.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn pivot(&self) -> &str {
        &self.pivot
    }

    pub fn stale_after(&self) -> Duration {
        self.stale_after
    }

    pub fn quote(&self, currency: &str) -> Result<PriceQuote, ConversionError> {
        self.state()
            .quote(currency, self.stale_after, || self.ledger.latest_transaction())
    }

    /// Price of 1 BTC in `currency` from whatever is held, falling back to
    /// the last transaction price and then to 0.
    pub fn current_price(&self, currency: &str) -> Result<f64, ConversionError> {
        self.quote(currency).map(|quote| quote.price)
    }

    pub fn rate_table(&self) -> Option<Arc<RateTable>> {
        self.state().table.clone()
    }

    pub fn has_rates(&self) -> bool {
        self.state().table.is_some()
    }

    /// Time since the last successful fetch in this process. Restored data
    /// does not count.
    pub fn age(&self) -> Option<Duration> {
        self.state().last_success().map(|at| at.elapsed())
    }

    /// Adds `currency` to the rates requested on the next refresh. Returns
    /// true if it was not tracked before.
    pub fn track_currency(&self, currency: &str) -> bool {
        self.tracked
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(currency.to_ascii_uppercase())
    }

    /// Tracked currencies plus every currency the ledger and the held price
    /// snapshot mention.
    pub fn currencies_to_fetch(&self) -> Vec<String> {
        let mut currencies = self
            .tracked
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        currencies.extend(
            self.ledger
                .snapshot()
                .into_iter()
                .map(|t| t.currency.to_ascii_uppercase()),
        );
        if let Some(price) = &self.state().price {
            currencies.insert(price.currency_a.to_ascii_uppercase());
            currencies.insert(price.currency_b.to_ascii_uppercase());
        }
        currencies.into_iter().collect()
    }

    /// Fetches the price and the rates together. Each half is applied on its
    /// own success, in one swap when both succeed. Returns the price half;
    /// a rates failure is logged here.
    pub async fn refresh(&self) -> Result<PriceSnapshot, FetchError> {
        let _guard = self.refresh_guard.lock().await;
        let currencies = self.currencies_to_fetch();
        let (price, rates) = tokio::join!(
            self.source.fetch_btc_price(),
            self.source.fetch_fiat_rates(&self.pivot, &currencies)
        );

        let rates = match rates {
            Ok(table) => Some(table),
            Err(e) => {
                warn!(error = %e, "Fiat rate refresh failed, keeping previous rates");
                None
            }
        };
        let snapshot = price.as_ref().ok().cloned();
        if snapshot.is_some() || rates.is_some() {
            let now = Instant::now();
            self.apply(|state| {
                if let Some(snapshot) = snapshot {
                    state.price = Some(snapshot);
                    state.price_fetched_at = Some(now);
                }
                if let Some(table) = rates {
                    state.table = Some(Arc::new(table));
                    state.rates_fetched_at = Some(now);
                }
            });
            self.persist().await;
        }
        if let Ok(snapshot) = &price {
            info!(
                "BTC price refreshed: {} {} / {} {}",
                snapshot.price_in_a, snapshot.currency_a, snapshot.price_in_b, snapshot.currency_b
            );
        }
        price
    }

    pub async fn refresh_price(&self) -> Result<PriceSnapshot, FetchError> {
        let _guard = self.refresh_guard.lock().await;
        let snapshot = self.source.fetch_btc_price().await?;
        let now = Instant::now();
        let applied = snapshot.clone();
        self.apply(|state| {
            state.price = Some(applied);
            state.price_fetched_at = Some(now);
        });
        self.persist().await;
        info!(
            "BTC price refreshed: {} {} / {} {}",
            snapshot.price_in_a, snapshot.currency_a, snapshot.price_in_b, snapshot.currency_b
        );
        Ok(snapshot)
    }

    pub async fn refresh_rates(&self) -> Result<Arc<RateTable>, FetchError> {
        let _guard = self.refresh_guard.lock().await;
        self.fetch_and_apply_rates().await
    }

    /// Fetches rates only if no table has ever been held. Returns whether a
    /// fetch happened.
    pub async fn load_rates_if_missing(&self) -> Result<bool, FetchError> {
        if self.has_rates() {
            return Ok(false);
        }
        let _guard = self.refresh_guard.lock().await;
        if self.has_rates() {
            debug!("Rates loaded while waiting for the refresh lock");
            return Ok(false);
        }
        self.fetch_and_apply_rates().await.map(|_| true)
    }

    async fn fetch_and_apply_rates(&self) -> Result<Arc<RateTable>, FetchError> {
        let currencies = self.currencies_to_fetch();
        let table = Arc::new(
            self.source
                .fetch_fiat_rates(&self.pivot, &currencies)
                .await?,
        );
        let now = Instant::now();
        let applied = Arc::clone(&table);
        self.apply(|state| {
            state.table = Some(applied);
            state.rates_fetched_at = Some(now);
        });
        self.persist().await;
        info!("Fiat rates refreshed: {} rates against {}", table.len(), self.pivot);
        Ok(table)
    }

    fn apply<F: FnOnce(&mut MarketState)>(&self, change: F) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = MarketState::clone(&state);
        change(&mut next);
        *state = Arc::new(next);
    }

    /// Saves the current state on the blocking pool; the disk store
    /// flushes synchronously.
    async fn persist(&self) {
        let stored = StoredMarket::from(self.state().as_ref());
        let store = Arc::clone(&self.store);
        match tokio::task::spawn_blocking(move || store.save(&stored)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Failed to persist market data"),
            Err(e) => warn!(error = %e, "Persisting market data panicked"),
        }
    }
}
