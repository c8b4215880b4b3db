//! Persistence of the last good market state, used as a cold-start fallback.
pub mod disk;
pub mod memory;

use crate::core::config::AppConfig;
use crate::core::market::{MarketState, PriceSnapshot};
use crate::core::rates::RateTable;
use anyhow::Result;
use disk::DiskStore;
use memory::MemoryStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// The persistable part of a [`MarketState`]. Fetch instants are process
/// local, so anything restored from here is served as stale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMarket {
    pub price: Option<PriceSnapshot>,
    pub table: Option<RateTable>,
}

impl From<&MarketState> for StoredMarket {
    fn from(state: &MarketState) -> Self {
        Self {
            price: state.price.clone(),
            table: state.table.as_deref().cloned(),
        }
    }
}

impl From<StoredMarket> for MarketState {
    fn from(stored: StoredMarket) -> Self {
        MarketState {
            price: stored.price,
            table: stored.table.map(Arc::new),
            price_fetched_at: None,
            rates_fetched_at: None,
        }
    }
}

pub trait SnapshotStore: Send + Sync {
    fn load(&self) -> Result<Option<StoredMarket>>;

    fn save(&self, market: &StoredMarket) -> Result<()>;
}

/// Opens the on-disk store under the data directory, falling back to an
/// in-memory store when the directory cannot be used.
pub fn open_store(config: &AppConfig) -> Arc<dyn SnapshotStore> {
    let opened = config
        .default_data_path()
        .and_then(|path| DiskStore::open(&path.join("cache")));
    match opened {
        Ok(store) => {
            debug!("Using on-disk market snapshot store");
            Arc::new(store)
        }
        Err(e) => {
            warn!(error = %e, "Could not open snapshot store, cold starts will have no fallback");
            Arc::new(MemoryStore::new())
        }
    }
}
