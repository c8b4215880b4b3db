use super::{SnapshotStore, StoredMarket};
use anyhow::Result;
use std::sync::{PoisonError, RwLock};
use tracing::debug;

/// Keeps the snapshot for the lifetime of the process only.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Option<StoredMarket>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_market(market: StoredMarket) -> Self {
        Self {
            inner: RwLock::new(Some(market)),
        }
    }
}

impl SnapshotStore for MemoryStore {
    fn load(&self) -> Result<Option<StoredMarket>> {
        Ok(self
            .inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn save(&self, market: &StoredMarket) -> Result<()> {
        debug!("Snapshot PUT");
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = Some(market.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::rates::RateTable;
    use chrono::Utc;

    #[test]
    fn test_save_and_load() {
        let store = MemoryStore::new();
        assert!(store.load().unwrap().is_none());

        let market = StoredMarket {
            price: None,
            table: Some(RateTable::new("EUR", Utc::now()).with_rate("EUR", "USD", 1.1)),
        };
        store.save(&market).unwrap();
        assert_eq!(store.load().unwrap(), Some(market));
    }
}
