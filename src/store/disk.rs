use super::{SnapshotStore, StoredMarket};
use anyhow::{Context, Result};
use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle, PersistMode};
use std::path::Path;
use tracing::debug;

const PARTITION: &str = "market";
const KEY: &str = "last_good";

/// Stores the snapshot as JSON in a `fjall` partition.
pub struct DiskStore {
    keyspace: Keyspace,
    partition: PartitionHandle,
}

impl DiskStore {
    pub fn open(path: &Path) -> Result<Self> {
        std::fs::create_dir_all(path)
            .with_context(|| format!("Failed to create cache directory: {}", path.display()))?;
        let keyspace = Config::new(path)
            .open()
            .with_context(|| format!("Failed to open keyspace at {}", path.display()))?;
        let partition = keyspace
            .open_partition(PARTITION, PartitionCreateOptions::default())
            .context("Failed to open market partition")?;
        Ok(Self {
            keyspace,
            partition,
        })
    }
}

impl SnapshotStore for DiskStore {
    fn load(&self) -> Result<Option<StoredMarket>> {
        let Some(bytes) = self.partition.get(KEY)? else {
            debug!("Snapshot MISS");
            return Ok(None);
        };
        let market = serde_json::from_slice(&bytes).context("Failed to decode stored snapshot")?;
        debug!("Snapshot HIT");
        Ok(Some(market))
    }

    fn save(&self, market: &StoredMarket) -> Result<()> {
        let bytes = serde_json::to_vec(market)?;
        self.partition.insert(KEY, bytes)?;
        self.keyspace.persist(PersistMode::Buffer)?;
        debug!("Snapshot PUT");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::market::PriceSnapshot;
    use crate::core::rates::RateTable;
    use chrono::Utc;
    use tempfile::TempDir;

    #[test]
    fn test_snapshot_survives_reopen() -> Result<()> {
        let dir = TempDir::new()?;
        let market = StoredMarket {
            price: Some(PriceSnapshot {
                currency_a: "USD".to_string(),
                price_in_a: 30000.0,
                currency_b: "EUR".to_string(),
                price_in_b: 27000.0,
                captured_at: Utc::now(),
            }),
            table: Some(RateTable::new("EUR", Utc::now()).with_rate("EUR", "USD", 1.1)),
        };

        {
            let store = DiskStore::open(dir.path())?;
            assert!(store.load()?.is_none());
            store.save(&market)?;
        }

        let reopened = DiskStore::open(dir.path())?;
        assert_eq!(reopened.load()?, Some(market));
        Ok(())
    }
}
