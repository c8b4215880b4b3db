//! The transaction ledger collaborator.
//!
//! The valuation caches only ever read the ledger. [`MemoryLedger`] is the
//! in-process implementation used by the CLI and tests; it notifies
//! subscribers synchronously after every mutation so dependent caches can be
//! invalidated before the mutating call returns.
use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};
use std::{fmt, fs};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Buy,
    Sell,
}

/// A single BTC buy or sell. `price` is per BTC and `fee` is absolute, both
/// in `currency`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub kind: TransactionKind,
    pub amount_btc: f64,
    pub price: f64,
    #[serde(default)]
    pub fee: f64,
    pub currency: String,
    pub date: DateTime<Utc>,
}

impl Transaction {
    /// Total fiat spent (or received, for a sell) including the fee.
    pub fn cost(&self) -> f64 {
        self.amount_btc * self.price + self.fee
    }
}

/// The cheap `(count, latest timestamp)` fingerprint of the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValidityKey {
    pub count: usize,
    pub latest: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerChange {
    Added,
    Updated,
    Removed(usize),
    Imported(usize),
    Cleared,
}

impl fmt::Display for LedgerChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LedgerChange::Added => write!(f, "added"),
            LedgerChange::Updated => write!(f, "updated"),
            LedgerChange::Removed(n) => write!(f, "removed {n}"),
            LedgerChange::Imported(n) => write!(f, "imported {n}"),
            LedgerChange::Cleared => write!(f, "cleared"),
        }
    }
}

pub type LedgerListener = Arc<dyn Fn(LedgerChange) + Send + Sync>;

pub trait Ledger: Send + Sync {
    /// All transactions, ordered by date (oldest first).
    fn snapshot(&self) -> Vec<Transaction>;

    fn count(&self) -> usize;

    fn latest_timestamp(&self) -> Option<DateTime<Utc>>;

    fn latest_transaction(&self) -> Option<Transaction> {
        self.snapshot().pop()
    }

    fn validity_key(&self) -> ValidityKey {
        ValidityKey {
            count: self.count(),
            latest: self.latest_timestamp(),
        }
    }

    /// Registers a callback run after every mutation.
    fn subscribe(&self, listener: LedgerListener);
}

#[derive(Default)]
pub struct MemoryLedger {
    transactions: RwLock<Vec<Transaction>>,
    listeners: RwLock<Vec<LedgerListener>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_transactions(transactions: Vec<Transaction>) -> Self {
        let ledger = Self::new();
        ledger.insert_sorted(transactions);
        ledger
    }

    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read ledger file: {}", path.as_ref().display()))?;
        let transactions: Vec<Transaction> = serde_yaml::from_str(&content).with_context(|| {
            format!("Failed to parse ledger file: {}", path.as_ref().display())
        })?;
        debug!("Loaded {} transactions from ledger", transactions.len());
        Ok(Self::with_transactions(transactions))
    }

    pub fn save_to_path<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_yaml::to_string(&self.snapshot())?;
        fs::write(path.as_ref(), content)
            .with_context(|| format!("Failed to write ledger file: {}", path.as_ref().display()))
    }

    pub fn add(&self, transaction: Transaction) -> Result<()> {
        {
            let mut transactions = self.write();
            if transactions.iter().any(|t| t.id == transaction.id) {
                bail!("Transaction {} already exists", transaction.id);
            }
            let index = transactions.partition_point(|t| t.date <= transaction.date);
            transactions.insert(index, transaction);
        }
        self.notify(LedgerChange::Added);
        Ok(())
    }

    pub fn update(&self, transaction: Transaction) -> Result<()> {
        {
            let mut transactions = self.write();
            let Some(index) = transactions.iter().position(|t| t.id == transaction.id) else {
                bail!("Transaction {} not found", transaction.id);
            };
            transactions.remove(index);
            let index = transactions.partition_point(|t| t.date <= transaction.date);
            transactions.insert(index, transaction);
        }
        self.notify(LedgerChange::Updated);
        Ok(())
    }

    pub fn remove(&self, id: &str) -> bool {
        self.remove_many(&[id]) == 1
    }

    pub fn remove_many(&self, ids: &[&str]) -> usize {
        let removed = {
            let mut transactions = self.write();
            let before = transactions.len();
            transactions.retain(|t| !ids.contains(&t.id.as_str()));
            before - transactions.len()
        };
        if removed > 0 {
            self.notify(LedgerChange::Removed(removed));
        }
        removed
    }

    /// Appends a batch, skipping ids already present. Returns how many were
    /// added.
    pub fn import(&self, batch: Vec<Transaction>) -> usize {
        let fresh: Vec<_> = {
            let transactions = self.read();
            batch
                .into_iter()
                .filter(|t| !transactions.iter().any(|existing| existing.id == t.id))
                .collect()
        };
        let imported = fresh.len();
        if imported > 0 {
            self.insert_sorted(fresh);
            self.notify(LedgerChange::Imported(imported));
        }
        imported
    }

    pub fn clear(&self) {
        self.write().clear();
        self.notify(LedgerChange::Cleared);
    }

    fn insert_sorted(&self, batch: Vec<Transaction>) {
        let mut transactions = self.write();
        transactions.extend(batch);
        transactions.sort_by_key(|t| t.date);
    }

    fn notify(&self, change: LedgerChange) {
        debug!("Ledger {change}");
        let listeners = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for listener in listeners {
            listener(change);
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<Transaction>> {
        self.transactions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Vec<Transaction>> {
        self.transactions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Ledger for MemoryLedger {
    fn snapshot(&self) -> Vec<Transaction> {
        self.read().clone()
    }

    fn count(&self) -> usize {
        self.read().len()
    }

    fn latest_timestamp(&self) -> Option<DateTime<Utc>> {
        self.read().last().map(|t| t.date)
    }

    fn latest_transaction(&self) -> Option<Transaction> {
        self.read().last().cloned()
    }

    fn subscribe(&self, listener: LedgerListener) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }
}
