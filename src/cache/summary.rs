use crate::core::ledger::ValidityKey;
use crate::core::valuation::PortfolioSummary;
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub type ComputeFn = Arc<dyn Fn() -> Result<PortfolioSummary> + Send + Sync>;
pub type LedgerInfoFn = Arc<dyn Fn() -> ValidityKey + Send + Sync>;

#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<T> {
    pub value: T,
    pub computed_at: DateTime<Utc>,
    pub validity_key: ValidityKey,
    pub invalidated: bool,
}

impl<T> CacheEntry<T> {
    pub fn is_valid_for(&self, key: &ValidityKey) -> bool {
        !self.invalidated && self.validity_key == *key
    }
}

/// The last computed portfolio summary.
///
/// An entry is served while it is not invalidated and its validity key
/// matches the ledger's. `generation` is bumped by every invalidation so a
/// computation that overlaps one stores its result already invalidated.
#[derive(Default)]
pub struct SummaryCache {
    entry: RwLock<Option<CacheEntry<PortfolioSummary>>>,
    compute_lock: Mutex<()>,
    generation: AtomicU64,
    recompute: Notify,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl SummaryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lookup(&self, key: &ValidityKey) -> Option<PortfolioSummary> {
        self.entry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .filter(|entry| entry.is_valid_for(key))
            .map(|entry| entry.value.clone())
    }

    pub fn get_summary<F>(
        &self,
        compute_fn: F,
        force_fresh: bool,
        ledger_count: usize,
        ledger_latest: Option<DateTime<Utc>>,
    ) -> Result<PortfolioSummary>
    where
        F: FnOnce() -> Result<PortfolioSummary>,
    {
        let key = ValidityKey {
            count: ledger_count,
            latest: ledger_latest,
        };
        if !force_fresh && let Some(value) = self.lookup(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!("Summary cache HIT");
            return Ok(value);
        }

        let _guard = self
            .compute_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !force_fresh && let Some(value) = self.lookup(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!("Summary cache HIT after waiting for a computation");
            return Ok(value);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        debug!(force_fresh, "Summary cache MISS");
        let generation = self.generation.load(Ordering::SeqCst);
        let value = compute_fn()?;
        self.store(value.clone(), key, generation);
        Ok(value)
    }

    /// Stores a value computed from the state at `generation`. The
    /// generation is compared under the entry lock, which every
    /// invalidation also holds while bumping it.
    fn store(&self, value: PortfolioSummary, key: ValidityKey, generation: u64) {
        let mut entry = self.entry.write().unwrap_or_else(PoisonError::into_inner);
        let invalidated = self.generation.load(Ordering::SeqCst) != generation;
        if invalidated {
            debug!("Summary invalidated during computation");
        }
        *entry = Some(CacheEntry {
            value,
            computed_at: Utc::now(),
            validity_key: key,
            invalidated,
        });
        debug!("Summary cache PUT");
    }

    /// Marks the entry stale and wakes the background recompute. Does not
    /// compute anything itself.
    pub fn invalidate_cache(&self) {
        {
            let mut entry = self.entry.write().unwrap_or_else(PoisonError::into_inner);
            self.generation.fetch_add(1, Ordering::SeqCst);
            if let Some(entry) = entry.as_mut() {
                entry.invalidated = true;
            }
        }
        self.recompute.notify_one();
        debug!("Summary cache invalidated");
    }

    pub fn clear_cache(&self) {
        let mut entry = self.entry.write().unwrap_or_else(PoisonError::into_inner);
        self.generation.fetch_add(1, Ordering::SeqCst);
        *entry = None;
        info!("Summary cache cleared");
    }

    pub fn peek(&self) -> Option<CacheEntry<PortfolioSummary>> {
        self.entry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// `(hits, misses)` since creation.
    pub fn stats(&self) -> (u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }

    /// Recomputes every `interval`, and early whenever the cache is
    /// invalidated, until `shutdown` is notified. A timer tick always
    /// recomputes so that price moves reach the summary; an invalidation
    /// tick goes through the normal validity check.
    pub fn schedule_updates(
        self: &Arc<Self>,
        compute_fn: ComputeFn,
        ledger_info_fn: LedgerInfoFn,
        interval: Duration,
        shutdown: Arc<Notify>,
    ) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            info!("Summary recompute scheduled every {:?}", interval);
            loop {
                let forced = tokio::select! {
                    _ = shutdown.notified() => break,
                    _ = tokio::time::sleep(interval) => true,
                    _ = cache.recompute.notified() => false,
                };

                let task_cache = Arc::clone(&cache);
                let compute = Arc::clone(&compute_fn);
                let ledger_info = Arc::clone(&ledger_info_fn);
                let outcome = tokio::task::spawn_blocking(move || {
                    let key = ledger_info();
                    task_cache.get_summary(|| compute(), forced, key.count, key.latest)
                })
                .await;
                match outcome {
                    Ok(Ok(_)) => debug!(forced, "Background summary recompute done"),
                    Ok(Err(e)) => warn!("Background summary recompute failed: {e:#}"),
                    Err(e) => error!("Background summary recompute panicked: {e}"),
                }
            }
            info!("Summary recompute stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ledger::fixtures::day;
    use anyhow::anyhow;
    use std::sync::atomic::AtomicUsize;

    fn summary(value: f64) -> PortfolioSummary {
        PortfolioSummary {
            has_transactions: true,
            current_value_main: value,
            ..PortfolioSummary::degraded("USD", "EUR")
        }
    }

    fn counting(calls: &Arc<AtomicUsize>, value: f64) -> impl FnOnce() -> Result<PortfolioSummary> {
        let calls = Arc::clone(calls);
        move || {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(summary(value))
        }
    }

    #[test]
    fn test_hit_until_key_changes() {
        let cache = SummaryCache::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let first = cache
            .get_summary(counting(&calls, 1.0), false, 1, Some(day(1)))
            .unwrap();
        let second = cache
            .get_summary(counting(&calls, 2.0), false, 1, Some(day(1)))
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            cache.peek().unwrap().validity_key,
            ValidityKey {
                count: 1,
                latest: Some(day(1))
            }
        );

        let third = cache
            .get_summary(counting(&calls, 3.0), false, 2, Some(day(1)))
            .unwrap();
        assert_eq!(third.current_value_main, 3.0);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.peek().unwrap().validity_key.count, 2);

        cache
            .get_summary(counting(&calls, 4.0), false, 2, Some(day(2)))
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(cache.stats(), (1, 3));
    }

    #[test]
    fn test_force_fresh_always_recomputes() {
        let cache = SummaryCache::new();
        let calls = Arc::new(AtomicUsize::new(0));
        cache.get_summary(counting(&calls, 1.0), false, 0, None).unwrap();
        let fresh = cache.get_summary(counting(&calls, 2.0), true, 0, None).unwrap();
        assert_eq!(fresh.current_value_main, 2.0);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_invalidate_twice_same_as_once() {
        let cache = SummaryCache::new();
        let calls = Arc::new(AtomicUsize::new(0));
        cache.get_summary(counting(&calls, 1.0), false, 0, None).unwrap();

        cache.invalidate_cache();
        let once = cache.peek().unwrap();
        cache.invalidate_cache();
        let twice = cache.peek().unwrap();
        assert!(once.invalidated);
        assert_eq!(once, twice);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        cache.get_summary(counting(&calls, 2.0), false, 0, None).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(!cache.peek().unwrap().invalidated);

        cache.get_summary(counting(&calls, 3.0), false, 0, None).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_invalidation_during_compute_is_kept() {
        let cache = SummaryCache::new();
        let value = cache
            .get_summary(
                || {
                    cache.invalidate_cache();
                    Ok(summary(1.0))
                },
                false,
                0,
                None,
            )
            .unwrap();
        assert_eq!(value.current_value_main, 1.0);
        assert!(cache.peek().unwrap().invalidated);
    }

    #[test]
    fn test_invalidation_after_compute_before_store_is_kept() {
        let cache = SummaryCache::new();
        cache.get_summary(|| Ok(summary(1.0)), false, 0, None).unwrap();

        // A computation started before the invalidation finishes after it
        let started_at = cache.generation.load(Ordering::SeqCst);
        cache.invalidate_cache();
        cache.store(summary(2.0), ValidityKey { count: 0, latest: None }, started_at);

        let entry = cache.peek().unwrap();
        assert_eq!(entry.value.current_value_main, 2.0);
        assert!(entry.invalidated);

        let calls = Arc::new(AtomicUsize::new(0));
        let fresh = cache.get_summary(counting(&calls, 3.0), false, 0, None).unwrap();
        assert_eq!(fresh.current_value_main, 3.0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_clear_during_compute_stores_invalidated_entry() {
        let cache = SummaryCache::new();
        let started_at = cache.generation.load(Ordering::SeqCst);
        cache.clear_cache();
        cache.store(summary(1.0), ValidityKey { count: 0, latest: None }, started_at);
        assert!(cache.peek().unwrap().invalidated);
    }

    #[test]
    fn test_compute_error_propagates_and_keeps_old_entry() {
        let cache = SummaryCache::new();
        cache.get_summary(|| Ok(summary(1.0)), false, 0, None).unwrap();

        let err = cache
            .get_summary(|| Err(anyhow!("boom")), true, 0, None)
            .unwrap_err();
        assert_eq!(err.to_string(), "boom");
        assert_eq!(cache.peek().unwrap().value.current_value_main, 1.0);
    }

    #[test]
    fn test_clear_cache_drops_entry() {
        let cache = SummaryCache::new();
        cache.get_summary(|| Ok(summary(1.0)), false, 0, None).unwrap();
        cache.clear_cache();
        assert!(cache.peek().is_none());
    }

    #[tokio::test]
    async fn test_background_task_recomputes_on_invalidation() {
        let cache = Arc::new(SummaryCache::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let compute: ComputeFn = Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(summary(1.0))
        });
        let ledger_info: LedgerInfoFn = Arc::new(|| ValidityKey {
            count: 0,
            latest: None,
        });
        let shutdown = Arc::new(Notify::new());
        let handle = cache.schedule_updates(
            compute,
            ledger_info,
            Duration::from_secs(3600),
            Arc::clone(&shutdown),
        );

        cache.invalidate_cache();
        for _ in 0..100 {
            if calls.load(Ordering::SeqCst) > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!cache.peek().unwrap().invalidated);

        shutdown.notify_one();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_background_task_survives_failures() {
        let cache = Arc::new(SummaryCache::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let compute: ComputeFn = Arc::new(move || {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("first recompute panics");
            }
            Err(anyhow!("later recomputes fail"))
        });
        let ledger_info: LedgerInfoFn = Arc::new(|| ValidityKey {
            count: 0,
            latest: None,
        });
        let shutdown = Arc::new(Notify::new());
        let handle = cache.schedule_updates(
            compute,
            ledger_info,
            Duration::from_millis(10),
            Arc::clone(&shutdown),
        );

        for _ in 0..200 {
            if calls.load(Ordering::SeqCst) >= 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(calls.load(Ordering::SeqCst) >= 3);
        assert!(!handle.is_finished());

        shutdown.notify_one();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
