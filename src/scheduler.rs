//! Periodic background jobs keeping the caches warm.
use crate::cache::rates::RateCache;
use crate::cache::summary::{ComputeFn, LedgerInfoFn, SummaryCache};
use crate::core::config::RefreshConfig;
use anyhow::Result;
use futures::future::join_all;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SchedulerSettings {
    pub price_interval: Duration,
    pub rates_interval: Duration,
    pub summary_interval: Duration,
}

impl From<&RefreshConfig> for SchedulerSettings {
    fn from(config: &RefreshConfig) -> Self {
        SchedulerSettings {
            price_interval: config.price_interval(),
            rates_interval: config.rates_interval(),
            summary_interval: config.summary_interval(),
        }
    }
}

/// A running periodic task and the signal that stops it.
pub struct Job {
    name: &'static str,
    stop: Arc<Notify>,
    handle: JoinHandle<()>,
}

impl Job {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    async fn stop(self) {
        self.stop.notify_one();
        if let Err(e) = self.handle.await {
            error!("{} job ended abnormally: {e}", self.name);
        }
    }
}

/// Runs `tick` every `interval` until stopped. Each tick runs as its own
/// task, so an error or a panic is logged and the next tick still happens.
pub fn spawn_job<F, Fut>(name: &'static str, interval: Duration, tick: F) -> Job
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let stop = Arc::new(Notify::new());
    let signal = Arc::clone(&stop);
    let handle = tokio::spawn(async move {
        info!("{name} job scheduled every {:?}", interval);
        loop {
            tokio::select! {
                _ = signal.notified() => break,
                _ = sleep(interval) => {
                    match tokio::spawn(tick()).await {
                        Ok(Ok(())) => debug!("{name} tick done"),
                        Ok(Err(e)) => warn!("{name} tick failed: {e:#}"),
                        Err(e) => error!("{name} tick panicked: {e}"),
                    }
                }
            }
        }
        info!("{name} job stopped");
    });
    Job { name, stop, handle }
}

/// The price refresh, rate refresh and summary recompute jobs.
pub struct Scheduler {
    jobs: Vec<Job>,
}

impl Scheduler {
    pub fn start(
        rates: Arc<RateCache>,
        summary: Arc<SummaryCache>,
        compute_fn: ComputeFn,
        ledger_info_fn: LedgerInfoFn,
        settings: SchedulerSettings,
    ) -> Self {
        let price_cache = Arc::clone(&rates);
        let price_job = spawn_job("price_refresh", settings.price_interval, move || {
            let rates = Arc::clone(&price_cache);
            async move {
                rates.refresh_price().await?;
                Ok(())
            }
        });

        let rates_job = spawn_job("rates_refresh", settings.rates_interval, move || {
            let rates = Arc::clone(&rates);
            async move {
                rates.refresh_rates().await?;
                Ok(())
            }
        });

        let stop = Arc::new(Notify::new());
        let handle = summary.schedule_updates(
            compute_fn,
            ledger_info_fn,
            settings.summary_interval,
            Arc::clone(&stop),
        );
        let summary_job = Job {
            name: "summary_recompute",
            stop,
            handle,
        };

        Scheduler {
            jobs: vec![price_job, rates_job, summary_job],
        }
    }

    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    /// Stops every job and waits for in-flight ticks to finish.
    pub async fn shutdown(self) {
        info!("Stopping {} background jobs", self.jobs.len());
        join_all(self.jobs.into_iter().map(Job::stop)).await;
    }
}
