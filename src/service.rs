//! Composition root for the valuation caches.
use crate::cache::converter::CurrencyConverter;
use crate::cache::rates::RateCache;
use crate::cache::summary::{ComputeFn, LedgerInfoFn, SummaryCache};
use crate::core::error::ConversionError;
use crate::core::ledger::{Ledger, LedgerChange};
use crate::core::market::PriceQuote;
use crate::core::valuation::{PortfolioSummary, compute_summary};
use crate::scheduler::{Scheduler, SchedulerSettings};
use anyhow::Result;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrencySettings {
    pub main: String,
    pub secondary: String,
}

impl CurrencySettings {
    pub fn new(main: &str, secondary: &str) -> Self {
        Self {
            main: main.to_ascii_uppercase(),
            secondary: secondary.to_ascii_uppercase(),
        }
    }
}

/// Owns the caches and answers valuation reads.
///
/// Every ledger mutation invalidates the summary through a ledger
/// subscription registered in [`ValuationService::new`].
pub struct ValuationService {
    ledger: Arc<dyn Ledger>,
    rates: Arc<RateCache>,
    converter: CurrencyConverter,
    summary: Arc<SummaryCache>,
    settings: Arc<RwLock<CurrencySettings>>,
}

impl ValuationService {
    pub fn new(ledger: Arc<dyn Ledger>, rates: Arc<RateCache>, settings: CurrencySettings) -> Self {
        let summary = Arc::new(SummaryCache::new());
        let listener_cache = Arc::clone(&summary);
        ledger.subscribe(Arc::new(move |change: LedgerChange| {
            debug!("Ledger {change}, invalidating summary");
            listener_cache.invalidate_cache();
        }));

        rates.track_currency(&settings.main);
        rates.track_currency(&settings.secondary);

        ValuationService {
            converter: CurrencyConverter::new(Arc::clone(&rates)),
            ledger,
            rates,
            summary,
            settings: Arc::new(RwLock::new(settings)),
        }
    }

    pub fn settings(&self) -> CurrencySettings {
        self.settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn rates(&self) -> &Arc<RateCache> {
        &self.rates
    }

    pub fn converter(&self) -> &CurrencyConverter {
        &self.converter
    }

    pub fn summary_cache(&self) -> &Arc<SummaryCache> {
        &self.summary
    }

    /// The computation the summary cache runs on a miss. It reads one
    /// market state and one ledger snapshot.
    pub fn compute_fn(&self) -> ComputeFn {
        let ledger = Arc::clone(&self.ledger);
        let rates = Arc::clone(&self.rates);
        let settings = Arc::clone(&self.settings);
        Arc::new(move || {
            let settings = settings
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();
            let transactions = ledger.snapshot();
            let market = rates.state();
            let summary = compute_summary(
                &transactions,
                &market,
                &settings.main,
                &settings.secondary,
                rates.stale_after(),
            )?;
            Ok(summary)
        })
    }

    pub fn ledger_info_fn(&self) -> LedgerInfoFn {
        let ledger = Arc::clone(&self.ledger);
        Arc::new(move || ledger.validity_key())
    }

    /// The summary, or the error that prevented computing it. A
    /// [`ConversionError`] can be recovered with `downcast_ref`.
    pub fn try_summary(&self, force_fresh: bool) -> Result<PortfolioSummary> {
        let key = self.ledger.validity_key();
        let compute = self.compute_fn();
        self.summary
            .get_summary(|| compute(), force_fresh, key.count, key.latest)
    }

    /// The summary, degraded to zeros if it cannot be computed.
    pub fn summary(&self, force_fresh: bool) -> PortfolioSummary {
        match self.try_summary(force_fresh) {
            Ok(summary) => summary,
            Err(e) => {
                if let Some(conversion) = e.downcast_ref::<ConversionError>() {
                    warn!("Summary unavailable, check enabled currencies: {conversion}");
                } else {
                    error!("Summary computation failed: {e:#}");
                }
                let settings = self.settings();
                PortfolioSummary::degraded(&settings.main, &settings.secondary)
            }
        }
    }

    pub fn current_price(&self, currency: &str) -> Result<f64, ConversionError> {
        self.rates.current_price(currency)
    }

    pub fn quote(&self, currency: &str) -> Result<PriceQuote, ConversionError> {
        self.rates.quote(currency)
    }

    pub fn invalidate(&self) {
        self.summary.invalidate_cache();
    }

    pub fn clear_cache(&self) {
        self.summary.clear_cache();
    }

    /// Switches the display currencies. The summary is invalidated before
    /// this returns; rates for the new currencies load in the background.
    pub fn set_currencies(&self, main: &str, secondary: &str) -> JoinHandle<()> {
        let next = CurrencySettings::new(main, secondary);
        info!("Currencies set to {} / {}", next.main, next.secondary);
        self.rates.track_currency(&next.main);
        self.rates.track_currency(&next.secondary);
        *self
            .settings
            .write()
            .unwrap_or_else(PoisonError::into_inner) = next;
        self.summary.invalidate_cache();

        let rates = Arc::clone(&self.rates);
        tokio::spawn(async move {
            if let Err(e) = rates.refresh_rates().await {
                warn!(error = %e, "Rate refresh after currency change failed");
            }
        })
    }

    /// One price and rate fetch. Failures leave whatever fallback data is
    /// available.
    pub async fn warm_up(&self) {
        if let Err(e) = self.rates.refresh().await {
            warn!(error = %e, "Initial price fetch failed, serving fallback prices");
        }
        if let Err(e) = self.converter.ensure_rates_loaded().await {
            warn!(error = %e, "No fiat rates available");
        }
    }

    /// Populates the caches before the first read: [`Self::warm_up`], then a
    /// forced summary.
    pub async fn initialize(&self) -> PortfolioSummary {
        self.warm_up().await;
        self.summary(true)
    }

    pub fn start_scheduler(&self, settings: SchedulerSettings) -> Scheduler {
        Scheduler::start(
            Arc::clone(&self.rates),
            Arc::clone(&self.summary),
            self.compute_fn(),
            self.ledger_info_fn(),
            settings,
        )
    }
}
