pub mod cache;
pub mod cli;
pub mod core;
pub mod providers;
pub mod scheduler;
pub mod service;
pub mod store;

use crate::cache::rates::RateCache;
use crate::core::config::AppConfig;
use crate::core::ledger::{Ledger, MemoryLedger};
use crate::scheduler::SchedulerSettings;
use crate::service::{CurrencySettings, ValuationService};
use anyhow::Result;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub enum AppCommand {
    Summary { fresh: bool },
    Price { currency: String },
    Watch,
}

pub fn load_config(config_path: Option<&str>) -> Result<AppConfig> {
    match config_path {
        Some(path) => AppConfig::load_from_path(path),
        None => AppConfig::load(),
    }
}

pub async fn run_command(command: AppCommand, config_path: Option<&str>) -> Result<()> {
    info!("satfolio starting...");
    let config = load_config(config_path)?;
    debug!("Loaded config: {config:#?}");

    let service = build_service(&config)?;
    match command {
        AppCommand::Summary { fresh } => cli::summary::run(&service, fresh).await,
        AppCommand::Price { currency } => cli::price::run(&service, &currency).await,
        AppCommand::Watch => {
            cli::watch::run(&service, SchedulerSettings::from(&config.refresh)).await
        }
    }
}

/// Wires the ledger, providers, snapshot store and caches from `config`.
pub fn build_service(config: &AppConfig) -> Result<ValuationService> {
    let ledger_path = config.ledger_path()?;
    let ledger = if ledger_path.exists() {
        MemoryLedger::load_from_path(&ledger_path)?
    } else {
        warn!(
            "No ledger at {}, starting with an empty one",
            ledger_path.display()
        );
        MemoryLedger::new()
    };
    let ledger: Arc<dyn Ledger> = Arc::new(ledger);

    let coingecko = config.providers.coingecko();
    let rates = Arc::new(RateCache::new(
        providers::build_market_data(config)?,
        Arc::clone(&ledger),
        store::open_store(config),
        &config.providers.frankfurter().pivot_currency,
        config.refresh.stale_after(),
    ));
    for currency in &coingecko.reference_currencies {
        rates.track_currency(currency);
    }

    Ok(ValuationService::new(
        ledger,
        rates,
        CurrencySettings::new(&config.main_currency, &config.secondary_currency),
    ))
}
