use super::summary::summary_for_display;
use super::ui;
use crate::scheduler::SchedulerSettings;
use crate::service::ValuationService;
use anyhow::{Context, Result};
use tokio::time::sleep;
use tracing::info;

/// Prints the summary every summary interval while the background jobs keep
/// the caches fresh. Stops on Ctrl-C.
pub async fn run(service: &ValuationService, settings: SchedulerSettings) -> Result<()> {
    let spinner = ui::new_spinner("Fetching market data...");
    service.warm_up().await;
    spinner.finish_and_clear();
    println!("{}", summary_for_display(service, true)?.display_as_table());

    let scheduler = service.start_scheduler(settings);
    let outcome = loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                break signal.context("Failed to listen for Ctrl-C");
            }
            _ = sleep(settings.summary_interval) => {
                ui::print_separator();
                match summary_for_display(service, false) {
                    Ok(summary) => println!("{}", summary.display_as_table()),
                    Err(e) => println!("{}", ui::style_text(&e.to_string(), ui::StyleType::Warning)),
                }
            }
        }
    };

    info!("Shutting down");
    scheduler.shutdown().await;
    outcome
}
