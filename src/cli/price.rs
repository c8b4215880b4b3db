use super::ui;
use crate::core::market::PriceSource;
use crate::service::ValuationService;
use anyhow::Result;

pub async fn run(service: &ValuationService, currency: &str) -> Result<()> {
    let currency = currency.to_ascii_uppercase();
    service.rates().track_currency(&currency);

    let spinner = ui::new_spinner("Fetching BTC price...");
    if let Err(e) = service.rates().refresh().await {
        tracing::warn!(error = %e, "Price refresh failed, showing last known price");
    }
    spinner.finish_and_clear();

    let quote = service.quote(&currency)?;
    let price = format!("{:.2} {}", quote.price, quote.currency);
    let source = match quote.source {
        PriceSource::Live => ui::style_text(&format!("({})", quote.source), ui::StyleType::Subtle),
        _ => ui::style_text(&format!("({})", quote.source), ui::StyleType::Warning),
    };
    println!(
        "1 BTC = {} {source}",
        ui::style_text(&price, ui::StyleType::TotalValue)
    );
    Ok(())
}
