use super::ui;
use crate::core::error::ConversionError;
use crate::core::market::PriceSource;
use crate::core::valuation::PortfolioSummary;
use crate::service::ValuationService;
use anyhow::{Result, bail};
use tracing::error;

impl PortfolioSummary {
    pub fn display_as_table(&self) -> String {
        let main = &self.main_currency;
        let secondary = &self.secondary_currency;

        let mut table = ui::new_styled_table();
        table.set_header(vec![
            ui::header_cell(""),
            ui::header_cell(main),
            ui::header_cell(secondary),
        ]);

        let rows = [
            ("BTC price", self.current_price_main, self.current_price_secondary),
            ("Cost basis", self.total_cost_main, self.total_cost_secondary),
            ("Average price", self.average_price_main, self.average_price_secondary),
            ("Value", self.current_value_main, self.current_value_secondary),
        ];
        for (label, in_main, in_secondary) in rows {
            table.add_row(vec![
                ui::label_cell(label),
                ui::amount_cell(in_main, 2),
                ui::amount_cell(in_secondary, 2),
            ]);
        }
        table.add_row(vec![
            ui::label_cell("P&L"),
            ui::pnl_cell(format!("{:.2}", self.pnl_main), self.pnl_main),
            ui::pnl_cell(format!("{:.2}", self.pnl_secondary), self.pnl_secondary),
        ]);
        table.add_row(vec![
            ui::label_cell("P&L %"),
            ui::pnl_cell(
                format!("{:.2}%", self.pnl_percentage_main),
                self.pnl_percentage_main,
            ),
            ui::pnl_cell(
                format!("{:.2}%", self.pnl_percentage_secondary),
                self.pnl_percentage_secondary,
            ),
        ]);

        let mut output = format!(
            "Holdings: {} BTC\n\n",
            ui::style_text(&format!("{:.8}", self.total_btc_held), ui::StyleType::Title)
        );
        output.push_str(&table.to_string());
        output.push_str(&format!(
            "\n\nValue ({}): {}",
            ui::style_text(main, ui::StyleType::TotalLabel),
            ui::style_text(
                &format!("{:.2}", self.current_value_main),
                ui::StyleType::TotalValue
            )
        ));
        output.push_str(&format!("\n{}", self.source_line()));
        output
    }

    fn source_line(&self) -> String {
        let captured = self
            .source_price_timestamp
            .map(|at| format!(" as of {}", at.format("%Y-%m-%d %H:%M UTC")))
            .unwrap_or_default();
        let line = format!("Price source: {}{captured}", self.price_source);
        match self.price_source {
            PriceSource::Live => ui::style_text(&line, ui::StyleType::Subtle),
            _ => ui::style_text(&line, ui::StyleType::Warning),
        }
    }
}

/// The summary to show. An unconvertible currency is an error the user has
/// to fix; any other failure shows the zeroed summary.
pub fn summary_for_display(service: &ValuationService, fresh: bool) -> Result<PortfolioSummary> {
    match service.try_summary(fresh) {
        Ok(summary) => Ok(summary),
        Err(e) => {
            if let Some(ConversionError::RateUnknown { from, to }) = e.downcast_ref::<ConversionError>() {
                bail!(
                    "Cannot value the ledger: no conversion rate for {from} -> {to}. \
                     Check the currencies of your transactions and settings"
                );
            }
            error!("Summary computation failed: {e:#}");
            let settings = service.settings();
            Ok(PortfolioSummary::degraded(&settings.main, &settings.secondary))
        }
    }
}

pub async fn run(service: &ValuationService, fresh: bool) -> Result<()> {
    let spinner = ui::new_spinner("Fetching market data...");
    service.warm_up().await;
    spinner.finish_and_clear();
    let summary = summary_for_display(service, fresh)?;

    if !summary.has_transactions {
        println!(
            "{}",
            ui::style_text("No transactions in the ledger", ui::StyleType::Subtle)
        );
    }
    println!("{}", summary.display_as_table());
    if !summary.reliable {
        println!(
            "{}",
            ui::style_text(
                "Valuation is approximate until live prices are available",
                ui::StyleType::Warning
            )
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::rates::RateCache;
    use crate::cache::testing::{ScriptedSource, snapshot, table};
    use crate::core::ledger::MemoryLedger;
    use crate::core::ledger::fixtures::{buy, day};
    use crate::service::CurrencySettings;
    use crate::store::memory::MemoryStore;
    use std::sync::Arc;
    use std::time::Duration;

    fn service_with(ledger: Arc<MemoryLedger>) -> ValuationService {
        let source = ScriptedSource::new();
        source.push_price(Ok(snapshot(30000.0, 24000.0)));
        source.push_rates(Ok(table()));
        let rates = Arc::new(RateCache::new(
            source,
            ledger.clone(),
            Arc::new(MemoryStore::new()),
            "EUR",
            Duration::from_secs(300),
        ));
        ValuationService::new(ledger, rates, CurrencySettings::new("USD", "EUR"))
    }

    #[tokio::test]
    async fn test_unconvertible_currency_is_reported() {
        let ledger = Arc::new(MemoryLedger::new());
        ledger.add(buy("1", 0.1, 3000000.0, "JPY", day(1))).unwrap();
        let service = service_with(ledger);

        let err = run(&service, false).await.unwrap_err();
        let message = err.to_string();
        assert!(message.contains("JPY -> USD"), "unexpected error: {message}");
        assert!(message.starts_with("Cannot value the ledger"));
    }

    #[tokio::test]
    async fn test_fresh_flag_controls_recompute() {
        let ledger = Arc::new(MemoryLedger::new());
        ledger.add(buy("1", 0.1, 20000.0, "USD", day(1))).unwrap();
        let service = service_with(ledger);

        run(&service, false).await.unwrap();
        assert_eq!(service.summary_cache().stats(), (0, 1));
        run(&service, false).await.unwrap();
        assert_eq!(service.summary_cache().stats(), (1, 1));
        run(&service, true).await.unwrap();
        assert_eq!(service.summary_cache().stats(), (1, 2));

        let summary = summary_for_display(&service, false).unwrap();
        assert!(summary.has_transactions);
        assert!((summary.current_value_main - 3000.0).abs() < 0.001);
    }

    #[test]
    fn test_table_shows_both_currencies() {
        let summary = PortfolioSummary {
            has_transactions: true,
            total_btc_held: 0.1,
            current_value_main: 3000.0,
            current_value_secondary: 2400.0,
            pnl_main: 1000.0,
            pnl_percentage_main: 50.0,
            price_source: PriceSource::Live,
            reliable: true,
            ..PortfolioSummary::degraded("USD", "EUR")
        };
        let output = console::strip_ansi_codes(&summary.display_as_table()).to_string();
        assert!(output.contains("0.10000000 BTC"));
        assert!(output.contains("USD"));
        assert!(output.contains("EUR"));
        assert!(output.contains("3000.00"));
        assert!(output.contains("2400.00"));
        assert!(output.contains("50.00%"));
        assert!(output.contains("Price source: live"));
    }
}
