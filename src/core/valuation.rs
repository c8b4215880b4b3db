//! Derives the portfolio valuation from a ledger snapshot and one market state.
use crate::core::error::ConversionError;
use crate::core::ledger::{Transaction, TransactionKind};
use crate::core::market::{MarketState, PriceSource};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Holdings, cost basis, value and P&L in the main and secondary currency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioSummary {
    pub main_currency: String,
    pub secondary_currency: String,
    pub has_transactions: bool,
    pub total_btc_held: f64,
    pub total_cost_main: f64,
    pub total_cost_secondary: f64,
    pub current_price_main: f64,
    pub current_price_secondary: f64,
    pub current_value_main: f64,
    pub current_value_secondary: f64,
    pub pnl_main: f64,
    pub pnl_secondary: f64,
    pub pnl_percentage_main: f64,
    pub pnl_percentage_secondary: f64,
    pub average_price_main: f64,
    pub average_price_secondary: f64,
    pub price_source: PriceSource,
    pub source_price_timestamp: Option<DateTime<Utc>>,
    /// False when the price had to come from a transaction or is missing.
    pub reliable: bool,
}

impl PortfolioSummary {
    /// The zeroed summary served when a computation fails.
    pub fn degraded(main_currency: &str, secondary_currency: &str) -> Self {
        Self {
            main_currency: main_currency.to_ascii_uppercase(),
            secondary_currency: secondary_currency.to_ascii_uppercase(),
            has_transactions: false,
            total_btc_held: 0.0,
            total_cost_main: 0.0,
            total_cost_secondary: 0.0,
            current_price_main: 0.0,
            current_price_secondary: 0.0,
            current_value_main: 0.0,
            current_value_secondary: 0.0,
            pnl_main: 0.0,
            pnl_secondary: 0.0,
            pnl_percentage_main: 0.0,
            pnl_percentage_secondary: 0.0,
            average_price_main: 0.0,
            average_price_secondary: 0.0,
            price_source: PriceSource::Unavailable,
            source_price_timestamp: None,
            reliable: false,
        }
    }
}

/// `numerator / denominator`, or 0 when the denominator is 0.
fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}

fn convert(
    market: &MarketState,
    value: f64,
    from: &str,
    to: &str,
) -> Result<f64, ConversionError> {
    market
        .try_convert(value, from, to)?
        .ok_or_else(|| ConversionError::rate_unknown(from, to))
}

/// Computes the summary over `transactions` (oldest first).
///
/// Cost basis uses the average-cost method: a sell removes the sold fraction
/// of the running cost, so the remaining coins keep their average price. All
/// rates come from the single `market` passed in.
pub fn compute_summary(
    transactions: &[Transaction],
    market: &MarketState,
    main_currency: &str,
    secondary_currency: &str,
    stale_after: Duration,
) -> Result<PortfolioSummary, ConversionError> {
    let mut held = 0.0;
    let mut cost_main = 0.0;
    let mut cost_secondary = 0.0;

    for transaction in transactions {
        match transaction.kind {
            TransactionKind::Buy => {
                let cost = transaction.cost();
                held += transaction.amount_btc;
                cost_main += convert(market, cost, &transaction.currency, main_currency)?;
                cost_secondary +=
                    convert(market, cost, &transaction.currency, secondary_currency)?;
            }
            TransactionKind::Sell => {
                let sold_fraction = ratio(transaction.amount_btc, held).min(1.0);
                cost_main -= cost_main * sold_fraction;
                cost_secondary -= cost_secondary * sold_fraction;
                held = (held - transaction.amount_btc).max(0.0);
            }
        }
    }

    let last_transaction = || transactions.last().cloned();
    let main_quote = market.quote(main_currency, stale_after, last_transaction)?;
    let secondary_quote = market.quote(secondary_currency, stale_after, last_transaction)?;
    debug!(
        "Valuing {held} BTC at {} {} ({})",
        main_quote.price, main_quote.currency, main_quote.source
    );

    let value_main = held * main_quote.price;
    let value_secondary = held * secondary_quote.price;
    let pnl_main = value_main - cost_main;
    let pnl_secondary = value_secondary - cost_secondary;

    Ok(PortfolioSummary {
        main_currency: main_quote.currency.clone(),
        secondary_currency: secondary_quote.currency.clone(),
        has_transactions: !transactions.is_empty(),
        total_btc_held: held,
        total_cost_main: cost_main,
        total_cost_secondary: cost_secondary,
        current_price_main: main_quote.price,
        current_price_secondary: secondary_quote.price,
        current_value_main: value_main,
        current_value_secondary: value_secondary,
        pnl_main,
        pnl_secondary,
        pnl_percentage_main: ratio(pnl_main, cost_main) * 100.0,
        pnl_percentage_secondary: ratio(pnl_secondary, cost_secondary) * 100.0,
        average_price_main: ratio(cost_main, held),
        average_price_secondary: ratio(cost_secondary, held),
        price_source: main_quote.source,
        source_price_timestamp: main_quote.captured_at,
        reliable: main_quote.is_reliable() && secondary_quote.is_reliable(),
    })
}
