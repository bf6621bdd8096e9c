use anyhow::Context;
use athena_core::domain::portfolio::{parse_holdings_csv, Holding, PortfolioSummary};
use athena_core::storage::holdings;
use std::path::Path;

pub async fn add_holding(pool: &sqlx::PgPool, holding: Holding) -> anyhow::Result<()> {
    holdings::upsert_holding(pool, &holding).await?;
    tracing::info!(
        ticker = %holding.ticker,
        quantity = holding.quantity,
        current_price = holding.current_price,
        market_value = holding.market_value(),
        "holding saved"
    );
    Ok(())
}

/// Imports every valid row; rejected rows are logged and left out.
pub async fn import_csv(pool: &sqlx::PgPool, path: &Path, dry_run: bool) -> anyhow::Result<()> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("open holdings CSV failed: {}", path.display()))?;
    let import = parse_holdings_csv(file)?;

    for rejected in &import.rejected {
        tracing::warn!(line = rejected.line, reason = %rejected.reason, "skipping holdings row");
    }

    let imported = if dry_run || import.holdings.is_empty() {
        0
    } else {
        holdings::upsert_holdings(pool, &import.holdings).await?
    };
    tracing::info!(
        path = %path.display(),
        parsed = import.holdings.len(),
        rejected = import.rejected.len(),
        imported,
        dry_run,
        "holdings import finished"
    );
    Ok(())
}

pub async fn clear(pool: &sqlx::PgPool) -> anyhow::Result<()> {
    let deleted = holdings::clear_holdings(pool).await?;
    tracing::info!(deleted, "holdings cleared");
    Ok(())
}

pub async fn show(pool: &sqlx::PgPool) -> anyhow::Result<()> {
    let rows = holdings::list_holdings(pool).await?;
    if rows.is_empty() {
        println!("No holdings found. Use add-holding or import-holdings.");
        return Ok(());
    }

    println!(
        "{:<8} {:>12} {:>12} {:>12} {:>12} {:>10}",
        "Ticker", "Quantity", "Avg Cost", "Price", "Value", "Gain %"
    );
    println!("{}", "-".repeat(72));
    for row in &rows {
        let h = &row.holding;
        println!(
            "{:<8} {:>12.4} {:>12.2} {:>12.2} {:>12.2} {:>10}",
            h.ticker,
            h.quantity,
            h.avg_cost,
            h.current_price,
            h.market_value(),
            format_gain(h.gain_percent())
        );
    }

    let summary = PortfolioSummary::from_holdings(rows.iter().map(|r| &r.holding));
    println!("{}", "-".repeat(72));
    println!(
        "{:<8} {:>12} {:>12.2} {:>12} {:>12.2} {:>10}",
        "TOTAL",
        "",
        summary.total_cost,
        "",
        summary.total_value,
        format_gain(summary.gain_percent())
    );
    Ok(())
}

fn format_gain(gain: Option<f64>) -> String {
    gain.map(|g| format!("{g:.2}%")).unwrap_or_else(|| "-".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gain_column() {
        assert_eq!(format_gain(Some(12.5)), "12.50%");
        assert_eq!(format_gain(Some(-3.0)), "-3.00%");
        assert_eq!(format_gain(None), "-");
    }
}
