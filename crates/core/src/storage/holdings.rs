use crate::domain::portfolio::Holding;
use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Serialize;

const UPSERT_HOLDING: &str = "INSERT INTO holdings (ticker, quantity, avg_cost, current_price, market_value, updated_at) \
     VALUES ($1, $2, $3, $4, $5, NOW()) \
     ON CONFLICT (ticker) DO UPDATE SET \
         quantity = EXCLUDED.quantity, \
         avg_cost = EXCLUDED.avg_cost, \
         current_price = EXCLUDED.current_price, \
         market_value = EXCLUDED.market_value, \
         updated_at = NOW()";

/// Inserts the position or replaces the existing one for the same ticker.
pub async fn upsert_holding(pool: &sqlx::PgPool, holding: &Holding) -> anyhow::Result<()> {
    sqlx::query(UPSERT_HOLDING)
        .persistent(false)
        .bind(&holding.ticker)
        .bind(holding.quantity)
        .bind(holding.avg_cost)
        .bind(holding.current_price)
        .bind(holding.market_value())
        .execute(pool)
        .await
        .with_context(|| format!("upsert holdings failed for {}", holding.ticker))?;
    Ok(())
}

/// Upserts every position in one transaction.
pub async fn upsert_holdings(pool: &sqlx::PgPool, holdings: &[Holding]) -> anyhow::Result<usize> {
    let mut tx = pool.begin().await.context("begin transaction failed")?;
    for holding in holdings {
        sqlx::query(UPSERT_HOLDING)
            .persistent(false)
            .bind(&holding.ticker)
            .bind(holding.quantity)
            .bind(holding.avg_cost)
            .bind(holding.current_price)
            .bind(holding.market_value())
            .execute(&mut *tx)
            .await
            .with_context(|| format!("upsert holdings failed for {}", holding.ticker))?;
    }
    tx.commit().await.context("commit transaction failed")?;
    Ok(holdings.len())
}

pub async fn clear_holdings(pool: &sqlx::PgPool) -> anyhow::Result<u64> {
    let res = sqlx::query("DELETE FROM holdings")
        .persistent(false)
        .execute(pool)
        .await
        .context("delete holdings failed")?;
    Ok(res.rows_affected())
}

#[derive(Debug, Clone, Serialize)]
pub struct StoredHolding {
    #[serde(flatten)]
    pub holding: Holding,
    pub updated_at: DateTime<Utc>,
}

/// All positions, largest market value first.
pub async fn list_holdings(pool: &sqlx::PgPool) -> anyhow::Result<Vec<StoredHolding>> {
    let rows = sqlx::query_as::<_, (String, f64, f64, f64, DateTime<Utc>)>(
        "SELECT ticker, quantity, avg_cost, current_price, updated_at \
         FROM holdings \
         ORDER BY market_value DESC, ticker ASC",
    )
    .fetch_all(pool)
    .await
    .context("select holdings failed")?;

    Ok(rows
        .into_iter()
        .map(|(ticker, quantity, avg_cost, current_price, updated_at)| StoredHolding {
            holding: Holding {
                ticker,
                quantity,
                avg_cost,
                current_price,
            },
            updated_at,
        })
        .collect())
}
