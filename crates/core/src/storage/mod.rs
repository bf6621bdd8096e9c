use anyhow::Context;

pub mod content;
pub mod holdings;
pub mod lock;
pub mod market;
pub mod recommendations;
pub mod settings;

pub async fn migrate(pool: &sqlx::PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("sqlx migrations failed")?;
    Ok(())
}

const STATUS_TABLES: [&str; 7] = [
    "market_data",
    "technical_indicators",
    "creator_content",
    "creator_accuracy",
    "holdings",
    "recommendation_runs",
    "signals",
];

/// Row counts for the pipeline's tables, in pipeline order.
pub async fn table_counts(pool: &sqlx::PgPool) -> anyhow::Result<Vec<(&'static str, i64)>> {
    let mut out = Vec::with_capacity(STATUS_TABLES.len());
    for table in STATUS_TABLES {
        // Table names come from the constant list above, never from input.
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
            .persistent(false)
            .fetch_one(pool)
            .await
            .with_context(|| format!("count {table} failed"))?;
        out.push((table, count));
    }
    Ok(out)
}
