use crate::analysis::indicators::IndicatorSet;
use crate::engine::regime::MarketSnapshot;
use crate::engine::signals::TechnicalIndicators;
use crate::ingest::types::MarketBar;
use anyhow::Context;
use chrono::{DateTime, Utc};

/// Days of history loaded for indicator computation; enough for SMA200 on trading days.
pub const HISTORY_DAYS: i32 = 300;

/// One row per ticker and trading day; a refetch of the same session replaces the row.
pub async fn insert_bar(pool: &sqlx::PgPool, bar: &MarketBar) -> anyhow::Result<()> {
    sqlx::query(
        "INSERT INTO market_data (ticker, trading_day, timestamp, open, high, low, close, volume) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
         ON CONFLICT (ticker, trading_day) DO UPDATE SET \
             timestamp = EXCLUDED.timestamp, \
             open = EXCLUDED.open, \
             high = EXCLUDED.high, \
             low = EXCLUDED.low, \
             close = EXCLUDED.close, \
             volume = EXCLUDED.volume",
    )
    .persistent(false)
    .bind(&bar.ticker)
    .bind(bar.session_day())
    .bind(bar.timestamp)
    .bind(bar.open)
    .bind(bar.high)
    .bind(bar.low)
    .bind(bar.close)
    .bind(bar.volume)
    .execute(pool)
    .await
    .with_context(|| format!("insert market_data failed for {}", bar.ticker))?;
    Ok(())
}

/// Daily closes and volumes, oldest first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PriceHistory {
    pub closes: Vec<f64>,
    pub volumes: Vec<i64>,
}

pub async fn load_history(
    pool: &sqlx::PgPool,
    ticker: &str,
    days: i32,
) -> anyhow::Result<PriceHistory> {
    let rows = sqlx::query_as::<_, (f64, i64)>(
        "SELECT close, volume FROM market_data \
         WHERE ticker = $1 AND trading_day >= CURRENT_DATE - $2 \
         ORDER BY trading_day ASC",
    )
    .bind(ticker)
    .bind(days)
    .fetch_all(pool)
    .await
    .with_context(|| format!("select market_data history failed for {ticker}"))?;

    let (closes, volumes) = rows.into_iter().unzip();
    Ok(PriceHistory { closes, volumes })
}

pub async fn insert_indicators(
    pool: &sqlx::PgPool,
    ticker: &str,
    timestamp: DateTime<Utc>,
    set: &IndicatorSet,
) -> anyhow::Result<()> {
    sqlx::query(
        "INSERT INTO technical_indicators \
         (ticker, timestamp, rsi_14, sma_50, sma_200, macd, macd_signal, volume_avg_20) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
    )
    .persistent(false)
    .bind(ticker)
    .bind(timestamp)
    .bind(set.rsi_14)
    .bind(set.sma_50)
    .bind(set.sma_200)
    .bind(set.macd)
    .bind(set.macd_signal)
    .bind(set.volume_avg_20)
    .execute(pool)
    .await
    .with_context(|| format!("insert technical_indicators failed for {ticker}"))?;
    Ok(())
}

/// Latest stored indicators plus the latest close.
pub async fn latest_indicators(
    pool: &sqlx::PgPool,
    ticker: &str,
) -> anyhow::Result<TechnicalIndicators> {
    let row = sqlx::query_as::<
        _,
        (
            Option<f64>,
            Option<f64>,
            Option<f64>,
            Option<f64>,
            Option<f64>,
        ),
    >(
        "SELECT rsi_14, sma_50, sma_200, macd, macd_signal \
         FROM technical_indicators \
         WHERE ticker = $1 \
         ORDER BY timestamp DESC \
         LIMIT 1",
    )
    .bind(ticker)
    .fetch_optional(pool)
    .await
    .with_context(|| format!("select technical_indicators failed for {ticker}"))?;

    let latest_close = latest_bar(pool, ticker).await?.map(|(close, _)| close);
    let (rsi_14, sma_50, sma_200, macd, macd_signal) = row.unwrap_or_default();
    Ok(TechnicalIndicators {
        rsi_14,
        sma_50,
        sma_200,
        macd,
        macd_signal,
        latest_close,
    })
}

/// `(close, volume)` of the newest bar.
pub async fn latest_bar(pool: &sqlx::PgPool, ticker: &str) -> anyhow::Result<Option<(f64, i64)>> {
    sqlx::query_as::<_, (f64, i64)>(
        "SELECT close, volume FROM market_data \
         WHERE ticker = $1 \
         ORDER BY trading_day DESC \
         LIMIT 1",
    )
    .bind(ticker)
    .fetch_optional(pool)
    .await
    .with_context(|| format!("select latest market_data failed for {ticker}"))
}

pub async fn latest_volume_average(pool: &sqlx::PgPool, ticker: &str) -> anyhow::Result<Option<i64>> {
    sqlx::query_scalar::<_, i64>(
        "SELECT volume_avg_20 FROM technical_indicators \
         WHERE ticker = $1 AND volume_avg_20 IS NOT NULL \
         ORDER BY timestamp DESC \
         LIMIT 1",
    )
    .bind(ticker)
    .fetch_optional(pool)
    .await
    .with_context(|| format!("select volume_avg_20 failed for {ticker}"))
}

/// Latest VIX close and SPY RSI. Absent or zero readings become `None`.
pub async fn market_snapshot(pool: &sqlx::PgPool) -> anyhow::Result<MarketSnapshot> {
    let vix = sqlx::query_scalar::<_, f64>(
        "SELECT close FROM market_data \
         WHERE ticker IN ('VIX', '^VIX') \
         ORDER BY trading_day DESC, timestamp DESC \
         LIMIT 1",
    )
    .fetch_optional(pool)
    .await
    .context("select VIX failed")?;

    let spy_rsi = sqlx::query_scalar::<_, Option<f64>>(
        "SELECT rsi_14 FROM technical_indicators \
         WHERE ticker = 'SPY' \
         ORDER BY timestamp DESC \
         LIMIT 1",
    )
    .fetch_optional(pool)
    .await
    .context("select SPY rsi_14 failed")?
    .flatten();

    Ok(MarketSnapshot::from_raw(
        vix.unwrap_or_default(),
        spy_rsi.unwrap_or_default(),
    ))
}

/// Newest bar timestamp per ticker.
pub async fn latest_bar_times(pool: &sqlx::PgPool) -> anyhow::Result<Vec<(String, DateTime<Utc>)>> {
    sqlx::query_as::<_, (String, DateTime<Utc>)>(
        "SELECT ticker, MAX(timestamp) FROM market_data GROUP BY ticker ORDER BY ticker",
    )
    .fetch_all(pool)
    .await
    .context("select latest market_data per ticker failed")
}
