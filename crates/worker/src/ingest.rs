use anyhow::Context;
use athena_core::analysis::indicators;
use athena_core::ingest::provider::MarketDataClient;
use athena_core::llm::describe_market;
use athena_core::storage::market;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Default)]
pub struct StageSummary {
    pub ok: usize,
    pub failed: usize,
}

/// Fetches one quote per ticker, pausing between requests for the provider's rate limit.
pub async fn fetch_market_data(
    pool: &sqlx::PgPool,
    client: &dyn MarketDataClient,
    tickers: &[String],
    dry_run: bool,
    stop: &AtomicBool,
) -> anyhow::Result<StageSummary> {
    let mut summary = StageSummary::default();

    for (i, ticker) in tickers.iter().enumerate() {
        if stop.load(Ordering::Relaxed) {
            tracing::warn!(done = i, total = tickers.len(), "market fetch interrupted");
            break;
        }

        match client.fetch_quote(ticker).await {
            Ok((bar, _raw)) => {
                tracing::info!(
                    %ticker,
                    provider = client.provider_name(),
                    close = bar.close,
                    volume = bar.volume,
                    trading_day = ?bar.trading_day,
                    "quote fetched"
                );
                if !dry_run {
                    market::insert_bar(pool, &bar).await?;
                }
                summary.ok += 1;
            }
            Err(err) => {
                sentry_anyhow::capture_anyhow(&err);
                tracing::error!(%ticker, error = %format!("{err:#}"), "quote fetch failed");
                summary.failed += 1;
            }
        }

        if i + 1 < tickers.len() {
            let delay = client.request_delay();
            if !delay.is_zero() {
                tracing::debug!(?delay, "rate limiting before next request");
                tokio::time::sleep(delay).await;
            }
        }
    }

    Ok(summary)
}

/// Recomputes indicators from stored history and stores the latest values.
pub async fn compute_indicators(
    pool: &sqlx::PgPool,
    tickers: &[String],
    dry_run: bool,
    stop: &AtomicBool,
) -> anyhow::Result<StageSummary> {
    let mut summary = StageSummary::default();
    let now = chrono::Utc::now();

    for ticker in tickers {
        if stop.load(Ordering::Relaxed) {
            break;
        }

        let history = market::load_history(pool, ticker, market::HISTORY_DAYS)
            .await
            .with_context(|| format!("load history for {ticker}"))?;
        let set = indicators::compute(&history.closes, &history.volumes);

        if set.is_empty() {
            tracing::warn!(
                %ticker,
                bars = history.closes.len(),
                min_bars = indicators::MIN_BARS,
                "not enough history for indicators"
            );
            summary.failed += 1;
            continue;
        }

        tracing::info!(
            %ticker,
            bars = history.closes.len(),
            rsi_14 = ?set.rsi_14,
            sma_50 = ?set.sma_50,
            sma_200 = ?set.sma_200,
            macd = ?set.macd,
            market = %describe_market(&set.to_technical(history.closes.last().copied())),
            "indicators computed"
        );
        if !dry_run {
            market::insert_indicators(pool, ticker, now, &set).await?;
        }
        summary.ok += 1;
    }

    Ok(summary)
}
