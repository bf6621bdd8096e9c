use athena_core::llm::{describe_market, LlmClient, SentimentInput};
use athena_core::storage::{content, market};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::ingest::StageSummary;

/// Posts per ticker sent in one prompt.
const DEFAULT_MAX_POSTS: usize = 20;
// Keeps API spend predictable.
const CALL_DELAY: Duration = Duration::from_secs(1);

/// Labels unanalysed creator posts, one model call per mentioned ticker.
pub async fn analyze_pending(
    pool: &sqlx::PgPool,
    llm: &dyn LlmClient,
    tickers: &[String],
    max_posts: Option<usize>,
    dry_run: bool,
    stop: &AtomicBool,
) -> anyhow::Result<StageSummary> {
    let pending =
        content::unanalyzed_by_ticker(pool, tickers, max_posts.unwrap_or(DEFAULT_MAX_POSTS)).await?;
    let mut summary = StageSummary::default();

    if pending.is_empty() {
        tracing::info!("no unanalysed creator content");
        return Ok(summary);
    }

    let total = pending.len();
    for (i, (ticker, posts)) in pending.into_iter().enumerate() {
        if stop.load(Ordering::Relaxed) {
            tracing::warn!(done = i, total, "sentiment analysis interrupted");
            break;
        }

        let indicators = market::latest_indicators(pool, &ticker).await?;
        let input = SentimentInput {
            ticker: ticker.clone(),
            creator_content: posts.iter().map(|p| p.text.clone()).collect(),
            market_context: describe_market(&indicators),
        };

        match llm.analyze_sentiment(input).await {
            Ok(assessment) => {
                tracing::info!(
                    %ticker,
                    provider = llm.provider_name(),
                    sentiment = %assessment.sentiment,
                    confidence = assessment.confidence,
                    posts = posts.len(),
                    "sentiment assessed"
                );
                if !dry_run {
                    let ids: Vec<i64> = posts.iter().map(|p| p.id).collect();
                    let updated = content::apply_sentiment(pool, &ids, &assessment).await?;
                    tracing::debug!(%ticker, updated, "creator content labelled");
                }
                summary.ok += 1;
            }
            Err(err) => {
                sentry_anyhow::capture_anyhow(&err);
                tracing::error!(%ticker, error = %format!("{err:#}"), "sentiment analysis failed");
                summary.failed += 1;
            }
        }

        if i + 1 < total {
            tokio::time::sleep(CALL_DELAY).await;
        }
    }

    Ok(summary)
}
