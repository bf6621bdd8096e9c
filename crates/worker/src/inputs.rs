use athena_core::engine::TickerInputs;
use athena_core::storage::{content, market};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// Loads everything the engine needs for one ticker.
pub async fn load_ticker_inputs(pool: &sqlx::PgPool, ticker: &str) -> anyhow::Result<TickerInputs> {
    let creator_sentiments = content::recent_sentiments(pool, ticker).await?;
    let indicators = market::latest_indicators(pool, ticker).await?;
    let current_volume = market::latest_bar(pool, ticker).await?.map(|(_, v)| v);
    let avg_volume = market::latest_volume_average(pool, ticker).await?;

    let creators: Vec<String> = creator_sentiments.keys().cloned().collect();
    let creator_accuracy = content::creator_accuracy(pool, &creators).await?;

    Ok(TickerInputs {
        indicators,
        creator_sentiments,
        current_volume: non_negative(current_volume),
        avg_volume: non_negative(avg_volume),
        creator_accuracy,
    })
}

fn non_negative(v: Option<i64>) -> u64 {
    v.and_then(|v| u64::try_from(v).ok()).unwrap_or(0)
}

/// Preloads inputs for every ticker. A ticker whose load fails is left out, so the engine
/// skips it; loading stops early once `stop` is set.
pub async fn load_all(
    pool: &sqlx::PgPool,
    tickers: &[String],
    stop: &AtomicBool,
) -> BTreeMap<String, TickerInputs> {
    let mut out = BTreeMap::new();
    for ticker in tickers {
        if stop.load(Ordering::Relaxed) {
            tracing::warn!(loaded = out.len(), "input loading interrupted");
            break;
        }
        match load_ticker_inputs(pool, ticker).await {
            Ok(inputs) => {
                tracing::debug!(
                    %ticker,
                    creators = inputs.creator_sentiments.len(),
                    current_volume = inputs.current_volume,
                    avg_volume = inputs.avg_volume,
                    "inputs loaded"
                );
                out.insert(ticker.clone(), inputs);
            }
            Err(err) => {
                sentry_anyhow::capture_anyhow(&err);
                tracing::warn!(%ticker, error = %format!("{err:#}"), "failed to load inputs");
            }
        }
    }
    out
}
