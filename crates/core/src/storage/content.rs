use crate::analysis::tickers::extract_tickers;
use crate::domain::contract::SentimentAssessment;
use crate::domain::sentiment::{creator_sentiments_from_raw, Sentiment};
use crate::engine::confidence::DEFAULT_ACCURACY_PRIOR;
use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Window of creator posts that feeds the consensus factor.
pub const SENTIMENT_LOOKBACK_DAYS: i32 = 7;

#[derive(Debug, Clone)]
pub struct NewContent {
    pub creator_name: String,
    pub platform: String,
    pub content_id: String,
    pub content_text: String,
    pub posted_at: DateTime<Utc>,
}

/// A post as entered by hand: only creator and text are required.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContentDraft {
    pub creator: String,
    pub text: String,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub content_id: Option<String>,
    #[serde(default)]
    pub posted_at: Option<DateTime<Utc>>,
}

impl ContentDraft {
    /// Fills in the `manual` platform, a random id, and the current time.
    pub fn into_new_content(self) -> NewContent {
        NewContent {
            creator_name: self.creator,
            platform: self
                .platform
                .filter(|p| !p.trim().is_empty())
                .unwrap_or_else(|| "manual".to_string()),
            content_id: self
                .content_id
                .filter(|id| !id.trim().is_empty())
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            content_text: self.text,
            posted_at: self.posted_at.unwrap_or_else(Utc::now),
        }
    }
}

/// Parses a JSON Lines batch of drafts. Blank lines are skipped; any bad line fails the batch.
pub fn parse_content_batch(input: &str) -> anyhow::Result<Vec<ContentDraft>> {
    input
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| -> anyhow::Result<ContentDraft> {
            let draft: ContentDraft = serde_json::from_str(line)
                .with_context(|| format!("invalid content on line {}", i + 1))?;
            anyhow::ensure!(
                !draft.text.trim().is_empty(),
                "empty text on line {}",
                i + 1
            );
            Ok(draft)
        })
        .collect()
}

/// Stores a post with its extracted tickers. Returns the tickers, or `None` if the
/// `content_id` already existed.
pub async fn insert_content(
    pool: &sqlx::PgPool,
    content: &NewContent,
) -> anyhow::Result<Option<Vec<String>>> {
    anyhow::ensure!(
        !content.creator_name.trim().is_empty(),
        "creator_name must be non-empty"
    );
    anyhow::ensure!(
        !content.content_id.trim().is_empty(),
        "content_id must be non-empty"
    );

    let tickers = extract_tickers(&content.content_text);
    let res = sqlx::query(
        "INSERT INTO creator_content \
         (creator_name, platform, content_id, content_text, mentioned_tickers, posted_at) \
         VALUES ($1, $2, $3, $4, $5, $6) \
         ON CONFLICT (content_id) DO NOTHING",
    )
    .persistent(false)
    .bind(content.creator_name.trim())
    .bind(content.platform.trim())
    .bind(content.content_id.trim())
    .bind(&content.content_text)
    .bind(&tickers)
    .bind(content.posted_at)
    .execute(pool)
    .await
    .context("insert creator_content failed")?;

    Ok((res.rows_affected() > 0).then_some(tickers))
}

#[derive(Debug, Clone, Serialize)]
pub struct ContentRow {
    pub creator_name: String,
    pub platform: String,
    pub content_text: String,
    pub mentioned_tickers: Vec<String>,
    pub sentiment: Option<String>,
    pub posted_at: DateTime<Utc>,
}

/// Most recent posts, newest first.
pub async fn recent_content(pool: &sqlx::PgPool, limit: i64) -> anyhow::Result<Vec<ContentRow>> {
    let rows = sqlx::query_as::<_, (String, String, String, Vec<String>, Option<String>, DateTime<Utc>)>(
        "SELECT creator_name, platform, content_text, mentioned_tickers, sentiment, posted_at \
         FROM creator_content \
         ORDER BY posted_at DESC \
         LIMIT $1",
    )
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("select recent creator_content failed")?;

    Ok(rows
        .into_iter()
        .map(
            |(creator_name, platform, content_text, mentioned_tickers, sentiment, posted_at)| ContentRow {
                creator_name,
                platform,
                content_text,
                mentioned_tickers,
                sentiment,
                posted_at,
            },
        )
        .collect())
}

#[derive(Debug, Clone, PartialEq)]
pub struct PendingPost {
    pub id: i64,
    pub text: String,
}

/// Posts without a sentiment label, grouped by mentioned ticker (newest first).
pub async fn unanalyzed_by_ticker(
    pool: &sqlx::PgPool,
    tickers: &[String],
    per_ticker_limit: usize,
) -> anyhow::Result<BTreeMap<String, Vec<PendingPost>>> {
    let rows = sqlx::query_as::<_, (String, i64, String)>(
        "SELECT t.ticker, c.id, c.content_text \
         FROM creator_content c \
         CROSS JOIN LATERAL unnest(c.mentioned_tickers) AS t(ticker) \
         WHERE c.sentiment IS NULL AND t.ticker = ANY($1) \
         ORDER BY c.posted_at DESC",
    )
    .bind(tickers)
    .fetch_all(pool)
    .await
    .context("select unanalyzed creator_content failed")?;

    let mut out: BTreeMap<String, Vec<PendingPost>> = BTreeMap::new();
    for (ticker, id, text) in rows {
        let posts = out.entry(ticker).or_default();
        if posts.len() < per_ticker_limit {
            posts.push(PendingPost { id, text });
        }
    }
    Ok(out)
}

/// Labels the given posts. Posts labelled in the meantime are left alone.
pub async fn apply_sentiment(
    pool: &sqlx::PgPool,
    post_ids: &[i64],
    assessment: &SentimentAssessment,
) -> anyhow::Result<u64> {
    let res = sqlx::query(
        "UPDATE creator_content \
         SET sentiment = $1, confidence_score = $2 \
         WHERE id = ANY($3) AND sentiment IS NULL",
    )
    .persistent(false)
    .bind(assessment.sentiment.as_str())
    .bind(assessment.confidence)
    .bind(post_ids)
    .execute(pool)
    .await
    .with_context(|| format!("update creator_content sentiment failed for {}", assessment.ticker))?;
    Ok(res.rows_affected())
}

/// Each creator's most recent label for `ticker` within the lookback window.
pub async fn recent_sentiments(
    pool: &sqlx::PgPool,
    ticker: &str,
) -> anyhow::Result<BTreeMap<String, Sentiment>> {
    let rows = sqlx::query_as::<_, (String, String)>(
        "SELECT DISTINCT ON (creator_name) creator_name, sentiment \
         FROM creator_content \
         WHERE $1 = ANY(mentioned_tickers) \
           AND sentiment IS NOT NULL \
           AND posted_at >= NOW() - make_interval(days => $2) \
         ORDER BY creator_name, posted_at DESC",
    )
    .bind(ticker)
    .bind(SENTIMENT_LOOKBACK_DAYS)
    .fetch_all(pool)
    .await
    .with_context(|| format!("select creator sentiments failed for {ticker}"))?;

    Ok(creator_sentiments_from_raw(rows))
}

/// Accuracy per creator; creators without a track record get the neutral prior.
pub async fn creator_accuracy(
    pool: &sqlx::PgPool,
    creators: &[String],
) -> anyhow::Result<BTreeMap<String, f64>> {
    if creators.is_empty() {
        return Ok(BTreeMap::new());
    }

    let rows = sqlx::query_as::<_, (String, f64)>(
        "SELECT creator_name, \
                COALESCE(AVG(CASE WHEN was_accurate THEN 1.0 ELSE 0.0 END), 0.5)::float8 \
         FROM creator_accuracy \
         WHERE creator_name = ANY($1) \
         GROUP BY creator_name",
    )
    .bind(creators)
    .fetch_all(pool)
    .await
    .context("select creator_accuracy failed")?;

    Ok(with_accuracy_prior(creators, rows))
}

fn with_accuracy_prior(
    creators: &[String],
    rows: Vec<(String, f64)>,
) -> BTreeMap<String, f64> {
    let mut rates: BTreeMap<String, f64> = rows.into_iter().collect();
    for creator in creators {
        rates
            .entry(creator.clone())
            .or_insert(DEFAULT_ACCURACY_PRIOR);
    }
    rates
}
