use crate::domain::recommendation::{Action, Recommendation, RecommendationRun};
use crate::engine::regime::MarketRegime;
use anyhow::Context;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Writes the run header and every recommendation in one transaction.
pub async fn persist_run(pool: &sqlx::PgPool, run: &RecommendationRun) -> anyhow::Result<Uuid> {
    anyhow::ensure!(
        !run.items.is_empty(),
        "a recommendation run must contain at least one item"
    );

    let mut tx = pool.begin().await.context("begin transaction failed")?;

    let run_id: Uuid = sqlx::query_scalar(
        "INSERT INTO recommendation_runs (run_date, generated_at, budget, market_regime, vix_level) \
         VALUES ($1, $2, $3, $4, $5) \
         RETURNING id",
    )
    .persistent(false)
    .bind(run.run_date)
    .bind(run.generated_at)
    .bind(run.budget)
    .bind(run.regime.as_str())
    .bind(run.vix_level)
    .fetch_one(&mut *tx)
    .await
    .context("insert recommendation_runs failed")?;

    for (position, rec) in run.items.iter().enumerate() {
        insert_signal(&mut tx, run_id, position as i32, rec).await?;
    }

    tx.commit().await.context("commit transaction failed")?;
    Ok(run_id)
}

async fn insert_signal(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    run_id: Uuid,
    position: i32,
    rec: &Recommendation,
) -> anyhow::Result<()> {
    sqlx::query(
        "INSERT INTO signals \
         (run_id, position, ticker, signal_type, recommendation_amount, confidence_score, reasoning, market_regime, vix_level) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
    )
    .persistent(false)
    .bind(run_id)
    .bind(position)
    .bind(&rec.ticker)
    .bind(rec.action.as_str())
    .bind(rec.amount)
    .bind(rec.confidence_score)
    .bind(&rec.reasoning)
    .bind(rec.regime.as_str())
    .bind(rec.vix_level)
    .execute(&mut **tx)
    .await
    .context("insert signals failed")?;

    Ok(())
}

/// Latest run overall, or the latest run on `run_date`.
pub async fn fetch_run(
    pool: &sqlx::PgPool,
    run_date: Option<NaiveDate>,
) -> anyhow::Result<Option<(Uuid, RecommendationRun)>> {
    type RunRow = (Uuid, NaiveDate, DateTime<Utc>, f64, String, f64);

    let row = match run_date {
        Some(d) => {
            sqlx::query_as::<_, RunRow>(
                "SELECT id, run_date, generated_at, budget, market_regime, vix_level \
                 FROM recommendation_runs \
                 WHERE run_date = $1 \
                 ORDER BY generated_at DESC \
                 LIMIT 1",
            )
            .bind(d)
            .fetch_optional(pool)
            .await
            .context("select recommendation_runs failed")?
        }
        None => {
            sqlx::query_as::<_, RunRow>(
                "SELECT id, run_date, generated_at, budget, market_regime, vix_level \
                 FROM recommendation_runs \
                 ORDER BY run_date DESC, generated_at DESC \
                 LIMIT 1",
            )
            .fetch_optional(pool)
            .await
            .context("select latest recommendation_runs failed")?
        }
    };

    let Some((id, run_date, generated_at, budget, regime, vix_level)) = row else {
        return Ok(None);
    };

    let items = fetch_items(pool, id).await?;
    Ok(Some((
        id,
        RecommendationRun {
            run_date,
            generated_at,
            budget,
            regime: parse_regime(&regime)?,
            vix_level,
            items,
        },
    )))
}

type SignalRow = (Option<String>, String, f64, f64, String, String, f64);

async fn fetch_items(pool: &sqlx::PgPool, run_id: Uuid) -> anyhow::Result<Vec<Recommendation>> {
    let rows = sqlx::query_as::<_, SignalRow>(
        "SELECT ticker, signal_type, recommendation_amount, confidence_score, reasoning, market_regime, vix_level \
         FROM signals \
         WHERE run_id = $1 \
         ORDER BY position ASC",
    )
    .bind(run_id)
    .fetch_all(pool)
    .await
    .context("select signals failed")?;

    rows.into_iter().map(recommendation_from_row).collect()
}

fn recommendation_from_row(row: SignalRow) -> anyhow::Result<Recommendation> {
    let (ticker, signal_type, amount, confidence_score, reasoning, regime, vix_level) = row;
    let action = Action::parse(&signal_type)
        .with_context(|| format!("invalid signal_type in DB: {signal_type}"))?;
    Ok(Recommendation {
        ticker,
        action,
        amount,
        confidence_score,
        reasoning,
        regime: parse_regime(&regime)?,
        vix_level,
    })
}

fn parse_regime(raw: &str) -> anyhow::Result<MarketRegime> {
    MarketRegime::parse(raw).with_context(|| format!("invalid market_regime in DB: {raw}"))
}

#[derive(Debug, Clone, Serialize)]
pub struct TickerSignal {
    pub run_date: NaiveDate,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub recommendation: Recommendation,
}

/// Most recent recommendations for one ticker, newest first.
pub async fn fetch_ticker_history(
    pool: &sqlx::PgPool,
    ticker: &str,
    limit: i64,
) -> anyhow::Result<Vec<TickerSignal>> {
    let rows = sqlx::query_as::<
        _,
        (
            NaiveDate,
            DateTime<Utc>,
            Option<String>,
            String,
            f64,
            f64,
            String,
            String,
            f64,
        ),
    >(
        "SELECT r.run_date, s.created_at, s.ticker, s.signal_type, s.recommendation_amount, \
                s.confidence_score, s.reasoning, s.market_regime, s.vix_level \
         FROM signals s \
         JOIN recommendation_runs r ON r.id = s.run_id \
         WHERE s.ticker = $1 \
         ORDER BY r.run_date DESC, s.created_at DESC \
         LIMIT $2",
    )
    .bind(ticker)
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("select ticker signals failed")?;

    let mut out = Vec::with_capacity(rows.len());
    for (run_date, created_at, t, signal_type, amount, confidence, reasoning, regime, vix) in rows {
        out.push(TickerSignal {
            run_date,
            created_at,
            recommendation: recommendation_from_row((
                t,
                signal_type,
                amount,
                confidence,
                reasoning,
                regime,
                vix,
            ))?,
        });
    }
    Ok(out)
}
