//! Overrides read from the `config` table. They take precedence over environment values.

use crate::engine::confidence::ConfidenceWeights;
use crate::engine::config::{parse_ticker_list, EngineConfig, RunSettings};
use crate::engine::regime::RegimeThresholds;
use anyhow::Context;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

pub const KEY_TRACKED_TICKERS: &str = "tracked_tickers";
pub const KEY_CONFIDENCE_WEIGHTS: &str = "confidence_weights";
pub const KEY_REGIME_THRESHOLDS: &str = "market_regime_thresholds";
pub const KEY_CONTRIBUTION_TARGET: &str = "contribution_target";

#[derive(Debug, Deserialize)]
struct ContributionTarget {
    monthly: f64,
}

pub async fn load_config_rows(pool: &sqlx::PgPool) -> anyhow::Result<BTreeMap<String, Value>> {
    let rows = sqlx::query_as::<_, (String, Value)>(
        "SELECT key, value FROM config WHERE key = ANY($1)",
    )
    .bind(
        [
            KEY_TRACKED_TICKERS,
            KEY_CONFIDENCE_WEIGHTS,
            KEY_REGIME_THRESHOLDS,
            KEY_CONTRIBUTION_TARGET,
        ]
        .map(str::to_string)
        .to_vec(),
    )
    .fetch_all(pool)
    .await
    .context("select config failed")?;
    Ok(rows.into_iter().collect())
}

/// Applies the rows to both configs and re-validates the engine config.
///
/// A malformed ticker list is ignored; malformed weights, thresholds, or contribution target
/// are errors.
pub fn apply_overrides(
    rows: &BTreeMap<String, Value>,
    engine: &mut EngineConfig,
    run: &mut RunSettings,
) -> anyhow::Result<()> {
    if let Some(v) = rows.get(KEY_TRACKED_TICKERS) {
        match serde_json::from_value::<Vec<String>>(v.clone()) {
            Ok(list) => {
                let tickers = parse_ticker_list(&list.join(","));
                if !tickers.is_empty() {
                    run.tracked_tickers = tickers;
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "ignoring malformed tracked_tickers config");
            }
        }
    }

    if let Some(v) = rows.get(KEY_CONFIDENCE_WEIGHTS) {
        engine.weights = serde_json::from_value::<ConfidenceWeights>(v.clone())
            .context("parse confidence_weights config")?;
    }

    if let Some(v) = rows.get(KEY_REGIME_THRESHOLDS) {
        engine.thresholds = serde_json::from_value::<RegimeThresholds>(v.clone())
            .context("parse market_regime_thresholds config")?;
    }

    if let Some(v) = rows.get(KEY_CONTRIBUTION_TARGET) {
        let target = serde_json::from_value::<ContributionTarget>(v.clone())
            .context("parse contribution_target config")?;
        anyhow::ensure!(
            target.monthly.is_finite() && target.monthly >= 0.0,
            "contribution_target.monthly must be non-negative (got {})",
            target.monthly
        );
        run.budget = target.monthly;
    }

    engine.validate().context("config table produced an invalid engine config")?;
    Ok(())
}

pub async fn apply_db_overrides(
    pool: &sqlx::PgPool,
    engine: &mut EngineConfig,
    run: &mut RunSettings,
) -> anyhow::Result<()> {
    let rows = load_config_rows(pool).await?;
    tracing::debug!(keys = ?rows.keys().collect::<Vec<_>>(), "config overrides loaded");
    apply_overrides(&rows, engine, run)
}
