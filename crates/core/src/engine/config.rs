use crate::engine::allocation::CoreAllocationTable;
use crate::engine::confidence::ConfidenceWeights;
use crate::engine::regime::RegimeThresholds;

pub const DEFAULT_TRACKED_TICKERS: [&str; 4] = ["SPY", "QQQ", "VOO", "VTI"];
pub const DEFAULT_BUDGET: f64 = 1000.0;

/// Tolerance used for every "must sum to 1.0" check.
pub const SUM_TOLERANCE: f64 = 0.01;

// Absorbs f64 rounding so sums of exactly 0.99 or 1.01 stay inside the tolerance.
const FLOAT_SLACK: f64 = 1e-9;

/// True when `deviation` from 1.0 is beyond [`SUM_TOLERANCE`].
pub fn exceeds_sum_tolerance(deviation: f64) -> bool {
    deviation > SUM_TOLERANCE + FLOAT_SLACK
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("confidence weight {name} must be finite and non-negative (got {value})")]
    InvalidWeight { name: &'static str, value: f64 },

    #[error("confidence weights must sum to 1.0 (±0.01), got {sum}")]
    WeightsNotNormalized { sum: f64 },

    #[error("threshold {name} must be finite and non-negative (got {value})")]
    InvalidThreshold { name: &'static str, value: f64 },

    #[error("rsi_oversold ({oversold}) must be below rsi_overbought ({overbought})")]
    InvertedRsiBand { oversold: f64, overbought: f64 },

    #[error("core allocation for {ticker} must be within [0, 1] (got {fraction})")]
    InvalidCoreFraction { ticker: String, fraction: f64 },

    #[error("core allocations must not exceed the budget (fractions sum to {sum})")]
    CoreTableOverallocated { sum: f64 },

    #[error("invalid value for {key}: {detail}")]
    Env { key: &'static str, detail: String },
}

/// Everything the engine needs besides the per-run inputs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineConfig {
    pub thresholds: RegimeThresholds,
    pub weights: ConfidenceWeights,
    pub core_allocations: CoreAllocationTable,
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.thresholds.validate()?;
        self.weights.validate()?;
        self.core_allocations.validate()?;
        Ok(())
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from a key lookup, falling back to defaults for absent keys.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut out = Self::default();

        if let Some(v) = parse_f64(&lookup, "VIX_HIGH_THRESHOLD")? {
            out.thresholds.vix_high = v;
        }
        if let Some(v) = parse_f64(&lookup, "RSI_OVERBOUGHT")? {
            out.thresholds.rsi_overbought = v;
        }
        if let Some(v) = parse_f64(&lookup, "RSI_OVERSOLD")? {
            out.thresholds.rsi_oversold = v;
        }

        if let Some(raw) = non_empty(&lookup, "CONFIDENCE_WEIGHTS") {
            out.weights = parse_weights(&raw)?;
        }

        out.validate()?;
        Ok(out)
    }
}

/// Per-invocation knobs: which tickers to score and how much to allocate.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSettings {
    pub tracked_tickers: Vec<String>,
    pub budget: f64,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            tracked_tickers: DEFAULT_TRACKED_TICKERS
                .iter()
                .map(|t| t.to_string())
                .collect(),
            budget: DEFAULT_BUDGET,
        }
    }
}

impl RunSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut out = Self::default();

        if let Some(raw) = non_empty(&lookup, "TRACKED_TICKERS") {
            let tickers = parse_ticker_list(&raw);
            if !tickers.is_empty() {
                out.tracked_tickers = tickers;
            }
        }

        if let Some(budget) = parse_f64(&lookup, "MONTHLY_CONTRIBUTION")? {
            if !budget.is_finite() || budget < 0.0 {
                return Err(ConfigError::Env {
                    key: "MONTHLY_CONTRIBUTION",
                    detail: format!("budget must be a non-negative amount (got {budget})"),
                });
            }
            out.budget = budget;
        }

        Ok(out)
    }
}

/// Splits a comma separated ticker list, trimming, uppercasing, and dropping blanks and
/// duplicates while keeping the first occurrence's position.
pub fn parse_ticker_list(raw: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for part in raw.split(',') {
        let t = part.trim().to_ascii_uppercase();
        if t.is_empty() || out.contains(&t) {
            continue;
        }
        out.push(t);
    }
    out
}

fn non_empty<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key).filter(|s| !s.trim().is_empty())
}

fn parse_f64<F>(lookup: &F, key: &'static str) -> Result<Option<f64>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = non_empty(lookup, key) else {
        return Ok(None);
    };
    raw.trim()
        .parse::<f64>()
        .map(Some)
        .map_err(|e| ConfigError::Env {
            key,
            detail: format!("{raw:?}: {e}"),
        })
}

fn parse_weights(raw: &str) -> Result<ConfidenceWeights, ConfigError> {
    let parts: Vec<&str> = raw.split(',').map(str::trim).collect();
    if parts.len() != 4 {
        return Err(ConfigError::Env {
            key: "CONFIDENCE_WEIGHTS",
            detail: format!("expected 4 comma separated weights, got {}", parts.len()),
        });
    }

    let mut values = [0.0_f64; 4];
    for (slot, part) in values.iter_mut().zip(&parts) {
        *slot = part.parse::<f64>().map_err(|e| ConfigError::Env {
            key: "CONFIDENCE_WEIGHTS",
            detail: format!("{part:?}: {e}"),
        })?;
    }

    Ok(ConfidenceWeights {
        creator_consensus: values[0],
        technical_alignment: values[1],
        volume_confirmation: values[2],
        historical_accuracy: values[3],
    })
}
