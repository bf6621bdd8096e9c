use crate::engine::regime::MarketRegime;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Buy,
    Hold,
    Wait,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Buy => "buy",
            Action::Hold => "hold",
            Action::Wait => "wait",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "buy" => Some(Action::Buy),
            "hold" => Some(Action::Hold),
            "wait" => Some(Action::Wait),
            _ => None,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    /// `None` only for the market-wide "wait" issued in a volatile regime.
    pub ticker: Option<String>,
    pub action: Action,
    pub amount: f64,
    pub confidence_score: f64,
    pub reasoning: String,
    pub regime: MarketRegime,
    pub vix_level: f64,
}

/// One engine invocation as persisted and served by the API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationRun {
    pub run_date: NaiveDate,
    pub generated_at: DateTime<Utc>,
    pub budget: f64,
    pub regime: MarketRegime,
    pub vix_level: f64,
    pub items: Vec<Recommendation>,
}

impl RecommendationRun {
    pub fn total_allocated(&self) -> f64 {
        self.items.iter().map(|r| r.amount).sum()
    }
}
