use crate::domain::sentiment::Sentiment;
use anyhow::{ensure, Context};
use serde::{Deserialize, Serialize};

/// Sentiment verdict exactly as the model is asked to emit it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSentimentResult {
    #[serde(default)]
    pub ticker: Option<String>,
    pub sentiment: String,
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: String,
}

/// Validated sentiment for one ticker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentimentAssessment {
    pub ticker: String,
    pub sentiment: Sentiment,
    pub confidence: f64,
    pub reasoning: String,
}

impl LlmSentimentResult {
    pub fn validate_and_into_assessment(
        self,
        expected_ticker: &str,
    ) -> anyhow::Result<SentimentAssessment> {
        // The model may omit the ticker; a different one is a contract violation.
        let ticker = match self.ticker.as_deref().map(str::trim) {
            None | Some("") => expected_ticker.to_string(),
            Some(t) => {
                ensure!(
                    t.eq_ignore_ascii_case(expected_ticker),
                    "LLM output ticker mismatch: expected {expected_ticker}, got {t}"
                );
                expected_ticker.to_string()
            }
        };

        let sentiment = self
            .sentiment
            .trim()
            .to_ascii_lowercase()
            .parse::<Sentiment>()
            .context("LLM output has an invalid sentiment label")?;

        ensure!(
            self.confidence.is_finite() && (0.0..=1.0).contains(&self.confidence),
            "confidence must be between 0 and 1 (got {})",
            self.confidence
        );

        Ok(SentimentAssessment {
            ticker,
            sentiment,
            confidence: self.confidence,
            reasoning: self.reasoning.trim().to_string(),
        })
    }
}
