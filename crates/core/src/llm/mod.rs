pub mod anthropic;
pub mod error;
pub mod json;

use crate::domain::contract::SentimentAssessment;
use crate::engine::signals::TechnicalIndicators;

/// Everything the model sees when judging one ticker.
#[derive(Debug, Clone)]
pub struct SentimentInput {
    pub ticker: String,
    pub creator_content: Vec<String>,
    pub market_context: String,
}

#[async_trait::async_trait]
pub trait LlmClient: Send + Sync {
    fn provider_name(&self) -> &'static str;

    async fn analyze_sentiment(&self, input: SentimentInput) -> anyhow::Result<SentimentAssessment>;
}

/// One-line summary of a ticker's latest technicals for the prompt.
pub fn describe_market(ind: &TechnicalIndicators) -> String {
    let mut parts = Vec::new();

    if let Some(close) = ind.latest_close {
        parts.push(format!("Current price: ${close:.2}"));
    }

    if let Some(rsi) = ind.rsi_14 {
        let zone = if rsi > 70.0 {
            " (overbought)"
        } else if rsi < 30.0 {
            " (oversold)"
        } else {
            ""
        };
        parts.push(format!("RSI(14): {rsi:.1}{zone}"));
    }

    if let (Some(sma50), Some(sma200)) = (ind.sma_50, ind.sma_200) {
        parts.push(if sma50 > sma200 {
            "Golden cross (bullish trend)".to_string()
        } else {
            "Death cross (bearish trend)".to_string()
        });
    }

    if let (Some(macd), Some(signal)) = (ind.macd, ind.macd_signal) {
        parts.push(format!(
            "MACD {} signal",
            if macd > signal { "above" } else { "below" }
        ));
    }

    parts.join(", ")
}
