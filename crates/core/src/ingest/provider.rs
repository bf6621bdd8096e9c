use crate::config::Settings;
use crate::ingest::types::{GlobalQuoteResponse, MarketBar, RawGlobalQuote};
use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use serde_json::Value;
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://www.alphavantage.co/query";
const DEFAULT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_RETRIES: u32 = 3;
const MAX_RETRIES: u32 = 10;
const MAX_BACKOFF_SECS: u64 = 60;
// Free tier allows five requests per minute.
const DEFAULT_DELAY_SECS: u64 = 15;

#[async_trait::async_trait]
pub trait MarketDataClient: Send + Sync {
    fn provider_name(&self) -> &'static str;

    /// Pause to observe between consecutive quote requests.
    fn request_delay(&self) -> Duration {
        Duration::ZERO
    }

    async fn fetch_quote(&self, ticker: &str) -> Result<(MarketBar, Value)>;
}

#[derive(Debug, Clone)]
pub struct AlphaVantageClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    retries: u32,
    delay: Duration,
}

impl AlphaVantageClient {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let api_key = settings.require_alphavantage_api_key()?.to_string();

        let base_url = std::env::var("ALPHAVANTAGE_BASE_URL")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        let timeout_secs = std::env::var("ALPHAVANTAGE_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let retries = std::env::var("ALPHAVANTAGE_RETRIES")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_RETRIES)
            .min(MAX_RETRIES);

        let delay_secs = std::env::var("ALPHAVANTAGE_DELAY_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_DELAY_SECS);

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build alpha vantage http client")?;

        Ok(Self {
            http,
            base_url,
            api_key,
            retries,
            delay: Duration::from_secs(delay_secs),
        })
    }

    async fn fetch_once(&self, ticker: &str) -> Result<(MarketBar, Value)> {
        let res = self
            .http
            .get(&self.base_url)
            .query(&[
                ("function", "GLOBAL_QUOTE"),
                ("symbol", ticker),
                ("apikey", self.api_key.as_str()),
            ])
            .send()
            .await
            .context("alpha vantage request failed")?;

        let status = res.status();
        let text = res
            .text()
            .await
            .context("failed to read alpha vantage response")?;

        if !status.is_success() {
            anyhow::bail!("alpha vantage HTTP {status}: {text}");
        }

        let raw_json = serde_json::from_str::<Value>(&text)
            .with_context(|| format!("alpha vantage response is not valid JSON: {text}"))?;

        // Throttled requests come back 200 with a "Note"/"Information" message and no quote.
        if let Some(msg) = raw_json
            .get("Note")
            .or_else(|| raw_json.get("Information"))
            .and_then(Value::as_str)
        {
            anyhow::bail!("alpha vantage refused request for {ticker}: {msg}");
        }

        let parsed = serde_json::from_value::<GlobalQuoteResponse>(raw_json.clone())
            .context("failed to parse alpha vantage GLOBAL_QUOTE response")?;
        let bar = parse_quote(ticker, &parsed.global_quote)?;
        Ok((bar, raw_json))
    }
}

#[async_trait::async_trait]
impl MarketDataClient for AlphaVantageClient {
    fn provider_name(&self) -> &'static str {
        "alphavantage"
    }

    fn request_delay(&self) -> Duration {
        self.delay
    }

    async fn fetch_quote(&self, ticker: &str) -> Result<(MarketBar, Value)> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.fetch_once(ticker).await {
                Ok(out) => return Ok(out),
                Err(err) => {
                    if attempt >= self.retries {
                        return Err(err);
                    }
                    let backoff = backoff_for(attempt);
                    tracing::warn!(%ticker, attempt, ?backoff, error = %err, "quote fetch failed; retrying");
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
}

/// Exponential backoff after the `attempt`-th failure (1-based), capped at a minute.
fn backoff_for(attempt: u32) -> Duration {
    let secs = 1u64
        .checked_shl(attempt.saturating_sub(1))
        .unwrap_or(u64::MAX)
        .min(MAX_BACKOFF_SECS);
    Duration::from_secs(secs)
}

/// Converts the stringly-typed quote into a bar. An empty symbol usually means rate limiting.
pub fn parse_quote(ticker: &str, quote: &RawGlobalQuote) -> Result<MarketBar> {
    anyhow::ensure!(
        !quote.symbol.trim().is_empty(),
        "empty quote for {ticker}; the API may be rate limiting"
    );

    let field = |name: &str, raw: &str| -> Result<f64> {
        let v = raw
            .trim()
            .parse::<f64>()
            .with_context(|| format!("{ticker}: {name} is not numeric: {raw:?}"))?;
        anyhow::ensure!(v.is_finite() && v >= 0.0, "{ticker}: {name} out of range: {v}");
        Ok(v)
    };

    let volume = quote
        .volume
        .trim()
        .parse::<i64>()
        .with_context(|| format!("{ticker}: volume is not an integer: {:?}", quote.volume))?;
    anyhow::ensure!(volume >= 0, "{ticker}: negative volume {volume}");

    Ok(MarketBar {
        ticker: ticker.to_string(),
        timestamp: Utc::now(),
        trading_day: NaiveDate::parse_from_str(quote.latest_trading_day.trim(), "%Y-%m-%d").ok(),
        open: field("open", &quote.open)?,
        high: field("high", &quote.high)?,
        low: field("low", &quote.low)?,
        close: field("price", &quote.price)?,
        volume,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_then_caps() {
        assert_eq!(backoff_for(1), Duration::from_secs(1));
        assert_eq!(backoff_for(3), Duration::from_secs(4));
        assert_eq!(backoff_for(7), Duration::from_secs(MAX_BACKOFF_SECS));
        assert_eq!(backoff_for(65), Duration::from_secs(MAX_BACKOFF_SECS));
        assert_eq!(backoff_for(u32::MAX), Duration::from_secs(MAX_BACKOFF_SECS));
    }
    use serde_json::json;

    fn sample() -> Value {
        json!({
            "Global Quote": {
                "01. symbol": "SPY",
                "02. open": "580.1000",
                "03. high": "584.2500",
                "04. low": "579.0000",
                "05. price": "583.6400",
                "06. volume": "51234567",
                "07. latest trading day": "2026-10-14",
                "08. previous close": "579.5800",
                "09. change": "4.0600",
                "10. change percent": "0.7005%"
            }
        })
    }

    #[test]
    fn parses_global_quote() {
        let parsed: GlobalQuoteResponse = serde_json::from_value(sample()).unwrap();
        let bar = parse_quote("SPY", &parsed.global_quote).unwrap();
        assert_eq!(bar.ticker, "SPY");
        assert_eq!(bar.close, 583.64);
        assert_eq!(bar.volume, 51_234_567);
        assert_eq!(bar.trading_day, NaiveDate::from_ymd_opt(2026, 10, 14));
    }

    #[test]
    fn empty_quote_is_an_error() {
        let parsed: GlobalQuoteResponse = serde_json::from_value(json!({"Global Quote": {}})).unwrap();
        let err = parse_quote("QQQ", &parsed.global_quote).unwrap_err();
        assert!(err.to_string().contains("rate limiting"));
    }

    #[test]
    fn rejects_non_numeric_fields() {
        let mut v = sample();
        v["Global Quote"]["05. price"] = json!("n/a");
        let parsed: GlobalQuoteResponse = serde_json::from_value(v).unwrap();
        assert!(parse_quote("SPY", &parsed.global_quote).is_err());

        let mut v = sample();
        v["Global Quote"]["06. volume"] = json!("12.5");
        let parsed: GlobalQuoteResponse = serde_json::from_value(v).unwrap();
        assert!(parse_quote("SPY", &parsed.global_quote).is_err());
    }
}
