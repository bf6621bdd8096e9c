use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// `GLOBAL_QUOTE` payload as Alpha Vantage returns it: every field is a string.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlobalQuoteResponse {
    #[serde(rename = "Global Quote", default)]
    pub global_quote: RawGlobalQuote,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawGlobalQuote {
    #[serde(rename = "01. symbol", default)]
    pub symbol: String,
    #[serde(rename = "02. open", default)]
    pub open: String,
    #[serde(rename = "03. high", default)]
    pub high: String,
    #[serde(rename = "04. low", default)]
    pub low: String,
    #[serde(rename = "05. price", default)]
    pub price: String,
    #[serde(rename = "06. volume", default)]
    pub volume: String,
    #[serde(rename = "07. latest trading day", default)]
    pub latest_trading_day: String,
}

/// One OHLCV observation for a ticker, ready for `market_data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketBar {
    pub ticker: String,
    pub timestamp: DateTime<Utc>,
    pub trading_day: Option<NaiveDate>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
}

impl MarketBar {
    /// Session the bar belongs to: the provider's trading day, else the fetch date.
    pub fn session_day(&self) -> NaiveDate {
        self.trading_day
            .unwrap_or_else(|| self.timestamp.date_naive())
    }
}
