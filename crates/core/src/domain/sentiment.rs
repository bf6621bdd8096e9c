use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Directional label shared by creator sentiment, technical signals, and score direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Bullish,
    Bearish,
    #[default]
    Neutral,
}

impl Sentiment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sentiment::Bullish => "bullish",
            Sentiment::Bearish => "bearish",
            Sentiment::Neutral => "neutral",
        }
    }
}

impl fmt::Display for Sentiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownSentiment(pub String);

impl fmt::Display for UnknownSentiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unrecognized sentiment label: {:?}", self.0)
    }
}

impl std::error::Error for UnknownSentiment {}

impl FromStr for Sentiment {
    type Err = UnknownSentiment;

    // Labels are matched exactly; the store and the LLM contract both emit lowercase.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bullish" => Ok(Sentiment::Bullish),
            "bearish" => Ok(Sentiment::Bearish),
            "neutral" => Ok(Sentiment::Neutral),
            other => Err(UnknownSentiment(other.to_string())),
        }
    }
}

/// Converts raw `(creator, label)` rows into typed sentiments.
///
/// Rows with an unrecognized label are dropped entirely, so they count neither toward a side
/// nor toward the creator total. A later row for the same creator replaces an earlier one.
pub fn creator_sentiments_from_raw<I, C, L>(rows: I) -> BTreeMap<String, Sentiment>
where
    I: IntoIterator<Item = (C, L)>,
    C: Into<String>,
    L: AsRef<str>,
{
    let mut out = BTreeMap::new();
    for (creator, label) in rows {
        let creator = creator.into();
        match label.as_ref().parse::<Sentiment>() {
            Ok(sentiment) => {
                out.insert(creator, sentiment);
            }
            Err(err) => {
                tracing::debug!(%creator, error = %err, "ignoring creator sentiment");
            }
        }
    }
    out
}
