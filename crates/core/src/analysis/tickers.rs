use std::collections::BTreeSet;

/// Symbols recognised even without a `$` prefix.
pub const KNOWN_TICKERS: [&str; 12] = [
    "SPY", "QQQ", "VOO", "VTI", "PLTR", "AAPL", "MSFT", "GOOGL", "AMZN", "NVDA", "META", "TSLA",
];

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Returns the tickers mentioned in `text`, sorted and de-duplicated.
///
/// A cashtag is `$` followed by a whole word of 1-5 uppercase letters (`$NVDA`, `$SPY's`).
/// Known tickers also count as bare whole words.
pub fn extract_tickers(text: &str) -> Vec<String> {
    let mut found = BTreeSet::new();

    let mut rest = text;
    while let Some(pos) = rest.find('$') {
        let after = &rest[pos + 1..];
        let end = after.find(|c: char| !is_word_char(c)).unwrap_or(after.len());
        let word = &after[..end];
        if (1..=5).contains(&word.len()) && word.chars().all(|c| c.is_ascii_uppercase()) {
            found.insert(word.to_string());
        }
        rest = after;
    }

    for word in text.split(|c: char| !is_word_char(c)) {
        if KNOWN_TICKERS.contains(&word) {
            found.insert(word.to_string());
        }
    }

    found.into_iter().collect()
}
