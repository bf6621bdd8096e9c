use crate::domain::sentiment::Sentiment;
use serde::{Deserialize, Serialize};

const RSI_OVERSOLD: f64 = 30.0;
const RSI_OVERBOUGHT: f64 = 70.0;

/// Latest indicator snapshot for one ticker. Every field may be absent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TechnicalIndicators {
    pub rsi_14: Option<f64>,
    pub sma_50: Option<f64>,
    pub sma_200: Option<f64>,
    pub macd: Option<f64>,
    pub macd_signal: Option<f64>,
    pub latest_close: Option<f64>,
}

// Upstream rows collapse missing values to zero, so zero is read as "not available".
fn present(v: Option<f64>) -> Option<f64> {
    v.filter(|x| *x != 0.0)
}

/// Turns indicator values into directional signals, one per rule whose inputs are present.
pub fn technical_signals(ind: &TechnicalIndicators) -> Vec<Sentiment> {
    let mut signals = Vec::with_capacity(4);

    if let Some(rsi) = present(ind.rsi_14) {
        signals.push(if rsi < RSI_OVERSOLD {
            Sentiment::Bullish
        } else if rsi > RSI_OVERBOUGHT {
            Sentiment::Bearish
        } else {
            Sentiment::Neutral
        });
    }

    // Golden / death cross.
    if let (Some(sma50), Some(sma200)) = (present(ind.sma_50), present(ind.sma_200)) {
        signals.push(if sma50 > sma200 {
            Sentiment::Bullish
        } else {
            Sentiment::Bearish
        });
    }

    if let (Some(sma200), Some(price)) = (present(ind.sma_200), present(ind.latest_close)) {
        signals.push(if price > sma200 {
            Sentiment::Bullish
        } else {
            Sentiment::Bearish
        });
    }

    if let (Some(macd), Some(signal)) = (present(ind.macd), present(ind.macd_signal)) {
        signals.push(if macd > signal {
            Sentiment::Bullish
        } else {
            Sentiment::Bearish
        });
    }

    signals
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full(rsi: f64) -> TechnicalIndicators {
        TechnicalIndicators {
            rsi_14: Some(rsi),
            sma_50: Some(110.0),
            sma_200: Some(100.0),
            macd: Some(1.5),
            macd_signal: Some(1.0),
            latest_close: Some(120.0),
        }
    }

    #[test]
    fn empty_indicators_produce_no_signals() {
        assert!(technical_signals(&TechnicalIndicators::default()).is_empty());
    }

    #[test]
    fn all_rules_fire_in_order() {
        let signals = technical_signals(&full(25.0));
        assert_eq!(signals, vec![Sentiment::Bullish; 4]);
    }

    #[test]
    fn rsi_bands() {
        let only_rsi = |rsi| TechnicalIndicators {
            rsi_14: Some(rsi),
            ..Default::default()
        };
        assert_eq!(technical_signals(&only_rsi(29.9)), vec![Sentiment::Bullish]);
        assert_eq!(technical_signals(&only_rsi(30.0)), vec![Sentiment::Neutral]);
        assert_eq!(technical_signals(&only_rsi(70.0)), vec![Sentiment::Neutral]);
        assert_eq!(technical_signals(&only_rsi(70.1)), vec![Sentiment::Bearish]);
    }

    #[test]
    fn death_cross_and_price_below_trend() {
        let ind = TechnicalIndicators {
            sma_50: Some(90.0),
            sma_200: Some(100.0),
            latest_close: Some(95.0),
            ..Default::default()
        };
        assert_eq!(
            technical_signals(&ind),
            vec![Sentiment::Bearish, Sentiment::Bearish]
        );
    }

    #[test]
    fn equal_values_resolve_bearish() {
        let ind = TechnicalIndicators {
            sma_50: Some(100.0),
            sma_200: Some(100.0),
            macd: Some(0.5),
            macd_signal: Some(0.5),
            ..Default::default()
        };
        assert_eq!(
            technical_signals(&ind),
            vec![Sentiment::Bearish, Sentiment::Bearish]
        );
    }

    #[test]
    fn zero_values_are_treated_as_missing() {
        let mut ind = full(50.0);
        ind.macd = Some(0.0);
        ind.latest_close = Some(0.0);
        let signals = technical_signals(&ind);
        // RSI neutral + golden cross only.
        assert_eq!(signals, vec![Sentiment::Neutral, Sentiment::Bullish]);

        ind.rsi_14 = Some(0.0);
        assert_eq!(technical_signals(&ind), vec![Sentiment::Bullish]);
    }

    #[test]
    fn macd_needs_both_lines() {
        let ind = TechnicalIndicators {
            macd: Some(-0.4),
            macd_signal: None,
            ..Default::default()
        };
        assert!(technical_signals(&ind).is_empty());
    }
}
