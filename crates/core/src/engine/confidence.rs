//! Confidence scoring: fuses creator consensus, technical alignment, volume, and creator track
//! record into one weighted score in `[0, 1]`.

use crate::domain::sentiment::Sentiment;
use crate::engine::config::{exceeds_sum_tolerance, ConfigError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Volume component used when no 20-day average is available.
pub const DEFAULT_VOLUME_CONFIRMATION: f64 = 0.5;

/// Accuracy component used when none of the creators has a track record.
pub const DEFAULT_ACCURACY_PRIOR: f64 = 0.5;

const VOLUME_RATIO_FLOOR: f64 = 0.5;
const VOLUME_RATIO_CEILING: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceWeights {
    pub creator_consensus: f64,
    pub technical_alignment: f64,
    pub volume_confirmation: f64,
    pub historical_accuracy: f64,
}

impl Default for ConfidenceWeights {
    fn default() -> Self {
        Self {
            creator_consensus: 0.30,
            technical_alignment: 0.30,
            volume_confirmation: 0.20,
            historical_accuracy: 0.20,
        }
    }
}

impl ConfidenceWeights {
    pub fn sum(&self) -> f64 {
        self.creator_consensus
            + self.technical_alignment
            + self.volume_confirmation
            + self.historical_accuracy
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let named = [
            ("creator_consensus", self.creator_consensus),
            ("technical_alignment", self.technical_alignment),
            ("volume_confirmation", self.volume_confirmation),
            ("historical_accuracy", self.historical_accuracy),
        ];
        for (name, value) in named {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::InvalidWeight { name, value });
            }
        }

        let sum = self.sum();
        if exceeds_sum_tolerance((sum - 1.0).abs()) {
            return Err(ConfigError::WeightsNotNormalized { sum });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfidenceInputs {
    pub ticker: String,
    pub creator_sentiments: BTreeMap<String, Sentiment>,
    pub technical_signals: Vec<Sentiment>,
    pub current_volume: u64,
    pub avg_volume: u64,
    /// creator -> historical accuracy in `[0, 1]`
    pub creator_accuracy: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceScore {
    pub overall: f64,
    pub creator_consensus: f64,
    pub technical_alignment: f64,
    pub volume_confirmation: f64,
    pub historical_accuracy: f64,
    pub direction: Sentiment,
    pub breakdown: String,
}

impl ConfidenceScore {
    #[cfg(test)]
    pub(crate) fn from_overall(overall: f64) -> Self {
        Self {
            overall,
            creator_consensus: 0.0,
            technical_alignment: 0.0,
            volume_confirmation: 0.0,
            historical_accuracy: 0.0,
            direction: Sentiment::Neutral,
            breakdown: format_breakdown(0.0, 0.0, 0.0, 0.0),
        }
    }

    pub fn percent(&self) -> f64 {
        self.overall * 100.0
    }
}

pub fn calculate_confidence(inputs: &ConfidenceInputs, weights: &ConfidenceWeights) -> ConfidenceScore {
    let (creator_consensus, direction) = creator_consensus(&inputs.creator_sentiments);
    let technical_alignment = technical_alignment(&inputs.technical_signals, direction);
    let volume_confirmation = volume_confirmation(inputs.current_volume, inputs.avg_volume);
    let historical_accuracy = historical_accuracy(&inputs.creator_accuracy);

    let overall = creator_consensus * weights.creator_consensus
        + technical_alignment * weights.technical_alignment
        + volume_confirmation * weights.volume_confirmation
        + historical_accuracy * weights.historical_accuracy;

    ConfidenceScore {
        overall,
        creator_consensus,
        technical_alignment,
        volume_confirmation,
        historical_accuracy,
        direction,
        breakdown: format_breakdown(
            creator_consensus,
            technical_alignment,
            volume_confirmation,
            historical_accuracy,
        ),
    }
}

fn count(labels: impl IntoIterator<Item = Sentiment>) -> (usize, usize, usize) {
    let (mut bullish, mut bearish, mut total) = (0, 0, 0);
    for label in labels {
        total += 1;
        match label {
            Sentiment::Bullish => bullish += 1,
            Sentiment::Bearish => bearish += 1,
            Sentiment::Neutral => {}
        }
    }
    (bullish, bearish, total)
}

fn creator_consensus(sentiments: &BTreeMap<String, Sentiment>) -> (f64, Sentiment) {
    let (bullish, bearish, total) = count(sentiments.values().copied());
    if total == 0 {
        return (0.0, Sentiment::Neutral);
    }

    let total = total as f64;
    if bullish > bearish {
        (bullish as f64 / total, Sentiment::Bullish)
    } else if bearish > bullish {
        (bearish as f64 / total, Sentiment::Bearish)
    } else {
        // Split vote.
        (0.5, Sentiment::Neutral)
    }
}

fn technical_alignment(signals: &[Sentiment], direction: Sentiment) -> f64 {
    let (bullish, bearish, total) = count(signals.iter().copied());
    if total == 0 {
        return 0.0;
    }

    let matching = match direction {
        Sentiment::Bullish => bullish,
        Sentiment::Bearish => bearish,
        Sentiment::Neutral => bullish.max(bearish),
    };
    matching as f64 / total as f64
}

fn volume_confirmation(current: u64, avg: u64) -> f64 {
    if avg == 0 {
        return DEFAULT_VOLUME_CONFIRMATION;
    }

    let ratio = current as f64 / avg as f64;
    if ratio >= VOLUME_RATIO_CEILING {
        1.0
    } else if ratio <= VOLUME_RATIO_FLOOR {
        0.0
    } else {
        (ratio - VOLUME_RATIO_FLOOR) / (VOLUME_RATIO_CEILING - VOLUME_RATIO_FLOOR)
    }
}

fn historical_accuracy(rates: &BTreeMap<String, f64>) -> f64 {
    if rates.is_empty() {
        return DEFAULT_ACCURACY_PRIOR;
    }
    rates.values().sum::<f64>() / rates.len() as f64
}

fn format_breakdown(creator: f64, technical: f64, volume: f64, history: f64) -> String {
    format!(
        "Creator: {:.0}% | Technical: {:.0}% | Volume: {:.0}% | History: {:.0}%",
        creator * 100.0,
        technical * 100.0,
        volume * 100.0,
        history * 100.0
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    fn sentiments(pairs: &[(&str, Sentiment)]) -> BTreeMap<String, Sentiment> {
        pairs.iter().map(|(c, s)| (c.to_string(), *s)).collect()
    }

    fn accuracy(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
        pairs.iter().map(|(c, a)| (c.to_string(), *a)).collect()
    }

    #[test]
    fn default_weights_are_normalized() {
        let w = ConfidenceWeights::default();
        assert!(!exceeds_sum_tolerance((w.sum() - 1.0).abs()));
        assert!(w.validate().is_ok());
    }

    #[test]
    fn sums_on_the_tolerance_edge_are_accepted() {
        let weights = |historical_accuracy| ConfidenceWeights {
            creator_consensus: 0.3,
            technical_alignment: 0.3,
            volume_confirmation: 0.2,
            historical_accuracy,
        };
        assert!(weights(0.21).validate().is_ok());
        assert!(weights(0.19).validate().is_ok());
        assert!(matches!(
            weights(0.22).validate(),
            Err(ConfigError::WeightsNotNormalized { .. })
        ));
        assert!(matches!(
            weights(0.18).validate(),
            Err(ConfigError::WeightsNotNormalized { .. })
        ));
    }

    #[test]
    fn weight_validation() {
        let mut w = ConfidenceWeights::default();
        w.historical_accuracy = 0.205;
        assert!(w.validate().is_ok());

        w.historical_accuracy = 0.25;
        assert!(matches!(
            w.validate(),
            Err(ConfigError::WeightsNotNormalized { .. })
        ));

        let w = ConfidenceWeights {
            creator_consensus: -0.1,
            technical_alignment: 0.5,
            volume_confirmation: 0.3,
            historical_accuracy: 0.3,
        };
        assert!(matches!(
            w.validate(),
            Err(ConfigError::InvalidWeight {
                name: "creator_consensus",
                ..
            })
        ));

        let w = ConfidenceWeights {
            creator_consensus: f64::NAN,
            ..ConfidenceWeights::default()
        };
        assert!(w.validate().is_err());
    }

    #[test]
    fn all_bullish_inputs_score_high() {
        let inputs = ConfidenceInputs {
            ticker: "SPY".to_string(),
            creator_sentiments: sentiments(&[
                ("creator1", Sentiment::Bullish),
                ("creator2", Sentiment::Bullish),
                ("creator3", Sentiment::Bullish),
            ]),
            technical_signals: vec![Sentiment::Bullish; 4],
            current_volume: 100_000_000,
            avg_volume: 50_000_000,
            creator_accuracy: accuracy(&[("creator1", 0.8), ("creator2", 0.7), ("creator3", 0.9)]),
        };

        let score = calculate_confidence(&inputs, &ConfidenceWeights::default());
        assert_eq!(score.direction, Sentiment::Bullish);
        assert!((score.creator_consensus - 1.0).abs() < EPS);
        assert!((score.technical_alignment - 1.0).abs() < EPS);
        assert!((score.volume_confirmation - 1.0).abs() < EPS);
        assert!((score.historical_accuracy - 0.8).abs() < EPS);
        // 0.3 + 0.3 + 0.2 + 0.16
        assert!((score.overall - 0.96).abs() < EPS);
    }

    #[test]
    fn bearish_majority_sets_direction_and_alignment() {
        let inputs = ConfidenceInputs {
            ticker: "QQQ".to_string(),
            creator_sentiments: sentiments(&[
                ("a", Sentiment::Bearish),
                ("b", Sentiment::Bearish),
                ("c", Sentiment::Neutral),
                ("d", Sentiment::Bullish),
            ]),
            technical_signals: vec![Sentiment::Bearish, Sentiment::Bullish, Sentiment::Neutral, Sentiment::Bearish],
            ..Default::default()
        };
        let score = calculate_confidence(&inputs, &ConfidenceWeights::default());
        assert_eq!(score.direction, Sentiment::Bearish);
        assert!((score.creator_consensus - 0.5).abs() < EPS);
        assert!((score.technical_alignment - 0.5).abs() < EPS);
    }

    #[test]
    fn split_vote_is_neutral_with_half_consensus() {
        let inputs = ConfidenceInputs {
            ticker: "SPY".to_string(),
            creator_sentiments: sentiments(&[("a", Sentiment::Bullish), ("b", Sentiment::Bearish)]),
            technical_signals: vec![Sentiment::Bullish, Sentiment::Bearish],
            current_volume: 30_000_000,
            avg_volume: 50_000_000,
            creator_accuracy: accuracy(&[("a", 0.5), ("b", 0.5)]),
        };
        let score = calculate_confidence(&inputs, &ConfidenceWeights::default());
        assert_eq!(score.direction, Sentiment::Neutral);
        assert_eq!(score.creator_consensus, 0.5);
        // Neutral direction takes the larger side; tie gives 1/2.
        assert!((score.technical_alignment - 0.5).abs() < EPS);
        // ratio 0.6 -> (0.6 - 0.5) / 1.5
        assert!((score.volume_confirmation - 0.1 / 1.5).abs() < EPS);
        assert!(score.overall > 0.3 && score.overall < 0.6);
    }

    #[test]
    fn neutral_only_creators_tie_at_zero() {
        let inputs = ConfidenceInputs {
            creator_sentiments: sentiments(&[("a", Sentiment::Neutral), ("b", Sentiment::Neutral)]),
            technical_signals: vec![Sentiment::Bearish, Sentiment::Bearish, Sentiment::Bullish],
            ..Default::default()
        };
        let score = calculate_confidence(&inputs, &ConfidenceWeights::default());
        assert_eq!(score.direction, Sentiment::Neutral);
        assert_eq!(score.creator_consensus, 0.5);
        assert!((score.technical_alignment - 2.0 / 3.0).abs() < EPS);
    }

    #[test]
    fn empty_inputs_fall_back_to_defaults() {
        let score = calculate_confidence(&ConfidenceInputs::default(), &ConfidenceWeights::default());
        assert_eq!(score.direction, Sentiment::Neutral);
        assert_eq!(score.creator_consensus, 0.0);
        assert_eq!(score.technical_alignment, 0.0);
        assert_eq!(score.volume_confirmation, DEFAULT_VOLUME_CONFIRMATION);
        assert_eq!(score.historical_accuracy, DEFAULT_ACCURACY_PRIOR);
        assert!((score.overall - 0.20).abs() < EPS);
        assert!(score.overall > 0.0);
    }

    #[test]
    fn volume_interpolation_anchors() {
        assert_eq!(volume_confirmation(100, 100), (1.0 - 0.5) / 1.5);
        assert!((volume_confirmation(100, 100) - 0.333_333_333_3).abs() < 1e-9);
        assert_eq!(volume_confirmation(200, 100), 1.0);
        assert_eq!(volume_confirmation(500, 100), 1.0);
        assert_eq!(volume_confirmation(50, 100), 0.0);
        assert_eq!(volume_confirmation(10, 100), 0.0);
        assert_eq!(volume_confirmation(0, 0), DEFAULT_VOLUME_CONFIRMATION);
        assert_eq!(volume_confirmation(1_000, 0), DEFAULT_VOLUME_CONFIRMATION);
        assert!((volume_confirmation(125, 100) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn overall_stays_in_unit_interval() {
        let labels = [Sentiment::Bullish, Sentiment::Bearish, Sentiment::Neutral];
        let weights = ConfidenceWeights::default();
        for creators in 0..4usize {
            for signals in 0..5usize {
                for (cur, avg) in [(0u64, 0u64), (1, 10), (10, 10), (40, 10), (u64::MAX, 1)] {
                    for acc in [0.0, 0.37, 1.0] {
                        let inputs = ConfidenceInputs {
                            ticker: "X".to_string(),
                            creator_sentiments: (0..creators)
                                .map(|i| (format!("c{i}"), labels[i % 3]))
                                .collect(),
                            technical_signals: (0..signals).map(|i| labels[(i + 1) % 3]).collect(),
                            current_volume: cur,
                            avg_volume: avg,
                            creator_accuracy: (0..creators).map(|i| (format!("c{i}"), acc)).collect(),
                        };
                        let score = calculate_confidence(&inputs, &weights);
                        assert!(
                            (0.0..=1.0).contains(&score.overall),
                            "overall out of range: {}",
                            score.overall
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn breakdown_is_always_populated() {
        let score = calculate_confidence(&ConfidenceInputs::default(), &ConfidenceWeights::default());
        assert_eq!(
            score.breakdown,
            "Creator: 0% | Technical: 0% | Volume: 50% | History: 50%"
        );
        assert!(!ConfidenceScore::from_overall(0.7).breakdown.is_empty());
    }
}
