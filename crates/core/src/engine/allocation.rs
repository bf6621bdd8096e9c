//! Maps a confidence score and market regime to an action and dollar amount.
//!
//! Core tickers start from a fixed share of the budget and pass through an ordered rule list
//! (first match wins). Every other ticker is a satellite funded from a flat risk sleeve.

use crate::domain::recommendation::Action;
use crate::engine::confidence::ConfidenceScore;
use crate::engine::config::{exceeds_sum_tolerance, ConfigError};
use crate::engine::regime::MarketRegime;
use std::collections::BTreeMap;

/// Minimum overall confidence for a satellite buy.
pub const SATELLITE_MIN_CONFIDENCE: f64 = 0.6;

/// Share of the budget a qualifying satellite receives.
pub const SATELLITE_BUDGET_FRACTION: f64 = 0.10;

#[derive(Debug, Clone, PartialEq)]
pub struct CoreAllocationTable {
    fractions: BTreeMap<String, f64>,
}

impl Default for CoreAllocationTable {
    fn default() -> Self {
        Self::new([("SPY", 0.40), ("QQQ", 0.30), ("VOO", 0.20), ("VTI", 0.10)])
    }
}

impl CoreAllocationTable {
    pub fn new<I, T>(entries: I) -> Self
    where
        I: IntoIterator<Item = (T, f64)>,
        T: Into<String>,
    {
        Self {
            fractions: entries.into_iter().map(|(t, f)| (t.into(), f)).collect(),
        }
    }

    /// A table with no core tickers: everything is treated as a satellite.
    pub fn empty() -> Self {
        Self {
            fractions: BTreeMap::new(),
        }
    }

    pub fn fraction(&self, ticker: &str) -> Option<f64> {
        self.fractions.get(ticker).copied()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (ticker, &fraction) in &self.fractions {
            if !fraction.is_finite() || !(0.0..=1.0).contains(&fraction) {
                return Err(ConfigError::InvalidCoreFraction {
                    ticker: ticker.clone(),
                    fraction,
                });
            }
        }

        let sum: f64 = self.fractions.values().sum();
        if exceeds_sum_tolerance(sum - 1.0) {
            return Err(ConfigError::CoreTableOverallocated { sum });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Allocation {
    pub action: Action,
    pub amount: f64,
    pub reasoning: String,
}

/// One rung of the core-ticker ladder.
#[derive(Debug, Clone, Copy)]
pub struct AllocationRule {
    pub name: &'static str,
    pub applies: fn(score: f64, regime: MarketRegime) -> bool,
    pub multiplier: f64,
    /// Ceiling on the multiplier, applied after it.
    pub cap: Option<f64>,
    pub reasoning: fn(percent: f64) -> String,
}

impl AllocationRule {
    fn apply(&self, base: f64) -> f64 {
        let amount = base * self.multiplier;
        match self.cap {
            Some(cap) => amount.min(base * cap),
            None => amount,
        }
    }
}

/// Ordered, first match wins. The last rule always applies.
pub static CORE_RULES: [AllocationRule; 5] = [
    AllocationRule {
        name: "low_confidence",
        applies: |score, _| score < 0.4,
        multiplier: 0.25,
        cap: None,
        reasoning: |pct| format!("Reduced allocation due to low confidence ({pct:.0}%)"),
    },
    AllocationRule {
        name: "moderate_confidence",
        applies: |score, _| score < 0.6,
        multiplier: 0.5,
        cap: None,
        reasoning: |pct| format!("Reduced allocation due to moderate confidence ({pct:.0}%)"),
    },
    AllocationRule {
        name: "bearish_regime",
        applies: |_, regime| regime == MarketRegime::Bearish,
        multiplier: 0.75,
        cap: None,
        reasoning: |pct| format!("Bearish regime - conservative allocation ({pct:.0}% confidence)"),
    },
    AllocationRule {
        name: "bullish_high_confidence",
        applies: |score, regime| regime == MarketRegime::Bullish && score > 0.8,
        multiplier: 1.1,
        cap: Some(1.2),
        reasoning: |pct| {
            format!("Bullish regime with high confidence ({pct:.0}%) - increased allocation")
        },
    },
    AllocationRule {
        name: "standard",
        applies: |_, _| true,
        multiplier: 1.0,
        cap: None,
        reasoning: |pct| format!("Standard allocation ({pct:.0}% confidence)"),
    },
];

/// Returns the first core rule matching `score` under `regime`.
pub fn select_core_rule(score: f64, regime: MarketRegime) -> &'static AllocationRule {
    CORE_RULES
        .iter()
        .find(|rule| (rule.applies)(score, regime))
        .unwrap_or(&CORE_RULES[CORE_RULES.len() - 1])
}

pub fn calculate_allocation(
    ticker: &str,
    score: &ConfidenceScore,
    budget: f64,
    regime: MarketRegime,
    table: &CoreAllocationTable,
) -> Allocation {
    let pct = score.percent();

    let Some(fraction) = table.fraction(ticker) else {
        if score.overall < SATELLITE_MIN_CONFIDENCE {
            return Allocation {
                action: Action::Wait,
                amount: 0.0,
                reasoning: format!("Confidence too low ({pct:.0}%) for risk allocation"),
            };
        }
        return Allocation {
            action: Action::Buy,
            amount: budget * SATELLITE_BUDGET_FRACTION,
            reasoning: format!("Risk allocation approved ({pct:.0}% confidence)"),
        };
    };

    let base = budget * fraction;
    let rule = select_core_rule(score.overall, regime);

    Allocation {
        action: Action::Buy,
        // Never hand out more than the whole budget, even from a single-ticker table.
        amount: rule.apply(base).min(budget),
        reasoning: (rule.reasoning)(pct),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    fn alloc(ticker: &str, overall: f64, regime: MarketRegime) -> Allocation {
        calculate_allocation(
            ticker,
            &ConfidenceScore::from_overall(overall),
            1000.0,
            regime,
            &CoreAllocationTable::default(),
        )
    }

    #[test]
    fn rules_are_ordered_with_catch_all_last() {
        let names: Vec<_> = CORE_RULES.iter().map(|r| r.name).collect();
        assert_eq!(
            names,
            vec![
                "low_confidence",
                "moderate_confidence",
                "bearish_regime",
                "bullish_high_confidence",
                "standard"
            ]
        );
        assert!((CORE_RULES[4].applies)(0.0, MarketRegime::Volatile));
    }

    #[test]
    fn each_rule_matches_its_band() {
        assert_eq!(select_core_rule(0.39999, MarketRegime::Calm).name, "low_confidence");
        assert_eq!(select_core_rule(0.40, MarketRegime::Calm).name, "moderate_confidence");
        assert_eq!(select_core_rule(0.5999, MarketRegime::Bearish).name, "moderate_confidence");
        assert_eq!(select_core_rule(0.60, MarketRegime::Bearish).name, "bearish_regime");
        assert_eq!(select_core_rule(0.95, MarketRegime::Bearish).name, "bearish_regime");
        assert_eq!(select_core_rule(0.80, MarketRegime::Bullish).name, "standard");
        assert_eq!(select_core_rule(0.8001, MarketRegime::Bullish).name, "bullish_high_confidence");
        assert_eq!(select_core_rule(0.60, MarketRegime::Calm).name, "standard");
        // Low confidence beats the regime checks.
        assert_eq!(select_core_rule(0.2, MarketRegime::Bullish).name, "low_confidence");
    }

    #[test]
    fn severe_tier_boundary() {
        let at = alloc("SPY", 0.40, MarketRegime::Calm);
        assert!((at.amount - 200.0).abs() < EPS, "0.40 is moderate: {}", at.amount);

        let below = alloc("SPY", 0.3999, MarketRegime::Calm);
        assert!((below.amount - 100.0).abs() < EPS);
        assert_eq!(below.action, Action::Buy);
        assert!(below.reasoning.contains("low confidence"));
    }

    #[test]
    fn moderate_tier_boundary() {
        let below = alloc("VOO", 0.5999, MarketRegime::Calm);
        assert!((below.amount - 100.0).abs() < EPS);
        let at = alloc("VOO", 0.60, MarketRegime::Calm);
        assert!((at.amount - 200.0).abs() < EPS);
        assert!(at.reasoning.starts_with("Standard allocation"));
    }

    #[test]
    fn bullish_boost_boundary_and_cap() {
        let at = alloc("SPY", 0.80, MarketRegime::Bullish);
        assert!((at.amount - 400.0).abs() < EPS);

        let above = alloc("SPY", 0.85, MarketRegime::Bullish);
        assert!((above.amount - 440.0).abs() < EPS);
        assert!(above.amount <= 1000.0 * 0.40 * 1.2);
        assert_eq!(above.action, Action::Buy);
        assert!(above.reasoning.contains("increased allocation"));
        assert!(above.reasoning.contains("85%"));
    }

    #[test]
    fn cap_limits_multiplier() {
        let rule = AllocationRule {
            name: "test",
            applies: |_, _| true,
            multiplier: 1.5,
            cap: Some(1.2),
            reasoning: |_| String::new(),
        };
        assert!((rule.apply(100.0) - 120.0).abs() < EPS);
    }

    #[test]
    fn bearish_regime_trims_core() {
        let a = alloc("QQQ", 0.75, MarketRegime::Bearish);
        assert_eq!(a.action, Action::Buy);
        assert!((a.amount - 225.0).abs() < EPS);
        assert!(a.reasoning.starts_with("Bearish regime"));
    }

    #[test]
    fn satellite_gating() {
        let low = alloc("PLTR", 0.59, MarketRegime::Calm);
        assert_eq!(low.action, Action::Wait);
        assert_eq!(low.amount, 0.0);

        let mid = alloc("PLTR", 0.50, MarketRegime::Bullish);
        assert_eq!(mid.action, Action::Wait);
        assert_eq!(mid.amount, 0.0);

        let ok = alloc("PLTR", 0.60, MarketRegime::Calm);
        assert_eq!(ok.action, Action::Buy);
        assert_eq!(ok.amount, 100.0);

        // Flat sleeve, independent of score or regime above the gate.
        let high = alloc("PLTR", 0.99, MarketRegime::Bearish);
        assert_eq!(high.amount, 100.0);
    }

    #[test]
    fn injected_table_changes_core_membership() {
        let table = CoreAllocationTable::new([("PLTR", 0.5)]);
        let score = ConfidenceScore::from_overall(0.7);
        let pltr = calculate_allocation("PLTR", &score, 1000.0, MarketRegime::Calm, &table);
        assert_eq!(pltr.amount, 500.0);
        let spy = calculate_allocation("SPY", &score, 1000.0, MarketRegime::Calm, &table);
        assert_eq!(spy.amount, 100.0);
        assert!(spy.reasoning.starts_with("Risk allocation"));
    }

    #[test]
    fn amount_never_exceeds_budget() {
        let table = CoreAllocationTable::new([("SPY", 1.0)]);
        let score = ConfidenceScore::from_overall(0.9);
        let a = calculate_allocation("SPY", &score, 1000.0, MarketRegime::Bullish, &table);
        assert_eq!(a.amount, 1000.0);
    }

    #[test]
    fn table_validation() {
        assert!(CoreAllocationTable::default().validate().is_ok());
        assert!(CoreAllocationTable::empty().validate().is_ok());
        assert!(
            CoreAllocationTable::new([("SPY", 0.41), ("QQQ", 0.30), ("VOO", 0.20), ("VTI", 0.10)])
                .validate()
                .is_ok()
        );
        assert!(matches!(
            CoreAllocationTable::new([("SPY", 0.42), ("QQQ", 0.30), ("VOO", 0.20), ("VTI", 0.10)])
                .validate(),
            Err(ConfigError::CoreTableOverallocated { .. })
        ));
        assert!(matches!(
            CoreAllocationTable::new([("SPY", 0.8), ("QQQ", 0.5)]).validate(),
            Err(ConfigError::CoreTableOverallocated { .. })
        ));
        assert!(matches!(
            CoreAllocationTable::new([("SPY", -0.1)]).validate(),
            Err(ConfigError::InvalidCoreFraction { .. })
        ));
    }
}
