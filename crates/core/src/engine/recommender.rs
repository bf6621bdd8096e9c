use crate::domain::recommendation::{Action, Recommendation};
use crate::domain::sentiment::Sentiment;
use crate::engine::allocation::calculate_allocation;
use crate::engine::confidence::{calculate_confidence, ConfidenceInputs, ConfidenceScore};
use crate::engine::config::{ConfigError, EngineConfig};
use crate::engine::regime::{detect_regime, MarketRegime, MarketSnapshot};
use crate::engine::signals::{technical_signals, TechnicalIndicators};
use std::collections::BTreeMap;

/// Raw per-ticker data as loaded by a collaborator, before signal extraction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickerInputs {
    pub indicators: TechnicalIndicators,
    pub creator_sentiments: BTreeMap<String, Sentiment>,
    pub current_volume: u64,
    pub avg_volume: u64,
    pub creator_accuracy: BTreeMap<String, f64>,
}

impl TickerInputs {
    pub fn into_confidence_inputs(self, ticker: &str) -> ConfidenceInputs {
        ConfidenceInputs {
            ticker: ticker.to_string(),
            technical_signals: technical_signals(&self.indicators),
            creator_sentiments: self.creator_sentiments,
            current_volume: self.current_volume,
            avg_volume: self.avg_volume,
            creator_accuracy: self.creator_accuracy,
        }
    }
}

/// Supplies already-fetched inputs for one ticker.
pub trait InputSource {
    fn ticker_inputs(&self, ticker: &str) -> anyhow::Result<TickerInputs>;
}

impl InputSource for BTreeMap<String, TickerInputs> {
    fn ticker_inputs(&self, ticker: &str) -> anyhow::Result<TickerInputs> {
        self.get(ticker)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no inputs loaded for {ticker}"))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid engine configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("budget must be a finite, non-negative amount (got {0})")]
    InvalidBudget(f64),

    #[error("recommendation run cancelled after {completed} of {total} tickers")]
    Cancelled { completed: usize, total: usize },
}

/// Scores and allocates a ticker universe. Holds only immutable configuration.
#[derive(Debug, Clone)]
pub struct Engine {
    config: EngineConfig,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn detect_regime(&self, market: MarketSnapshot) -> (MarketRegime, f64) {
        detect_regime(market.vix, market.spy_rsi, &self.config.thresholds)
    }

    pub fn score(&self, inputs: &ConfidenceInputs) -> ConfidenceScore {
        calculate_confidence(inputs, &self.config.weights)
    }

    pub fn generate_recommendations(
        &self,
        tickers: &[String],
        budget: f64,
        market: MarketSnapshot,
        source: &dyn InputSource,
    ) -> Result<Vec<Recommendation>, EngineError> {
        self.generate_recommendations_until(tickers, budget, market, source, || false)
    }

    /// Like [`Engine::generate_recommendations`], but checks `should_stop` before each ticker.
    /// A ticker's score and allocation are never split by a stop.
    pub fn generate_recommendations_until<F>(
        &self,
        tickers: &[String],
        budget: f64,
        market: MarketSnapshot,
        source: &dyn InputSource,
        should_stop: F,
    ) -> Result<Vec<Recommendation>, EngineError>
    where
        F: Fn() -> bool,
    {
        if !budget.is_finite() || budget < 0.0 {
            return Err(EngineError::InvalidBudget(budget));
        }

        let (regime, vix_level) = self.detect_regime(market);
        tracing::info!(%regime, vix_level, budget, "market regime detected");

        if regime == MarketRegime::Volatile {
            return Ok(vec![Recommendation {
                ticker: None,
                action: Action::Wait,
                amount: 0.0,
                confidence_score: 0.0,
                reasoning: format!(
                    "High volatility detected (VIX: {vix_level:.2}). Wait 2-3 days for market to stabilize."
                ),
                regime,
                vix_level,
            }]);
        }

        let mut out = Vec::with_capacity(tickers.len());
        for (idx, ticker) in tickers.iter().enumerate() {
            if should_stop() {
                return Err(EngineError::Cancelled {
                    completed: idx,
                    total: tickers.len(),
                });
            }

            let inputs = match source.ticker_inputs(ticker) {
                Ok(inputs) => inputs.into_confidence_inputs(ticker),
                Err(err) => {
                    tracing::warn!(%ticker, error = %err, "skipping ticker: inputs unavailable");
                    continue;
                }
            };

            let score = self.score(&inputs);
            let allocation = calculate_allocation(
                ticker,
                &score,
                budget,
                regime,
                &self.config.core_allocations,
            );

            tracing::debug!(
                %ticker,
                overall = score.overall,
                direction = %score.direction,
                breakdown = %score.breakdown,
                action = %allocation.action,
                amount = allocation.amount,
                "ticker scored"
            );

            out.push(Recommendation {
                ticker: Some(ticker.clone()),
                action: allocation.action,
                amount: allocation.amount,
                confidence_score: score.overall,
                reasoning: allocation.reasoning,
                regime,
                vix_level,
            });
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn tickers(list: &[&str]) -> Vec<String> {
        list.iter().map(|t| t.to_string()).collect()
    }

    fn engine() -> Engine {
        Engine::new(EngineConfig::default()).unwrap()
    }

    fn calm() -> MarketSnapshot {
        MarketSnapshot {
            vix: Some(15.0),
            spy_rsi: Some(50.0),
        }
    }

    /// Fails the test if the engine asks for any ticker.
    struct Untouchable;

    impl InputSource for Untouchable {
        fn ticker_inputs(&self, ticker: &str) -> anyhow::Result<TickerInputs> {
            panic!("inputs requested for {ticker} during a volatile run");
        }
    }

    fn strong_bullish() -> TickerInputs {
        TickerInputs {
            indicators: TechnicalIndicators {
                rsi_14: Some(25.0),
                sma_50: Some(110.0),
                sma_200: Some(100.0),
                macd: Some(2.0),
                macd_signal: Some(1.0),
                latest_close: Some(115.0),
            },
            creator_sentiments: [("a", Sentiment::Bullish), ("b", Sentiment::Bullish)]
                .into_iter()
                .map(|(c, s)| (c.to_string(), s))
                .collect(),
            current_volume: 3_000,
            avg_volume: 1_000,
            creator_accuracy: [("a".to_string(), 0.9), ("b".to_string(), 0.7)]
                .into_iter()
                .collect(),
        }
    }

    #[test]
    fn rejects_invalid_config_at_construction() {
        let mut cfg = EngineConfig::default();
        cfg.weights.creator_consensus = 0.9;
        assert!(matches!(Engine::new(cfg), Err(EngineError::Config(_))));
    }

    #[test]
    fn volatile_regime_short_circuits() {
        let market = MarketSnapshot {
            vix: Some(32.5),
            spy_rsi: Some(20.0),
        };
        let recs = engine()
            .generate_recommendations(
                &tickers(&["SPY", "QQQ", "VOO", "VTI", "PLTR"]),
                1000.0,
                market,
                &Untouchable,
            )
            .unwrap();

        assert_eq!(recs.len(), 1);
        let rec = &recs[0];
        assert_eq!(rec.action, Action::Wait);
        assert_eq!(rec.amount, 0.0);
        assert_eq!(rec.ticker, None);
        assert_eq!(rec.regime, MarketRegime::Volatile);
        assert_eq!(rec.vix_level, 32.5);
        assert!(rec.reasoning.contains("VIX: 32.50"));
    }

    #[test]
    fn every_ticker_appears_even_without_data() {
        let mut source = BTreeMap::new();
        for t in ["SPY", "QQQ", "PLTR"] {
            source.insert(t.to_string(), TickerInputs::default());
        }
        let recs = engine()
            .generate_recommendations(&tickers(&["SPY", "QQQ", "PLTR"]), 1000.0, calm(), &source)
            .unwrap();

        assert_eq!(recs.len(), 3);
        let order: Vec<_> = recs.iter().map(|r| r.ticker.as_deref().unwrap()).collect();
        assert_eq!(order, vec!["SPY", "QQQ", "PLTR"]);

        // Empty inputs score 0.20: severe haircut for core, wait for satellites.
        assert!((recs[0].confidence_score - 0.20).abs() < 1e-9);
        assert_eq!(recs[0].action, Action::Buy);
        assert!((recs[0].amount - 100.0).abs() < 1e-9);
        assert!((recs[1].amount - 75.0).abs() < 1e-9);
        assert_eq!(recs[2].action, Action::Wait);
        assert_eq!(recs[2].amount, 0.0);
    }

    #[test]
    fn missing_inputs_skip_only_that_ticker() {
        let mut source = BTreeMap::new();
        source.insert("SPY".to_string(), TickerInputs::default());
        source.insert("VTI".to_string(), TickerInputs::default());

        let recs = engine()
            .generate_recommendations(&tickers(&["SPY", "QQQ", "VTI"]), 1000.0, calm(), &source)
            .unwrap();
        let order: Vec<_> = recs.iter().map(|r| r.ticker.clone().unwrap()).collect();
        assert_eq!(order, vec!["SPY", "VTI"]);
    }

    #[test]
    fn bullish_regime_boosts_strong_core_ticker() {
        let mut source = BTreeMap::new();
        source.insert("SPY".to_string(), strong_bullish());
        let market = MarketSnapshot {
            vix: Some(14.0),
            spy_rsi: Some(25.0),
        };

        let recs = engine()
            .generate_recommendations(&tickers(&["SPY"]), 1000.0, market, &source)
            .unwrap();
        let rec = &recs[0];
        assert_eq!(rec.regime, MarketRegime::Bullish);
        assert_eq!(rec.vix_level, 14.0);
        // 0.3 + 0.3 + 0.2 + 0.2 * 0.8 = 0.96
        assert!((rec.confidence_score - 0.96).abs() < 1e-9);
        assert!((rec.amount - 440.0).abs() < 1e-9);
        assert!(rec.reasoning.contains("increased allocation"));
    }

    #[test]
    fn amounts_stay_within_budget_and_waits_are_zero() {
        let mut source = BTreeMap::new();
        for t in ["SPY", "QQQ", "VOO", "VTI", "PLTR", "NVDA"] {
            source.insert(t.to_string(), strong_bullish());
        }
        source.insert("NVDA".to_string(), TickerInputs::default());

        for spy_rsi in [Some(20.0), Some(50.0), Some(80.0), None] {
            let market = MarketSnapshot {
                vix: Some(18.0),
                spy_rsi,
            };
            let recs = engine()
                .generate_recommendations(
                    &tickers(&["SPY", "QQQ", "VOO", "VTI", "PLTR", "NVDA"]),
                    500.0,
                    market,
                    &source,
                )
                .unwrap();
            for rec in recs {
                assert!(rec.amount >= 0.0 && rec.amount <= 500.0);
                if rec.action == Action::Wait {
                    assert_eq!(rec.amount, 0.0);
                }
            }
        }
    }

    #[test]
    fn rejects_bad_budget() {
        let source = BTreeMap::new();
        let err = engine()
            .generate_recommendations(&tickers(&["SPY"]), -1.0, calm(), &source)
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidBudget(_)));
        assert!(engine()
            .generate_recommendations(&tickers(&["SPY"]), f64::NAN, calm(), &source)
            .is_err());
    }

    #[test]
    fn stop_is_honoured_between_tickers() {
        let mut source = BTreeMap::new();
        for t in ["SPY", "QQQ", "VOO"] {
            source.insert(t.to_string(), TickerInputs::default());
        }
        let calls = Cell::new(0);
        let err = engine()
            .generate_recommendations_until(
                &tickers(&["SPY", "QQQ", "VOO"]),
                1000.0,
                calm(),
                &source,
                || {
                    calls.set(calls.get() + 1);
                    calls.get() > 2
                },
            )
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Cancelled {
                completed: 2,
                total: 3
            }
        ));
    }
}
