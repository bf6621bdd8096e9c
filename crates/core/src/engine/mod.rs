//! Confidence scoring and allocation engine.
//!
//! Everything here is synchronous and side-effect free apart from logging; the inputs are
//! plain values produced by the `storage` and `ingest` collaborators.

pub mod allocation;
pub mod confidence;
pub mod config;
pub mod recommender;
pub mod regime;
pub mod signals;

pub use allocation::{calculate_allocation, Allocation, CoreAllocationTable};
pub use confidence::{calculate_confidence, ConfidenceInputs, ConfidenceScore, ConfidenceWeights};
pub use config::{ConfigError, EngineConfig, RunSettings};
pub use recommender::{Engine, EngineError, InputSource, TickerInputs};
pub use regime::{detect_regime, MarketRegime, MarketSnapshot, RegimeThresholds};
pub use signals::{technical_signals, TechnicalIndicators};
