use crate::engine::config::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketRegime {
    Calm,
    Volatile,
    Bullish,
    Bearish,
}

impl MarketRegime {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketRegime::Calm => "calm",
            MarketRegime::Volatile => "volatile",
            MarketRegime::Bullish => "bullish",
            MarketRegime::Bearish => "bearish",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "calm" => Some(MarketRegime::Calm),
            "volatile" => Some(MarketRegime::Volatile),
            "bullish" => Some(MarketRegime::Bullish),
            "bearish" => Some(MarketRegime::Bearish),
            _ => None,
        }
    }
}

impl fmt::Display for MarketRegime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegimeThresholds {
    pub vix_high: f64,
    pub rsi_overbought: f64,
    pub rsi_oversold: f64,
}

impl Default for RegimeThresholds {
    fn default() -> Self {
        Self {
            vix_high: 25.0,
            rsi_overbought: 70.0,
            rsi_oversold: 30.0,
        }
    }
}

impl RegimeThresholds {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let named = [
            ("vix_high", self.vix_high),
            ("rsi_overbought", self.rsi_overbought),
            ("rsi_oversold", self.rsi_oversold),
        ];
        for (name, value) in named {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::InvalidThreshold { name, value });
            }
        }

        if self.rsi_oversold >= self.rsi_overbought {
            return Err(ConfigError::InvertedRsiBand {
                oversold: self.rsi_oversold,
                overbought: self.rsi_overbought,
            });
        }
        Ok(())
    }
}

/// Broad-market readings the regime is derived from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub vix: Option<f64>,
    pub spy_rsi: Option<f64>,
}

impl MarketSnapshot {
    /// Collaborators report an unavailable reading as `0.0`; map that to `None`.
    pub fn from_raw(vix: f64, spy_rsi: f64) -> Self {
        Self {
            vix: Some(vix).filter(|v| *v != 0.0),
            spy_rsi: Some(spy_rsi).filter(|v| *v != 0.0),
        }
    }
}

/// Classifies the market. Returns the regime and the VIX level used (0 when unavailable).
///
/// Checks run in order and the first match wins: missing VIX, high VIX, overbought SPY,
/// oversold SPY. A high RSI reads as bearish because it anticipates mean reversion.
pub fn detect_regime(
    vix: Option<f64>,
    spy_rsi: Option<f64>,
    thresholds: &RegimeThresholds,
) -> (MarketRegime, f64) {
    let Some(vix) = vix else {
        return (MarketRegime::Calm, 0.0);
    };

    if vix > thresholds.vix_high {
        return (MarketRegime::Volatile, vix);
    }

    match spy_rsi {
        Some(rsi) if rsi > thresholds.rsi_overbought => (MarketRegime::Bearish, vix),
        Some(rsi) if rsi < thresholds.rsi_oversold => (MarketRegime::Bullish, vix),
        _ => (MarketRegime::Calm, vix),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detect(vix: Option<f64>, rsi: Option<f64>) -> (MarketRegime, f64) {
        detect_regime(vix, rsi, &RegimeThresholds::default())
    }

    #[test]
    fn missing_vix_defaults_to_calm() {
        assert_eq!(detect(None, None), (MarketRegime::Calm, 0.0));
        // RSI is not consulted without a VIX reading.
        assert_eq!(detect(None, Some(85.0)), (MarketRegime::Calm, 0.0));
    }

    #[test]
    fn high_vix_is_volatile_regardless_of_rsi() {
        assert_eq!(detect(Some(25.01), Some(20.0)), (MarketRegime::Volatile, 25.01));
        assert_eq!(detect(Some(40.0), Some(80.0)), (MarketRegime::Volatile, 40.0));
        assert_eq!(detect(Some(40.0), None), (MarketRegime::Volatile, 40.0));
    }

    #[test]
    fn vix_at_threshold_is_not_volatile() {
        assert_eq!(detect(Some(25.0), None), (MarketRegime::Calm, 25.0));
    }

    #[test]
    fn rsi_drives_trend_regime() {
        assert_eq!(detect(Some(15.0), Some(72.0)).0, MarketRegime::Bearish);
        assert_eq!(detect(Some(15.0), Some(28.0)).0, MarketRegime::Bullish);
        assert_eq!(detect(Some(15.0), Some(70.0)).0, MarketRegime::Calm);
        assert_eq!(detect(Some(15.0), Some(30.0)).0, MarketRegime::Calm);
        assert_eq!(detect(Some(15.0), None).0, MarketRegime::Calm);
    }

    #[test]
    fn thresholds_are_overridable() {
        let t = RegimeThresholds {
            vix_high: 35.0,
            rsi_overbought: 65.0,
            rsi_oversold: 35.0,
        };
        assert_eq!(detect_regime(Some(30.0), Some(66.0), &t).0, MarketRegime::Bearish);
        assert_eq!(detect_regime(Some(36.0), Some(50.0), &t).0, MarketRegime::Volatile);
        assert_eq!(detect_regime(Some(20.0), Some(34.0), &t).0, MarketRegime::Bullish);
    }

    #[test]
    fn raw_zero_means_unavailable() {
        let snap = MarketSnapshot::from_raw(0.0, 75.0);
        assert_eq!(snap.vix, None);
        assert_eq!(snap.spy_rsi, Some(75.0));
    }

    #[test]
    fn threshold_validation() {
        assert!(RegimeThresholds::default().validate().is_ok());
        let inverted = RegimeThresholds {
            rsi_overbought: 30.0,
            rsi_oversold: 70.0,
            ..Default::default()
        };
        assert!(matches!(
            inverted.validate(),
            Err(ConfigError::InvertedRsiBand { .. })
        ));
        let negative = RegimeThresholds {
            vix_high: -1.0,
            ..Default::default()
        };
        assert!(negative.validate().is_err());
    }

    #[test]
    fn regime_labels_round_trip() {
        for r in [
            MarketRegime::Calm,
            MarketRegime::Volatile,
            MarketRegime::Bullish,
            MarketRegime::Bearish,
        ] {
            assert_eq!(MarketRegime::parse(r.as_str()), Some(r));
        }
        assert_eq!(MarketRegime::parse("sideways"), None);
    }
}
