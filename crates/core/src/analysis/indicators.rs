//! Daily technical indicators over a close/volume history (oldest first).
//!
//! Each indicator is `None` until the history is long enough to compute it. Nothing is
//! computed at all for fewer than [`MIN_BARS`] observations.

use crate::engine::signals::TechnicalIndicators;
use serde::{Deserialize, Serialize};

pub const MIN_BARS: usize = 14;
pub const RSI_PERIOD: usize = 14;
pub const MACD_FAST: usize = 12;
pub const MACD_SLOW: usize = 26;
pub const MACD_SIGNAL: usize = 9;
pub const VOLUME_AVG_PERIOD: usize = 20;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSet {
    pub rsi_14: Option<f64>,
    pub sma_50: Option<f64>,
    pub sma_200: Option<f64>,
    pub macd: Option<f64>,
    pub macd_signal: Option<f64>,
    pub volume_avg_20: Option<i64>,
}

impl IndicatorSet {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn to_technical(&self, latest_close: Option<f64>) -> TechnicalIndicators {
        TechnicalIndicators {
            rsi_14: self.rsi_14,
            sma_50: self.sma_50,
            sma_200: self.sma_200,
            macd: self.macd,
            macd_signal: self.macd_signal,
            latest_close,
        }
    }
}

pub fn compute(closes: &[f64], volumes: &[i64]) -> IndicatorSet {
    if closes.len() < MIN_BARS {
        return IndicatorSet::default();
    }

    let (macd, macd_signal) = macd(closes, MACD_FAST, MACD_SLOW, MACD_SIGNAL);
    IndicatorSet {
        rsi_14: rsi(closes, RSI_PERIOD),
        sma_50: sma(closes, 50),
        sma_200: sma(closes, 200),
        macd,
        macd_signal,
        volume_avg_20: volume_average(volumes, VOLUME_AVG_PERIOD),
    }
}

/// Mean of the last `period` values.
pub fn sma(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }
    let window = &values[values.len() - period..];
    Some(window.iter().sum::<f64>() / period as f64)
}

/// Full EMA series, seeded with the SMA of the first `period` values.
/// Element `i` of the result corresponds to `values[period - 1 + i]`.
pub fn ema_series(values: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || values.len() < period {
        return Vec::new();
    }
    let k = 2.0 / (period as f64 + 1.0);
    let seed = values[..period].iter().sum::<f64>() / period as f64;

    let mut out = Vec::with_capacity(values.len() - period + 1);
    out.push(seed);
    let mut prev = seed;
    for v in &values[period..] {
        prev = (v - prev) * k + prev;
        out.push(prev);
    }
    out
}

/// Wilder's RSI. Needs `period + 1` closes.
pub fn rsi(closes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || closes.len() < period + 1 {
        return None;
    }

    let mut gains = 0.0;
    let mut losses = 0.0;
    for w in closes[..=period].windows(2) {
        let change = w[1] - w[0];
        if change > 0.0 {
            gains += change;
        } else {
            losses -= change;
        }
    }
    let n = period as f64;
    let mut avg_gain = gains / n;
    let mut avg_loss = losses / n;

    for w in closes[period..].windows(2) {
        let change = w[1] - w[0];
        let (gain, loss) = if change > 0.0 { (change, 0.0) } else { (0.0, -change) };
        avg_gain = (avg_gain * (n - 1.0) + gain) / n;
        avg_loss = (avg_loss * (n - 1.0) + loss) / n;
    }

    if avg_loss == 0.0 {
        // Flat series has no direction.
        return Some(if avg_gain == 0.0 { 50.0 } else { 100.0 });
    }
    let rs = avg_gain / avg_loss;
    Some(100.0 - 100.0 / (1.0 + rs))
}

/// Latest MACD line and signal line.
pub fn macd(closes: &[f64], fast: usize, slow: usize, signal: usize) -> (Option<f64>, Option<f64>) {
    if fast >= slow || closes.len() < slow {
        return (None, None);
    }

    let fast_ema = ema_series(closes, fast);
    let slow_ema = ema_series(closes, slow);
    // Align the fast series to the slow one, which starts later.
    let offset = slow - fast;
    let line: Vec<f64> = slow_ema
        .iter()
        .zip(&fast_ema[offset..])
        .map(|(s, f)| f - s)
        .collect();

    let signal_line = ema_series(&line, signal);
    (line.last().copied(), signal_line.last().copied())
}

pub fn volume_average(volumes: &[i64], period: usize) -> Option<i64> {
    if period == 0 || volumes.len() < period {
        return None;
    }
    let window = &volumes[volumes.len() - period..];
    let sum: i128 = window.iter().map(|v| *v as i128).sum();
    Some((sum as f64 / period as f64).round() as i64)
}
