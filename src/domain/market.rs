//! Market inputs consumed by the exit path.
//!
//! Indicator math lives upstream; only the already-computed values and the
//! raw candle history needed for band trailing are carried here.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    /// Open time, Unix milliseconds
    pub timestamp: i64,
}

/// Volatility and volume readings supplied with a price tick
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExitIndicators {
    /// ATR expressed as a percent of price
    #[serde(default)]
    pub atr_percent: Option<f64>,
    #[serde(default)]
    pub current_volume: Option<f64>,
    #[serde(default)]
    pub average_volume: Option<f64>,
    /// Recent candles, oldest first. Only needed for band trailing.
    #[serde(default)]
    pub candles: Vec<Candle>,
}

impl ExitIndicators {
    pub fn with_atr_percent(mut self, atr_percent: f64) -> Self {
        self.atr_percent = Some(atr_percent);
        self
    }

    pub fn with_volume(mut self, current: f64, average: f64) -> Self {
        self.current_volume = Some(current);
        self.average_volume = Some(average);
        self
    }

    pub fn with_candles(mut self, candles: Vec<Candle>) -> Self {
        self.candles = candles;
        self
    }

    /// Current volume over the average, if both are known and usable
    pub fn volume_ratio(&self) -> Option<f64> {
        match (self.current_volume, self.average_volume) {
            (Some(current), Some(average)) if average > 0.0 && current.is_finite() => {
                Some(current / average)
            }
            _ => None,
        }
    }

    pub fn closes(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.close).collect()
    }
}
