use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::position::Side;

/// Direction proposed by an upstream analyzer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    Long,
    Short,
    Hold,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Long => write!(f, "LONG"),
            Direction::Short => write!(f, "SHORT"),
            Direction::Hold => write!(f, "HOLD"),
        }
    }
}

/// One rung of the take-profit ladder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TakeProfit {
    /// Ladder index, starting at 1
    pub level: u8,
    /// Distance from entry in percent
    pub percent: f64,
    /// Share of the original position closed at this level
    pub size_percent: f64,
    pub price: f64,
    #[serde(default)]
    pub hit: bool,
}

impl TakeProfit {
    pub fn new(level: u8, percent: f64, size_percent: f64, price: f64) -> Self {
        Self {
            level,
            percent,
            size_percent,
            price,
            hit: false,
        }
    }

    /// Whether `price` has reached this level in the favor of `side`.
    /// The boundary is inclusive.
    pub fn is_reached(&self, side: Side, price: f64) -> bool {
        side.has_reached(price, self.price)
    }
}

/// Trading signal produced by an analyzer for one decision cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Signal {
    pub direction: Direction,
    /// Confidence on a 0-100 scale
    pub confidence: f64,
    pub price: f64,
    pub stop_loss: f64,
    #[serde(default)]
    pub take_profits: Vec<TakeProfit>,
    #[serde(default)]
    pub reason: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl Signal {
    pub fn new(direction: Direction, confidence: f64, price: f64, stop_loss: f64) -> Self {
        Self {
            direction,
            confidence,
            price,
            stop_loss,
            take_profits: Vec::new(),
            reason: String::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    pub fn with_take_profits(mut self, take_profits: Vec<TakeProfit>) -> Self {
        self.take_profits = take_profits;
        self
    }

    /// Confidence must be a finite value in [0, 100]. Out-of-range signals are
    /// dropped before ranking, never clamped.
    pub fn has_valid_confidence(&self) -> bool {
        self.confidence.is_finite() && (0.0..=100.0).contains(&self.confidence)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrendBias {
    Bullish,
    Bearish,
    Neutral,
}

impl fmt::Display for TrendBias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrendBias::Bullish => write!(f, "BULLISH"),
            TrendBias::Bearish => write!(f, "BEARISH"),
            TrendBias::Neutral => write!(f, "NEUTRAL"),
        }
    }
}

/// Higher-timeframe context delivered alongside the signal batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendAnalysis {
    pub bias: TrendBias,
    /// Trend strength on a 0..1 scale
    pub strength: f64,
    #[serde(default)]
    pub restricted_directions: Vec<Direction>,
}

impl TrendAnalysis {
    pub fn neutral() -> Self {
        Self {
            bias: TrendBias::Neutral,
            strength: 0.5,
            restricted_directions: Vec::new(),
        }
    }

    pub fn blocks(&self, direction: Direction) -> bool {
        self.restricted_directions.contains(&direction)
    }
}

impl Default for TrendAnalysis {
    fn default() -> Self {
        Self::neutral()
    }
}
