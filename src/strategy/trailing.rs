//! Trailing Stops
//!
//! Two final-leg trailing methods:
//! - `SmartTrailing`: ATR-derived distance clamped to a percent band and
//!   tightened when volume spikes
//! - `bollinger_band`: rolling mean +/- k standard deviations over closes,
//!   using the far band as the candidate stop
//!
//! Both feed a `TrailingTracker` that only ever ratchets in the position's
//! favor.

use chrono::{DateTime, Utc};
use statrs::statistics::Statistics;

use crate::domain::lifecycle::{BandTrailingMode, TrailingMode};
use crate::domain::market::ExitIndicators;
use crate::domain::position::Side;

use super::params::TrailingConfig;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrailingDistance {
    /// Distance as a percent of price
    pub percent: f64,
    /// Distance in price units
    pub absolute: f64,
    pub volume_tightened: bool,
}

/// Volatility-aware trailing distance calculator
#[derive(Debug, Clone)]
pub struct SmartTrailing {
    config: TrailingConfig,
}

impl SmartTrailing {
    pub fn new(config: TrailingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TrailingConfig {
        &self.config
    }

    pub fn distance(&self, price: f64, indicators: Option<&ExitIndicators>) -> TrailingDistance {
        let atr_percent = indicators
            .and_then(|i| i.atr_percent)
            .filter(|v| v.is_finite() && *v > 0.0)
            .unwrap_or(self.config.fallback_atr_percent);

        let mut percent =
            atr_percent.clamp(self.config.min_distance_percent, self.config.max_distance_percent);

        let volume_tightened = indicators
            .and_then(ExitIndicators::volume_ratio)
            .map_or(false, |ratio| ratio > self.config.high_volume_ratio);
        if volume_tightened {
            percent *= self.config.high_volume_tighten_factor;
        }

        TrailingDistance {
            percent,
            absolute: price * percent / 100.0,
            volume_tightened,
        }
    }
}

impl Default for SmartTrailing {
    fn default() -> Self {
        Self::new(TrailingConfig::default())
    }
}

/// Per-position trailing stop state
#[derive(Debug, Clone, PartialEq)]
pub struct TrailingTracker {
    side: Side,
    activated_at: DateTime<Utc>,
    distance: f64,
    stop_price: f64,
    extreme_price: f64,
}

impl TrailingTracker {
    /// Start trailing at `price` with an absolute `distance`
    pub fn activate(side: Side, price: f64, distance: f64) -> Self {
        Self {
            side,
            activated_at: Utc::now(),
            distance,
            stop_price: offset(side, price, distance),
            extreme_price: price,
        }
    }

    /// Rebuild from a persisted mode payload
    pub fn from_mode(side: Side, mode: &TrailingMode) -> Self {
        Self {
            side,
            activated_at: mode.activated_at,
            distance: mode.distance,
            stop_price: mode.stop_price,
            extreme_price: mode.extreme_price,
        }
    }

    pub fn to_mode(&self) -> TrailingMode {
        TrailingMode {
            activated_at: self.activated_at,
            distance: self.distance,
            stop_price: self.stop_price,
            extreme_price: self.extreme_price,
        }
    }

    pub fn stop_price(&self) -> f64 {
        self.stop_price
    }

    pub fn distance(&self) -> f64 {
        self.distance
    }

    pub fn extreme_price(&self) -> f64 {
        self.extreme_price
    }

    /// Track `price` and trail the extreme by `distance_percent`. Returns the
    /// new stop when it moved; a wider distance can never loosen the stop.
    pub fn update(&mut self, price: f64, distance_percent: f64) -> Option<f64> {
        if self.side.is_tighter_stop(price, self.extreme_price) {
            self.extreme_price = price;
        }
        self.distance = self.extreme_price * distance_percent / 100.0;
        self.propose(offset(self.side, self.extreme_price, self.distance))
    }

    /// Move the stop to `candidate` if that tightens it
    pub fn propose(&mut self, candidate: f64) -> Option<f64> {
        if candidate.is_finite() && self.side.is_tighter_stop(candidate, self.stop_price) {
            self.stop_price = candidate;
            Some(candidate)
        } else {
            None
        }
    }
}

fn offset(side: Side, price: f64, distance: f64) -> f64 {
    match side {
        Side::Long => price - distance,
        Side::Short => price + distance,
    }
}

/// Rolling mean +/- `std_dev` standard deviations over the last `period`
/// closes. `None` when there is not enough history.
pub fn bollinger_band(closes: &[f64], period: usize, std_dev: f64) -> Option<BandTrailingMode> {
    if period < 2 || closes.len() < period {
        return None;
    }
    let window = &closes[closes.len() - period..];
    if window.iter().any(|c| !c.is_finite()) {
        return None;
    }

    let middle = window.iter().mean();
    let sigma = window.iter().population_std_dev();
    let upper = middle + std_dev * sigma;
    let lower = middle - std_dev * sigma;

    Some(BandTrailingMode {
        upper,
        middle,
        lower,
        stop_price: lower,
    })
}

/// Band-derived stop candidate: the lower band for longs, the upper for shorts
pub fn band_stop(
    side: Side,
    closes: &[f64],
    period: usize,
    std_dev: f64,
) -> Option<BandTrailingMode> {
    bollinger_band(closes, period, std_dev).map(|mut band| {
        band.stop_price = match side {
            Side::Long => band.lower,
            Side::Short => band.upper,
        };
        band
    })
}
