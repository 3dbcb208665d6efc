//! Adaptive final take-profit target.
//!
//! Starts from a base percent, adds a bonus when volume runs hot, shifts
//! with volatility (lower under high ATR, higher under low ATR) and clamps
//! the result.

use crate::domain::market::ExitIndicators;
use crate::domain::position::Side;

use super::params::AdaptiveTargetConfig;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdaptiveTarget {
    /// Final target distance from entry, percent
    pub percent: f64,
    pub volume_bonus_applied: bool,
    /// Signed ATR adjustment before clamping
    pub atr_adjustment: f64,
}

impl AdaptiveTarget {
    pub fn price(&self, entry_price: f64, side: Side) -> f64 {
        target_price(entry_price, side, self.percent)
    }
}

pub fn target_price(entry_price: f64, side: Side, percent: f64) -> f64 {
    match side {
        Side::Long => entry_price * (1.0 + percent / 100.0),
        Side::Short => entry_price * (1.0 - percent / 100.0),
    }
}

#[derive(Debug, Clone)]
pub struct AdaptiveTargetCalculator {
    config: AdaptiveTargetConfig,
}

impl AdaptiveTargetCalculator {
    pub fn new(config: AdaptiveTargetConfig) -> Self {
        Self { config }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn calculate(&self, indicators: Option<&ExitIndicators>) -> AdaptiveTarget {
        let cfg = &self.config;
        let mut percent = cfg.base_percent;

        let volume_bonus_applied = indicators
            .and_then(ExitIndicators::volume_ratio)
            .map_or(false, |ratio| ratio > cfg.high_volume_ratio);
        if volume_bonus_applied {
            percent += cfg.high_volume_bonus_percent;
        }

        let atr_adjustment = match indicators.and_then(|i| i.atr_percent) {
            Some(atr) if atr.is_finite() && atr > cfg.high_atr_percent => -cfg.atr_adjust_percent,
            Some(atr) if atr.is_finite() && atr > 0.0 && atr < cfg.low_atr_percent => {
                cfg.atr_adjust_percent
            }
            _ => 0.0,
        };
        percent += atr_adjustment;

        AdaptiveTarget {
            percent: percent.clamp(cfg.min_percent, cfg.max_percent),
            volume_bonus_applied,
            atr_adjustment,
        }
    }
}

impl Default for AdaptiveTargetCalculator {
    fn default() -> Self {
        Self::new(AdaptiveTargetConfig::default())
    }
}
