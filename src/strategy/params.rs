//! Strategy Parameters
//!
//! Tunables for entry orchestration, risk admission and the exit ladder.
//! Defaults match the production profile: 60/70 confidence floors, a 0.4
//! conflict ceiling, a 50/30/20 take-profit split and 1.5-3.0% ATR trailing.

use serde::{Deserialize, Serialize};

use crate::domain::risk::RiskConfig;

/// Runtime entry configuration, readable and replaceable while running
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestrationConfig {
    /// Minimum winning-signal confidence (0-100)
    pub min_confidence_threshold: f64,
    /// Confidence floor used instead when the trend is flat
    pub flat_market_confidence_threshold: f64,
    /// Trend strength below which the market counts as flat
    pub flat_market_strength_threshold: f64,
    /// Minority share of directional signals above which a batch conflicts
    pub signal_conflict_threshold: f64,
    /// Candles required on the primary timeframe before entries are considered
    pub min_primary_candles: usize,
    /// Candles required on the context timeframe
    pub min_context_candles: usize,
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            min_confidence_threshold: 60.0,
            flat_market_confidence_threshold: 70.0,
            flat_market_strength_threshold: 0.1,
            signal_conflict_threshold: 0.4,
            min_primary_candles: 50,
            min_context_candles: 20,
        }
    }
}

impl OrchestrationConfig {
    pub fn with_min_confidence(mut self, threshold: f64) -> Self {
        self.min_confidence_threshold = threshold;
        self
    }

    pub fn with_conflict_threshold(mut self, threshold: f64) -> Self {
        self.signal_conflict_threshold = threshold;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("min_confidence_threshold", self.min_confidence_threshold),
            ("flat_market_confidence_threshold", self.flat_market_confidence_threshold),
        ] {
            if !(0.0..=100.0).contains(&value) {
                return Err(ConfigError::InvalidConfidence(name, value));
            }
        }
        if !(self.signal_conflict_threshold > 0.0 && self.signal_conflict_threshold <= 1.0) {
            return Err(ConfigError::InvalidConflictThreshold(self.signal_conflict_threshold));
        }
        if !(0.0..=1.0).contains(&self.flat_market_strength_threshold) {
            return Err(ConfigError::InvalidFlatStrength(self.flat_market_strength_threshold));
        }
        Ok(())
    }
}

/// Breakeven lock-in after TP1
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakevenConfig {
    /// Unrealized profit (percent) that locks breakeven immediately
    pub activation_profit_percent: f64,
    /// Candles to wait after TP1 before forcing the lock
    pub max_wait_candles: u32,
    /// Profit margin (percent) the breakeven stop sits past entry
    pub profit_margin_percent: f64,
}

impl Default for BreakevenConfig {
    fn default() -> Self {
        Self {
            activation_profit_percent: 0.3,
            max_wait_candles: 5,
            profit_margin_percent: 0.1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrailingMethod {
    /// ATR-band trailing with volume tightening
    Smart,
    /// Bollinger-band trailing, falls back to `Smart` without candle history
    Band,
}

/// Volatility-aware trailing after TP2
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrailingConfig {
    pub method: TrailingMethod,
    pub min_distance_percent: f64,
    pub max_distance_percent: f64,
    /// Used when no ATR reading is supplied
    pub fallback_atr_percent: f64,
    /// Volume over average above which the distance is tightened
    pub high_volume_ratio: f64,
    /// Multiplier applied on high volume (0.8 = 20% tighter)
    pub high_volume_tighten_factor: f64,
    pub band_period: usize,
    pub band_std_dev: f64,
}

impl Default for TrailingConfig {
    fn default() -> Self {
        Self {
            method: TrailingMethod::Smart,
            min_distance_percent: 1.5,
            max_distance_percent: 3.0,
            fallback_atr_percent: 2.0,
            high_volume_ratio: 1.2,
            high_volume_tighten_factor: 0.8,
            band_period: 20,
            band_std_dev: 2.0,
        }
    }
}

/// Dynamic final (TP3) target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveTargetConfig {
    /// Replace the static TP3 price with the adaptive one
    pub enabled: bool,
    pub base_percent: f64,
    pub high_volume_ratio: f64,
    pub high_volume_bonus_percent: f64,
    /// ATR percent above which volatility counts as high
    pub high_atr_percent: f64,
    /// ATR percent below which volatility counts as low
    pub low_atr_percent: f64,
    pub atr_adjust_percent: f64,
    pub min_percent: f64,
    pub max_percent: f64,
}

impl Default for AdaptiveTargetConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_percent: 2.0,
            high_volume_ratio: 1.2,
            high_volume_bonus_percent: 0.5,
            high_atr_percent: 2.5,
            low_atr_percent: 1.0,
            atr_adjust_percent: 0.5,
            min_percent: 2.0,
            max_percent: 5.0,
        }
    }
}

/// Exit ladder configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExitConfig {
    /// Percent of the original position closed at TP1, TP2 and TP3
    pub tp_close_percents: [f64; 3],
    pub breakeven: BreakevenConfig,
    pub trailing: TrailingConfig,
    pub adaptive_target: AdaptiveTargetConfig,
}

impl Default for ExitConfig {
    fn default() -> Self {
        Self {
            tp_close_percents: [50.0, 30.0, 20.0],
            breakeven: BreakevenConfig::default(),
            trailing: TrailingConfig::default(),
            adaptive_target: AdaptiveTargetConfig::default(),
        }
    }
}

impl ExitConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let total: f64 = self.tp_close_percents.iter().sum();
        if self.tp_close_percents.iter().any(|p| *p <= 0.0) || (total - 100.0).abs() > 0.01 {
            return Err(ConfigError::InvalidCloseSplit(total));
        }

        let be = &self.breakeven;
        if be.activation_profit_percent < 0.0 {
            return Err(ConfigError::InvalidBreakeven(format!(
                "activation_profit_percent must be >= 0, got {}",
                be.activation_profit_percent
            )));
        }
        if be.profit_margin_percent < 0.0 {
            return Err(ConfigError::InvalidBreakeven(format!(
                "profit_margin_percent must be >= 0, got {}",
                be.profit_margin_percent
            )));
        }

        let tr = &self.trailing;
        if tr.min_distance_percent <= 0.0 || tr.min_distance_percent > tr.max_distance_percent {
            return Err(ConfigError::InvalidTrailing(format!(
                "distance band [{}, {}] is invalid",
                tr.min_distance_percent, tr.max_distance_percent
            )));
        }
        if !(tr.high_volume_tighten_factor > 0.0 && tr.high_volume_tighten_factor <= 1.0) {
            return Err(ConfigError::InvalidTrailing(format!(
                "high_volume_tighten_factor must be in (0, 1], got {}",
                tr.high_volume_tighten_factor
            )));
        }
        if tr.band_period < 2 || tr.band_std_dev <= 0.0 {
            return Err(ConfigError::InvalidTrailing(format!(
                "band period {} / std dev {} is invalid",
                tr.band_period, tr.band_std_dev
            )));
        }

        let at = &self.adaptive_target;
        if at.min_percent <= 0.0 || at.min_percent > at.max_percent {
            return Err(ConfigError::InvalidAdaptiveTarget(format!(
                "clamp band [{}, {}] is invalid",
                at.min_percent, at.max_percent
            )));
        }
        if at.low_atr_percent > at.high_atr_percent {
            return Err(ConfigError::InvalidAdaptiveTarget(format!(
                "low_atr_percent {} exceeds high_atr_percent {}",
                at.low_atr_percent, at.high_atr_percent
            )));
        }
        Ok(())
    }
}

impl RiskConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.risk_per_trade_percent <= 0.0 || self.risk_per_trade_percent > 100.0 {
            return Err(ConfigError::InvalidRisk(format!(
                "risk_per_trade_percent must be 0-100, got {}",
                self.risk_per_trade_percent
            )));
        }
        if self.min_position_size_usdt <= 0.0
            || self.min_position_size_usdt > self.max_position_size_usdt
        {
            return Err(ConfigError::InvalidRisk(format!(
                "position size band [{}, {}] is invalid",
                self.min_position_size_usdt, self.max_position_size_usdt
            )));
        }
        if self.max_leverage_multiplier <= 0.0 {
            return Err(ConfigError::InvalidRisk(format!(
                "max_leverage_multiplier must be > 0, got {}",
                self.max_leverage_multiplier
            )));
        }
        if self.max_positions == 0 {
            return Err(ConfigError::InvalidRisk("max_positions must be > 0".to_string()));
        }
        for (name, value) in [
            ("max_total_exposure_percent", self.max_total_exposure_percent),
            ("max_daily_loss_percent", self.max_daily_loss_percent),
            ("max_daily_profit_percent", self.max_daily_profit_percent),
        ] {
            if value <= 0.0 {
                return Err(ConfigError::InvalidRisk(format!("{} must be > 0, got {}", name, value)));
            }
        }
        Ok(())
    }
}

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid {0}: {1} (must be 0-100)")]
    InvalidConfidence(&'static str, f64),
    #[error("Invalid conflict threshold: {0} (must be 0 < t <= 1)")]
    InvalidConflictThreshold(f64),
    #[error("Invalid flat-market strength threshold: {0} (must be 0-1)")]
    InvalidFlatStrength(f64),
    #[error("Take-profit close split sums to {0}%, expected 100% with positive parts")]
    InvalidCloseSplit(f64),
    #[error("Invalid breakeven config: {0}")]
    InvalidBreakeven(String),
    #[error("Invalid trailing config: {0}")]
    InvalidTrailing(String),
    #[error("Invalid adaptive target config: {0}")]
    InvalidAdaptiveTarget(String),
    #[error("Invalid risk config: {0}")]
    InvalidRisk(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_configs_valid() {
        assert!(OrchestrationConfig::default().validate().is_ok());
        assert!(ExitConfig::default().validate().is_ok());
        assert!(RiskConfig::default().validate().is_ok());
    }

    #[test]
    fn test_orchestration_defaults() {
        let config = OrchestrationConfig::default();
        assert_eq!(config.min_confidence_threshold, 60.0);
        assert_eq!(config.flat_market_confidence_threshold, 70.0);
        assert_eq!(config.signal_conflict_threshold, 0.4);
    }

    #[test]
    fn test_config_builder() {
        let config = OrchestrationConfig::default()
            .with_min_confidence(65.0)
            .with_conflict_threshold(0.3);
        assert_eq!(config.min_confidence_threshold, 65.0);
        assert_eq!(config.signal_conflict_threshold, 0.3);
    }

    #[test]
    fn test_invalid_orchestration() {
        let config = OrchestrationConfig::default().with_min_confidence(120.0);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidConfidence("min_confidence_threshold", _))
        ));

        let config = OrchestrationConfig::default().with_conflict_threshold(0.0);
        assert!(matches!(config.validate(), Err(ConfigError::InvalidConflictThreshold(_))));
    }

    #[test]
    fn test_invalid_close_split() {
        let mut config = ExitConfig::default();
        config.tp_close_percents = [50.0, 30.0, 30.0];
        assert!(matches!(config.validate(), Err(ConfigError::InvalidCloseSplit(_))));
    }

    #[test]
    fn test_invalid_trailing_band() {
        let mut config = ExitConfig::default();
        config.trailing.min_distance_percent = 4.0;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidTrailing(_))));
    }

    #[test]
    fn test_invalid_risk() {
        let mut risk = RiskConfig::default();
        risk.max_positions = 0;
        assert!(risk.validate().is_err());

        let mut risk = RiskConfig::default();
        risk.min_position_size_usdt = 2000.0;
        assert!(risk.validate().is_err());
    }
}
