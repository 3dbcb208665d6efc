//! Risk Manager
//!
//! Admission control for new positions. Sizes a candidate trade from the
//! account balance, shrinks it during loss streaks and rejects it when the
//! daily circuit breaker, the position count or the exposure budget would
//! be violated.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::circuit_breaker::{CircuitBreaker, CircuitBreakerError};
use super::position::Position;
use super::signal::Signal;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RiskError {
    #[error("Invalid account balance: {0}")]
    InvalidBalance(f64),

    #[error("Risk service unavailable: {0}")]
    Unavailable(String),
}

/// Risk limits and sizing parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Base position size as a percent of balance
    pub risk_per_trade_percent: f64,
    pub min_position_size_usdt: f64,
    pub max_position_size_usdt: f64,
    /// Position notional may not exceed balance times this
    pub max_leverage_multiplier: f64,
    pub max_positions: usize,
    pub max_total_exposure_percent: f64,
    pub max_daily_loss_percent: f64,
    pub max_daily_profit_percent: f64,
    /// Hard stop after this many consecutive losses, `None` to rely on sizing alone
    pub stop_after_consecutive_losses: Option<u32>,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            risk_per_trade_percent: 10.0,
            min_position_size_usdt: 5.0,
            max_position_size_usdt: 1000.0,
            max_leverage_multiplier: 1.0,
            max_positions: 3,
            max_total_exposure_percent: 50.0,
            max_daily_loss_percent: 5.0,
            max_daily_profit_percent: 10.0,
            stop_after_consecutive_losses: Some(6),
        }
    }
}

/// Breakdown attached to every decision
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskDetails {
    pub base_position_size: f64,
    pub loss_streak_multiplier: f64,
    pub consecutive_losses: u32,
    pub open_positions: usize,
    /// Notional of the open positions, USDT
    pub total_exposure: f64,
    /// Exposure after adding the candidate, percent of balance
    pub projected_exposure_percent: f64,
    pub daily_pnl: f64,
    pub daily_pnl_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskDecision {
    pub allowed: bool,
    pub adjusted_position_size: f64,
    pub reason: String,
    pub details: RiskDetails,
}

impl RiskDecision {
    fn deny(reason: impl Into<String>, details: RiskDetails) -> Self {
        Self {
            allowed: false,
            adjusted_position_size: 0.0,
            reason: reason.into(),
            details,
        }
    }
}

/// Size multiplier for a loss streak of `consecutive_losses`
pub fn loss_streak_multiplier(consecutive_losses: u32) -> f64 {
    match consecutive_losses {
        0 | 1 => 1.0,
        2 => 0.75,
        3 => 0.5,
        _ => 0.25,
    }
}

#[derive(Debug, Clone)]
pub struct RiskManager {
    config: RiskConfig,
    breaker: CircuitBreaker,
}

impl RiskManager {
    pub fn new(config: RiskConfig) -> Self {
        let breaker = CircuitBreaker::with_config(
            config.max_daily_loss_percent,
            config.max_daily_profit_percent,
            config.stop_after_consecutive_losses,
        );
        Self { config, breaker }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    /// Admission check at the current wall-clock time
    pub fn can_trade(
        &self,
        signal: &Signal,
        account_balance: f64,
        open_positions: &[Position],
    ) -> Result<RiskDecision, RiskError> {
        self.can_trade_at(signal, account_balance, open_positions, Utc::now())
    }

    /// Admission check as of `now`. A non-positive balance is a precondition
    /// failure and returns `Err`; every business rejection is an `Ok` decision
    /// with `allowed == false`.
    pub fn can_trade_at(
        &self,
        signal: &Signal,
        account_balance: f64,
        open_positions: &[Position],
        now: DateTime<Utc>,
    ) -> Result<RiskDecision, RiskError> {
        if !(account_balance.is_finite() && account_balance > 0.0) {
            return Err(RiskError::InvalidBalance(account_balance));
        }

        let consecutive_losses = self.breaker.consecutive_losses();
        let multiplier = loss_streak_multiplier(consecutive_losses);
        let base_size = account_balance * self.config.risk_per_trade_percent / 100.0;
        let total_exposure: f64 = open_positions
            .iter()
            .filter(|p| p.is_open())
            .map(Position::notional)
            .sum();
        let open_count = open_positions.iter().filter(|p| p.is_open()).count();

        let mut details = RiskDetails {
            base_position_size: base_size,
            loss_streak_multiplier: multiplier,
            consecutive_losses,
            open_positions: open_count,
            total_exposure,
            projected_exposure_percent: total_exposure / account_balance * 100.0,
            daily_pnl: self.breaker.daily_pnl_at(now),
            daily_pnl_percent: self.breaker.daily_pnl_pct_at(account_balance, now),
        };

        if let Err(e) = self.breaker.check(account_balance, now) {
            let reason = match e {
                CircuitBreakerError::DailyLossLimit(..) => format!("Daily loss limit hit: {}", e),
                CircuitBreakerError::DailyProfitTarget(..) => {
                    format!("Daily profit target reached: {}", e)
                }
                CircuitBreakerError::ConsecutiveLossLimit(..) => {
                    format!("Loss streak limit hit: {}", e)
                }
            };
            tracing::warn!("Trade denied for {} signal: {}", signal.direction, reason);
            return Ok(RiskDecision::deny(reason, details));
        }

        if open_count >= self.config.max_positions {
            return Ok(RiskDecision::deny(
                format!(
                    "Max positions reached: {} open, limit {}",
                    open_count, self.config.max_positions
                ),
                details,
            ));
        }

        let leverage_cap = account_balance * self.config.max_leverage_multiplier;
        let size = (base_size * multiplier)
            .clamp(self.config.min_position_size_usdt, self.config.max_position_size_usdt)
            .min(leverage_cap);

        if size < self.config.min_position_size_usdt {
            return Ok(RiskDecision::deny(
                format!(
                    "Position size {:.2} USDT below minimum {:.2} USDT at {:.1}x leverage",
                    size, self.config.min_position_size_usdt, self.config.max_leverage_multiplier
                ),
                details,
            ));
        }

        let projected_pct = (total_exposure + size) / account_balance * 100.0;
        details.projected_exposure_percent = projected_pct;
        if projected_pct > self.config.max_total_exposure_percent {
            return Ok(RiskDecision::deny(
                format!(
                    "Total exposure {:.1}% would exceed limit {:.1}%",
                    projected_pct, self.config.max_total_exposure_percent
                ),
                details,
            ));
        }

        let reason = if multiplier < 1.0 {
            format!(
                "Approved at {:.2} USDT ({:.0}% size after {} consecutive losses)",
                size,
                multiplier * 100.0,
                consecutive_losses
            )
        } else {
            format!("Approved at {:.2} USDT", size)
        };

        Ok(RiskDecision {
            allowed: true,
            adjusted_position_size: size,
            reason,
            details,
        })
    }

    /// Feed a realized trade result (USDT) back into the manager
    pub fn record_trade_result(&mut self, pnl_usdt: f64) {
        self.record_trade_result_at(pnl_usdt, Utc::now());
    }

    pub fn record_trade_result_at(&mut self, pnl_usdt: f64, timestamp: DateTime<Utc>) {
        self.breaker.record_trade(pnl_usdt, timestamp);
    }

    pub fn consecutive_losses(&self) -> u32 {
        self.breaker.consecutive_losses()
    }
}

impl Default for RiskManager {
    fn default() -> Self {
        Self::new(RiskConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::position::Side;
    use crate::domain::signal::Direction;
    use approx::assert_relative_eq;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap()
    }

    fn long_signal() -> Signal {
        Signal::new(Direction::Long, 75.0, 100.0, 98.0)
    }

    fn open_position(id: &str, notional: f64) -> Position {
        Position::new(id, "BTCUSDT", Side::Long, 100.0, notional / 100.0, 98.0).unwrap()
    }

    #[test]
    fn test_invalid_balance_is_an_error() {
        let manager = RiskManager::default();
        assert_eq!(
            manager.can_trade_at(&long_signal(), 0.0, &[], now()),
            Err(RiskError::InvalidBalance(0.0))
        );
        assert!(manager.can_trade_at(&long_signal(), -10.0, &[], now()).is_err());
    }

    #[test]
    fn test_base_size_approved() {
        let manager = RiskManager::default();
        let decision = manager.can_trade_at(&long_signal(), 1000.0, &[], now()).unwrap();

        assert!(decision.allowed);
        assert_relative_eq!(decision.adjusted_position_size, 100.0, epsilon = 1e-9);
        assert_relative_eq!(decision.details.loss_streak_multiplier, 1.0);
        assert!(decision.reason.contains("Approved"));
    }

    #[test]
    fn test_loss_streak_sizing() {
        let mut manager = RiskManager::default();
        let base = 100.0;

        let expected = [(2, 0.75), (3, 0.5), (4, 0.25)];
        let mut recorded = 0;
        for (losses, factor) in expected {
            while recorded < losses {
                manager.record_trade_result_at(-1.0, now());
                recorded += 1;
            }
            let decision = manager.can_trade_at(&long_signal(), 1000.0, &[], now()).unwrap();
            assert!(decision.allowed);
            assert_relative_eq!(decision.adjusted_position_size, base * factor, epsilon = 1e-9);
        }

        manager.record_trade_result_at(5.0, now());
        let decision = manager.can_trade_at(&long_signal(), 1000.0, &[], now()).unwrap();
        assert_relative_eq!(decision.adjusted_position_size, base, epsilon = 1e-9);
        assert_eq!(loss_streak_multiplier(manager.consecutive_losses()), 1.0);
    }

    #[test]
    fn test_stop_after_n_losses() {
        let mut manager = RiskManager::new(RiskConfig {
            stop_after_consecutive_losses: Some(5),
            ..RiskConfig::default()
        });
        for _ in 0..5 {
            manager.record_trade_result_at(-1.0, now());
        }
        let decision = manager.can_trade_at(&long_signal(), 1000.0, &[], now()).unwrap();
        assert!(!decision.allowed);
        assert!(decision.reason.contains("Loss streak"));
        assert_eq!(decision.adjusted_position_size, 0.0);
    }

    #[test]
    fn test_max_positions() {
        let manager = RiskManager::default();
        let open: Vec<Position> = (0..3).map(|i| open_position(&format!("p-{}", i), 10.0)).collect();
        let decision = manager.can_trade_at(&long_signal(), 1000.0, &open, now()).unwrap();
        assert!(!decision.allowed);
        assert!(decision.reason.contains("Max positions"));
    }

    #[test]
    fn test_exposure_cap() {
        let manager = RiskManager::default();
        let open = vec![open_position("p-1", 450.0)];
        let decision = manager.can_trade_at(&long_signal(), 1000.0, &open, now()).unwrap();

        assert!(!decision.allowed);
        assert!(decision.reason.contains("exposure"));
        assert_relative_eq!(decision.details.total_exposure, 450.0, epsilon = 1e-9);
        assert_relative_eq!(decision.details.projected_exposure_percent, 55.0, epsilon = 1e-9);
    }

    #[test]
    fn test_daily_loss_breaker() {
        let mut manager = RiskManager::default();
        manager.record_trade_result_at(60.0, now());
        manager.record_trade_result_at(-120.0, now());
        let decision = manager.can_trade_at(&long_signal(), 1000.0, &[], now()).unwrap();
        assert!(!decision.allowed);
        assert!(decision.reason.contains("Daily loss"));
    }

    #[test]
    fn test_daily_profit_breaker() {
        let mut manager = RiskManager::default();
        manager.record_trade_result_at(150.0, now());
        let decision = manager.can_trade_at(&long_signal(), 1000.0, &[], now()).unwrap();
        assert!(!decision.allowed);
        assert!(decision.reason.contains("Daily profit"));
    }

    #[test]
    fn test_size_clamped_to_bounds() {
        let manager = RiskManager::default();

        let small = manager.can_trade_at(&long_signal(), 20.0, &[], now()).unwrap();
        assert!(small.allowed);
        assert_relative_eq!(small.adjusted_position_size, 5.0, epsilon = 1e-9);

        let large = RiskManager::new(RiskConfig {
            max_total_exposure_percent: 100.0,
            ..RiskConfig::default()
        });
        let decision = large.can_trade_at(&long_signal(), 50_000.0, &[], now()).unwrap();
        assert_relative_eq!(decision.adjusted_position_size, 1000.0, epsilon = 1e-9);
    }

    #[test]
    fn test_leverage_cap_below_minimum_denies() {
        let manager = RiskManager::new(RiskConfig {
            max_total_exposure_percent: 1000.0,
            ..RiskConfig::default()
        });
        let decision = manager.can_trade_at(&long_signal(), 3.0, &[], now()).unwrap();
        assert!(!decision.allowed);
        assert!(decision.reason.contains("below minimum"));
    }

    #[test]
    fn test_multiplier_table() {
        assert_eq!(loss_streak_multiplier(0), 1.0);
        assert_eq!(loss_streak_multiplier(1), 1.0);
        assert_eq!(loss_streak_multiplier(2), 0.75);
        assert_eq!(loss_streak_multiplier(3), 0.5);
        assert_eq!(loss_streak_multiplier(4), 0.25);
        assert_eq!(loss_streak_multiplier(9), 0.25);
    }
}
