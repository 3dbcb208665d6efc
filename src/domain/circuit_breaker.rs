//! Circuit Breaker
//!
//! Daily P&L protection and loss-streak tracking that feeds the risk
//! manager. Trading halts once the day's realized loss or profit crosses
//! its limit, or after a configured number of consecutive losses.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default maximum daily loss as a percent of balance
pub const DEFAULT_MAX_DAILY_LOSS_PCT: f64 = 5.0;

/// Default daily profit target as a percent of balance
pub const DEFAULT_MAX_DAILY_PROFIT_PCT: f64 = 10.0;

/// Default loss streak that stops trading outright
pub const DEFAULT_STOP_AFTER_LOSSES: u32 = 6;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CircuitBreakerError {
    #[error("Daily loss {0:.2}% reached limit {1:.2}%")]
    DailyLossLimit(f64, f64),

    #[error("Daily profit {0:.2}% reached target {1:.2}%")]
    DailyProfitTarget(f64, f64),

    #[error("{0} consecutive losses reached limit {1}")]
    ConsecutiveLossLimit(u32, u32),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreaker {
    max_daily_loss_pct: f64,
    max_daily_profit_pct: f64,
    /// `None` disables the hard stop; sizing still shrinks with the streak
    stop_after_losses: Option<u32>,

    daily_pnl: f64,
    consecutive_losses: u32,
    day: Option<NaiveDate>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::with_config(
            DEFAULT_MAX_DAILY_LOSS_PCT,
            DEFAULT_MAX_DAILY_PROFIT_PCT,
            Some(DEFAULT_STOP_AFTER_LOSSES),
        )
    }
}

impl CircuitBreaker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(
        max_daily_loss_pct: f64,
        max_daily_profit_pct: f64,
        stop_after_losses: Option<u32>,
    ) -> Self {
        Self {
            max_daily_loss_pct,
            max_daily_profit_pct,
            stop_after_losses,
            daily_pnl: 0.0,
            consecutive_losses: 0,
            day: None,
        }
    }

    /// Record a realized trade. Losses extend the streak, wins reset it and a
    /// flat trade leaves it untouched.
    pub fn record_trade(&mut self, pnl_usdt: f64, timestamp: DateTime<Utc>) {
        self.check_day_rollover(timestamp);

        self.daily_pnl += pnl_usdt;

        if pnl_usdt < 0.0 {
            self.consecutive_losses += 1;
            tracing::debug!(
                "Loss recorded: {:.2} USDT (consecutive: {}, daily: {:.2})",
                pnl_usdt,
                self.consecutive_losses,
                self.daily_pnl
            );
        } else if pnl_usdt > 0.0 {
            if self.consecutive_losses > 0 {
                tracing::debug!("Win recorded: {:.2} USDT (loss streak reset)", pnl_usdt);
            }
            self.consecutive_losses = 0;
        }
    }

    /// Validate that a new trade may open at `now` given `balance`
    pub fn check(&self, balance: f64, now: DateTime<Utc>) -> Result<(), CircuitBreakerError> {
        if let Some(limit) = self.stop_after_losses {
            if limit > 0 && self.consecutive_losses >= limit {
                return Err(CircuitBreakerError::ConsecutiveLossLimit(
                    self.consecutive_losses,
                    limit,
                ));
            }
        }

        let daily_pct = self.daily_pnl_pct_at(balance, now);
        if daily_pct <= -self.max_daily_loss_pct {
            return Err(CircuitBreakerError::DailyLossLimit(
                daily_pct.abs(),
                self.max_daily_loss_pct,
            ));
        }
        if daily_pct >= self.max_daily_profit_pct {
            return Err(CircuitBreakerError::DailyProfitTarget(
                daily_pct,
                self.max_daily_profit_pct,
            ));
        }
        Ok(())
    }

    /// Daily PnL seen from `now`; a later day has not booked anything yet
    pub fn daily_pnl_at(&self, now: DateTime<Utc>) -> f64 {
        match self.day {
            Some(day) if day == now.date_naive() => self.daily_pnl,
            _ => 0.0,
        }
    }

    pub fn daily_pnl_pct_at(&self, balance: f64, now: DateTime<Utc>) -> f64 {
        if balance <= 0.0 {
            return 0.0;
        }
        self.daily_pnl_at(now) / balance * 100.0
    }

    pub fn consecutive_losses(&self) -> u32 {
        self.consecutive_losses
    }

    pub fn daily_pnl(&self) -> f64 {
        self.daily_pnl
    }

    fn check_day_rollover(&mut self, timestamp: DateTime<Utc>) {
        let today = timestamp.date_naive();
        if self.day != Some(today) {
            if self.day.is_some() {
                tracing::info!("Day rollover detected, resetting daily P&L");
            }
            self.day = Some(today);
            self.daily_pnl = 0.0;
            // Loss streaks span days
        }
    }
}
