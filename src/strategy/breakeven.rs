//! Breakeven lock-in after the first take-profit.
//!
//! Once TP1 has been taken the stop is moved just past entry. If the trade
//! already shows enough profit the lock happens on the TP1 tick itself;
//! otherwise every evaluation counts as one candle and the lock is forced
//! once the wait runs out.

use crate::domain::lifecycle::PreBreakevenMode;
use crate::domain::position::{Position, Side};

use super::params::BreakevenConfig;

/// Breakeven stop for `side`, offset from entry by `margin_percent` in the
/// position's favor. Never worse than entry for a non-negative margin.
pub fn breakeven_price(entry_price: f64, side: Side, margin_percent: f64) -> f64 {
    let margin = margin_percent.max(0.0) / 100.0;
    match side {
        Side::Long => entry_price * (1.0 + margin),
        Side::Short => entry_price * (1.0 - margin),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockTrigger {
    ProfitThreshold,
    WaitExhausted,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BreakevenLock {
    pub price: f64,
    pub trigger: LockTrigger,
}

/// Result of one pre-breakeven evaluation
#[derive(Debug, Clone, PartialEq)]
pub struct BreakevenTick {
    pub mode: PreBreakevenMode,
    pub lock: Option<BreakevenLock>,
    /// Whether `mode` differs from the input and needs persisting
    pub changed: bool,
}

#[derive(Debug, Clone)]
pub struct BreakevenPolicy {
    config: BreakevenConfig,
}

impl BreakevenPolicy {
    pub fn new(config: BreakevenConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BreakevenConfig {
        &self.config
    }

    pub fn price_for(&self, position: &Position) -> f64 {
        breakeven_price(position.entry_price, position.side, self.config.profit_margin_percent)
    }

    /// Start tracking on the TP1 tick, locking at once when profit allows
    pub fn arm(&self, position: &Position, current_price: f64) -> BreakevenTick {
        let mut mode = PreBreakevenMode::new(self.config.max_wait_candles);
        let profit = position.pnl_percent(current_price);

        let lock = if profit > self.config.activation_profit_percent {
            Some(self.lock(&mut mode, position, LockTrigger::ProfitThreshold))
        } else {
            None
        };

        BreakevenTick {
            mode,
            lock,
            changed: true,
        }
    }

    /// Count one candle while waiting for the lock
    pub fn tick(
        &self,
        mode: &PreBreakevenMode,
        position: &Position,
        current_price: f64,
    ) -> BreakevenTick {
        if mode.breakeven_locked {
            return BreakevenTick {
                mode: mode.clone(),
                lock: None,
                changed: false,
            };
        }

        let mut next = mode.clone();
        next.candles_waited = next.candles_waited.saturating_add(1);
        let profit = position.pnl_percent(current_price);

        let trigger = if profit > self.config.activation_profit_percent {
            Some(LockTrigger::ProfitThreshold)
        } else if next.candles_waited >= next.max_candles {
            Some(LockTrigger::WaitExhausted)
        } else {
            None
        };

        let lock = trigger.map(|t| self.lock(&mut next, position, t));
        BreakevenTick {
            mode: next,
            lock,
            changed: true,
        }
    }

    fn lock(
        &self,
        mode: &mut PreBreakevenMode,
        position: &Position,
        trigger: LockTrigger,
    ) -> BreakevenLock {
        let price = self.price_for(position);
        mode.breakeven_locked = true;
        mode.breakeven_price = Some(price);
        tracing::debug!(
            position_id = %position.id,
            "Breakeven locked at {:.6} ({:?}, {} candle(s) waited)",
            price,
            trigger,
            mode.candles_waited
        );
        BreakevenLock { price, trigger }
    }
}

impl Default for BreakevenPolicy {
    fn default() -> Self {
        Self::new(BreakevenConfig::default())
    }
}
