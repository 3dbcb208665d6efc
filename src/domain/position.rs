use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use super::signal::TakeProfit;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// Signed PnL percent of `price` relative to `entry` for this side
    pub fn pnl_percent(&self, entry: f64, price: f64) -> f64 {
        if entry <= 0.0 {
            return 0.0;
        }
        match self {
            Side::Long => (price - entry) / entry * 100.0,
            Side::Short => (entry - price) / entry * 100.0,
        }
    }

    /// True when `candidate` is strictly more favorable than `current`
    /// as a protective stop for this side.
    pub fn is_tighter_stop(&self, candidate: f64, current: f64) -> bool {
        match self {
            Side::Long => candidate > current,
            Side::Short => candidate < current,
        }
    }

    /// Whether `price` has touched or crossed `stop`. Inclusive.
    pub fn is_stop_hit(&self, price: f64, stop: f64) -> bool {
        match self {
            Side::Long => price <= stop,
            Side::Short => price >= stop,
        }
    }

    /// Whether `price` has reached `target` in this side's favor. Inclusive.
    pub fn has_reached(&self, price: f64, target: f64) -> bool {
        match self {
            Side::Long => price >= target,
            Side::Short => price <= target,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Long => write!(f, "LONG"),
            Side::Short => write!(f, "SHORT"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Open,
    Closed,
}

impl Status {
    fn default_open() -> Self {
        Status::Open
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopLossConfig {
    pub price: f64,
    pub initial_price: f64,
    #[serde(default)]
    pub is_breakeven: bool,
    #[serde(default)]
    pub is_trailing: bool,
    #[serde(default)]
    pub trailing_distance: Option<f64>,
    #[serde(default)]
    pub trailing_activation_price: Option<f64>,
}

impl StopLossConfig {
    pub fn new(price: f64) -> Self {
        Self {
            price,
            initial_price: price,
            is_breakeven: false,
            is_trailing: false,
            trailing_distance: None,
            trailing_activation_price: None,
        }
    }
}

/// An open trade as owned by the executor. The orchestrators only read it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub id: String,
    #[serde(default)]
    pub journal_id: Option<String>,
    pub symbol: String,
    pub side: Side,
    pub quantity: f64,
    pub entry_price: f64,
    pub stop_loss: StopLossConfig,
    #[serde(default)]
    pub take_profits: Vec<TakeProfit>,
    #[serde(default = "Utc::now")]
    pub opened_at: DateTime<Utc>,
    #[serde(default = "Status::default_open")]
    pub status: Status,
}

#[derive(Debug, Error)]
pub enum PositionError {
    #[error("Invalid quantity: {0}")]
    InvalidQuantity(f64),
    #[error("Invalid entry price: {0}")]
    InvalidEntryPrice(f64),
    #[error("Position identity is incomplete (id: '{0}', symbol: '{1}')")]
    MissingIdentity(String, String),
    #[error("Take-profit size shares sum to {0}%, expected 100%")]
    SizeSharesMismatch(f64),
    #[error("Take-profit level {0} at {1} is not beyond the previous level")]
    NonMonotonicLevel(u8, f64),
}

impl Position {
    pub fn new(
        id: impl Into<String>,
        symbol: impl Into<String>,
        side: Side,
        entry_price: f64,
        quantity: f64,
        stop_loss: f64,
    ) -> Result<Self, PositionError> {
        let position = Self {
            id: id.into(),
            journal_id: None,
            symbol: symbol.into(),
            side,
            quantity,
            entry_price,
            stop_loss: StopLossConfig::new(stop_loss),
            take_profits: Vec::new(),
            opened_at: Utc::now(),
            status: Status::Open,
        };
        position.validate()?;
        Ok(position)
    }

    pub fn with_take_profits(mut self, take_profits: Vec<TakeProfit>) -> Result<Self, PositionError> {
        self.take_profits = take_profits;
        self.validate_take_profits()?;
        Ok(self)
    }

    /// Basic shape checks used as the exit precondition
    pub fn validate(&self) -> Result<(), PositionError> {
        if self.id.trim().is_empty() || self.symbol.trim().is_empty() {
            return Err(PositionError::MissingIdentity(self.id.clone(), self.symbol.clone()));
        }
        if !(self.quantity.is_finite() && self.quantity > 0.0) {
            return Err(PositionError::InvalidQuantity(self.quantity));
        }
        if !(self.entry_price.is_finite() && self.entry_price > 0.0) {
            return Err(PositionError::InvalidEntryPrice(self.entry_price));
        }
        Ok(())
    }

    /// Size shares must add up to 100 and every level must sit further from
    /// entry (in the position's favor) than the one before it.
    pub fn validate_take_profits(&self) -> Result<(), PositionError> {
        if self.take_profits.is_empty() {
            return Ok(());
        }

        let total: f64 = self.take_profits.iter().map(|tp| tp.size_percent).sum();
        if (total - 100.0).abs() > 0.01 {
            return Err(PositionError::SizeSharesMismatch(total));
        }

        let mut previous = self.entry_price;
        for tp in &self.take_profits {
            if !self.side.is_tighter_stop(tp.price, previous) {
                return Err(PositionError::NonMonotonicLevel(tp.level, tp.price));
            }
            previous = tp.price;
        }
        Ok(())
    }

    pub fn take_profit(&self, level: u8) -> Option<&TakeProfit> {
        self.take_profits.iter().find(|tp| tp.level == level)
    }

    pub fn notional(&self) -> f64 {
        self.quantity * self.entry_price
    }

    pub fn pnl_percent(&self, current_price: f64) -> f64 {
        self.side.pnl_percent(self.entry_price, current_price)
    }

    pub fn is_open(&self) -> bool {
        self.status == Status::Open
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn ladder(side: Side) -> Vec<TakeProfit> {
        match side {
            Side::Long => vec![
                TakeProfit::new(1, 0.5, 50.0, 100.5),
                TakeProfit::new(2, 1.0, 30.0, 101.0),
                TakeProfit::new(3, 2.0, 20.0, 102.0),
            ],
            Side::Short => vec![
                TakeProfit::new(1, 0.5, 50.0, 99.5),
                TakeProfit::new(2, 1.0, 30.0, 99.0),
                TakeProfit::new(3, 2.0, 20.0, 98.0),
            ],
        }
    }

    #[test]
    fn test_new_position() {
        let position = Position::new("p-1", "BTCUSDT", Side::Long, 100.0, 1.0, 98.0).unwrap();
        assert_eq!(position.side, Side::Long);
        assert_eq!(position.status, Status::Open);
        assert_eq!(position.stop_loss.price, 98.0);
        assert_eq!(position.stop_loss.initial_price, 98.0);
        assert!(position.is_open());
    }

    #[test]
    fn test_new_position_invalid_quantity() {
        let result = Position::new("p-1", "BTCUSDT", Side::Long, 100.0, 0.0, 98.0);
        assert!(matches!(result, Err(PositionError::InvalidQuantity(_))));
    }

    #[test]
    fn test_new_position_invalid_price() {
        let result = Position::new("p-1", "BTCUSDT", Side::Long, 0.0, 1.0, 98.0);
        assert!(matches!(result, Err(PositionError::InvalidEntryPrice(_))));
    }

    #[test]
    fn test_new_position_missing_identity() {
        let result = Position::new("", "BTCUSDT", Side::Long, 100.0, 1.0, 98.0);
        assert!(matches!(result, Err(PositionError::MissingIdentity(_, _))));
    }

    #[test]
    fn test_take_profit_ladder_validation() {
        let long = Position::new("p-1", "BTCUSDT", Side::Long, 100.0, 1.0, 98.0).unwrap();
        assert!(long.clone().with_take_profits(ladder(Side::Long)).is_ok());

        let short = Position::new("p-2", "BTCUSDT", Side::Short, 100.0, 1.0, 102.0).unwrap();
        assert!(short.with_take_profits(ladder(Side::Short)).is_ok());

        let mut bad_sizes = ladder(Side::Long);
        bad_sizes[2].size_percent = 10.0;
        assert!(matches!(
            long.clone().with_take_profits(bad_sizes),
            Err(PositionError::SizeSharesMismatch(_))
        ));

        let mut out_of_order = ladder(Side::Long);
        out_of_order[1].price = 100.4;
        assert!(matches!(
            long.with_take_profits(out_of_order),
            Err(PositionError::NonMonotonicLevel(2, _))
        ));
    }

    #[test]
    fn test_pnl_percent() {
        let long = Position::new("p-1", "ETHUSDT", Side::Long, 100.0, 2.0, 98.0).unwrap();
        assert_relative_eq!(long.pnl_percent(101.0), 1.0, epsilon = 1e-9);
        assert_relative_eq!(long.notional(), 200.0, epsilon = 1e-9);

        let short = Position::new("p-2", "ETHUSDT", Side::Short, 100.0, 2.0, 102.0).unwrap();
        assert_relative_eq!(short.pnl_percent(101.0), -1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_tighter_stop() {
        assert!(Side::Long.is_tighter_stop(100.2, 98.0));
        assert!(!Side::Long.is_tighter_stop(98.0, 98.0));
        assert!(Side::Short.is_tighter_stop(101.0, 102.0));
        assert!(!Side::Short.is_tighter_stop(103.0, 102.0));
    }

    #[test]
    fn test_stop_hit() {
        assert!(Side::Long.is_stop_hit(98.0, 98.0));
        assert!(Side::Long.is_stop_hit(97.99, 98.0));
        assert!(!Side::Long.is_stop_hit(98.01, 98.0));
        assert!(Side::Short.is_stop_hit(98.0, 98.0));
        assert!(!Side::Short.is_stop_hit(97.0, 98.0));
    }

    #[test]
    fn test_target_reached() {
        assert!(Side::Long.has_reached(102.0, 102.0));
        assert!(!Side::Long.has_reached(101.99, 102.0));
        assert!(Side::Short.has_reached(98.0, 98.0));
        assert!(!Side::Short.has_reached(98.01, 98.0));
    }
}
