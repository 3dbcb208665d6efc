//! Exit Orchestrator
//!
//! Per-tick evaluator that walks an open position through the take-profit
//! ladder. Priority order on every tick:
//! 1. Stop-loss (the tighter of the position stop and the trailing stop)
//! 2. The single take-profit level matching the current lifecycle state
//! 3. Breakeven lock-in while in TP1_HIT
//! 4. Trailing ratchet while in TP2_HIT
//!
//! The orchestrator never mutates the `Position`; it returns actions for the
//! executor. Any failure during evaluation degrades to CLOSED / CLOSE_ALL.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

use crate::domain::lifecycle::{
    ClosureReason, LifecycleError, LifecycleState, ModeUpdate, Patch, PositionKey,
    PositionLifecycleStateMachine, PositionStateMachineState, PreBreakevenMode, TransitionResult,
};
use crate::domain::market::ExitIndicators;
use crate::domain::position::{Position, PositionError, Side};
use crate::strategy::adaptive_target::AdaptiveTargetCalculator;
use crate::strategy::breakeven::BreakevenPolicy;
use crate::strategy::params::{ExitConfig, TrailingMethod};
use crate::strategy::trailing::{band_stop, SmartTrailing, TrailingTracker};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExitAction {
    ClosePercent {
        percent: f64,
    },
    #[serde(rename_all = "camelCase")]
    UpdateSl {
        new_stop_loss: f64,
    },
    #[serde(rename_all = "camelCase")]
    ActivateTrailing {
        trailing_distance: f64,
    },
    CloseAll,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExitOrchestratorResult {
    pub target_state: LifecycleState,
    pub actions: Vec<ExitAction>,
    pub label: String,
}

impl ExitOrchestratorResult {
    fn new(target_state: LifecycleState, actions: Vec<ExitAction>, label: impl Into<String>) -> Self {
        Self {
            target_state,
            actions,
            label: label.into(),
        }
    }

    fn hold(state: LifecycleState, label: impl Into<String>) -> Self {
        Self::new(state, Vec::new(), label)
    }

    pub fn is_close_all(&self) -> bool {
        self.actions.iter().any(|a| matches!(a, ExitAction::CloseAll))
    }

    /// Sum of the partial-close percentages in this result
    pub fn closed_percent(&self) -> f64 {
        self.actions
            .iter()
            .map(|a| match a {
                ExitAction::ClosePercent { percent } => *percent,
                _ => 0.0,
            })
            .sum()
    }
}

#[derive(Debug, Error)]
pub enum ExitError {
    #[error("Invalid position: {0}")]
    InvalidPosition(#[from] PositionError),
    #[error("Invalid price: {0}")]
    InvalidPrice(f64),
    #[error("Lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),
}

pub struct ExitOrchestrator {
    config: ExitConfig,
    breakeven: BreakevenPolicy,
    trailing: SmartTrailing,
    adaptive_target: AdaptiveTargetCalculator,
    state_machine: PositionLifecycleStateMachine,
    trackers: HashMap<PositionKey, TrailingTracker>,
}

impl ExitOrchestrator {
    pub fn new(config: ExitConfig, state_machine: PositionLifecycleStateMachine) -> Self {
        Self {
            breakeven: BreakevenPolicy::new(config.breakeven.clone()),
            trailing: SmartTrailing::new(config.trailing.clone()),
            adaptive_target: AdaptiveTargetCalculator::new(config.adaptive_target.clone()),
            config,
            state_machine,
            trackers: HashMap::new(),
        }
    }

    /// Orchestrator backed by a non-persistent state machine
    pub fn in_memory(config: ExitConfig) -> Self {
        Self::new(config, PositionLifecycleStateMachine::new())
    }

    pub fn config(&self) -> &ExitConfig {
        &self.config
    }

    pub fn state_machine(&self) -> &PositionLifecycleStateMachine {
        &self.state_machine
    }

    /// Latest lifecycle record for `symbol`
    pub fn get_position_state(&self, symbol: &str) -> Option<&PositionStateMachineState> {
        self.state_machine.get_position_state(symbol)
    }

    /// Drop the lifecycle record and trailing tracker once the executor has
    /// confirmed the exchange-side close. Live records are refused.
    pub fn reset_position_state(
        &mut self,
        symbol: &str,
        position_id: &str,
    ) -> Result<bool, LifecycleError> {
        let cleared = self.state_machine.clear_state(symbol, position_id)?;
        self.trackers.remove(&PositionKey::new(symbol, position_id));
        Ok(cleared)
    }

    /// Evaluate one price tick for `position`
    pub fn evaluate_exit(
        &mut self,
        position: &Position,
        current_price: f64,
        indicators: Option<&ExitIndicators>,
    ) -> ExitOrchestratorResult {
        match self.try_evaluate(position, current_price, indicators) {
            Ok(result) => {
                tracing::debug!(
                    symbol = %position.symbol,
                    position_id = %position.id,
                    state = %result.target_state,
                    price = current_price,
                    "{} ({} action(s))",
                    result.label,
                    result.actions.len()
                );
                result
            }
            Err(e) => self.fail_safe(position, current_price, e),
        }
    }

    fn try_evaluate(
        &mut self,
        position: &Position,
        price: f64,
        indicators: Option<&ExitIndicators>,
    ) -> Result<ExitOrchestratorResult, ExitError> {
        position.validate()?;
        if !(price.is_finite() && price > 0.0) {
            return Err(ExitError::InvalidPrice(price));
        }

        let key = PositionKey::new(position.symbol.as_str(), position.id.as_str());
        let state = self.state_machine.current_state(&position.symbol, &position.id);
        if state.is_terminal() {
            return Ok(ExitOrchestratorResult::hold(state, "CLOSED (no action)"));
        }

        self.rehydrate_tracker(&key, position.side);

        if let Some((stop, trailing)) = self.effective_stop(&key, position) {
            if position.side.is_stop_hit(price, stop) {
                return self.close_on_stop(&key, position, state, price, stop, trailing);
            }
        }

        match state {
            LifecycleState::Open => self.evaluate_open(position, price),
            LifecycleState::Tp1Hit => self.evaluate_tp1(&key, position, price, indicators),
            LifecycleState::Tp2Hit => self.evaluate_tp2(&key, position, price, indicators),
            LifecycleState::Tp3Hit | LifecycleState::Closed => Ok(ExitOrchestratorResult::hold(
                state,
                format!("{} (holding for stop)", state),
            )),
        }
    }

    fn close_on_stop(
        &mut self,
        key: &PositionKey,
        position: &Position,
        state: LifecycleState,
        price: f64,
        stop: f64,
        trailing: bool,
    ) -> Result<ExitOrchestratorResult, ExitError> {
        let reason = if trailing {
            ClosureReason::TrailingStop
        } else {
            ClosureReason::SlHit
        };
        let pnl = position.pnl_percent(price);
        self.state_machine
            .close_position(&position.symbol, &position.id, reason, price, pnl)?;
        self.trackers.remove(key);

        Ok(ExitOrchestratorResult::new(
            LifecycleState::Closed,
            vec![ExitAction::CloseAll],
            format!("{} -> CLOSED ({} at {:.6}, stop {:.6})", state, reason, price, stop),
        ))
    }

    fn evaluate_open(
        &mut self,
        position: &Position,
        price: f64,
    ) -> Result<ExitOrchestratorResult, ExitError> {
        let reached = position
            .take_profit(1)
            .map_or(false, |tp| tp.is_reached(position.side, price));
        if !reached {
            return Ok(ExitOrchestratorResult::hold(LifecycleState::Open, "OPEN (no level reached)"));
        }

        let tick = self.breakeven.arm(position, price);
        let mut actions = vec![ExitAction::ClosePercent {
            percent: self.config.tp_close_percents[0],
        }];
        if let Some(lock) = &tick.lock {
            if position.side.is_tighter_stop(lock.price, position.stop_loss.price) {
                actions.push(ExitAction::UpdateSl {
                    new_stop_loss: lock.price,
                });
            }
        }

        let transition = self.state_machine.transition(
            &position.symbol,
            &position.id,
            LifecycleState::Tp1Hit,
            ModeUpdate {
                pre_be_mode: Patch::Set(tick.mode),
                ..ModeUpdate::default()
            },
        )?;
        Ok(advance(transition, actions))
    }

    fn evaluate_tp1(
        &mut self,
        key: &PositionKey,
        position: &Position,
        price: f64,
        indicators: Option<&ExitIndicators>,
    ) -> Result<ExitOrchestratorResult, ExitError> {
        let reached = position
            .take_profit(2)
            .map_or(false, |tp| tp.is_reached(position.side, price));

        if reached {
            let distance = self.trailing.distance(price, indicators);
            let tracker = TrailingTracker::activate(position.side, price, distance.absolute);
            let transition = self.state_machine.transition(
                &position.symbol,
                &position.id,
                LifecycleState::Tp2Hit,
                ModeUpdate {
                    pre_be_mode: Patch::Clear,
                    trailing_mode: Patch::Set(tracker.to_mode()),
                    ..ModeUpdate::default()
                },
            )?;
            if transition.allowed {
                tracing::info!(
                    position = %key,
                    "Trailing activated at {:.6}, distance {:.6} ({:.2}%{})",
                    tracker.stop_price(),
                    distance.absolute,
                    distance.percent,
                    if distance.volume_tightened { ", volume-tightened" } else { "" }
                );
                self.trackers.insert(key.clone(), tracker);
            }
            return Ok(advance(
                transition,
                vec![
                    ExitAction::ClosePercent {
                        percent: self.config.tp_close_percents[1],
                    },
                    ExitAction::ActivateTrailing {
                        trailing_distance: distance.absolute,
                    },
                ],
            ));
        }

        let mode = self
            .state_machine
            .get_state(&position.symbol, &position.id)
            .and_then(|s| s.pre_be_mode.clone())
            .unwrap_or_else(|| PreBreakevenMode::new(self.config.breakeven.max_wait_candles));
        let tick = self.breakeven.tick(&mode, position, price);

        let label = if tick.mode.breakeven_locked {
            "TP1_HIT (breakeven locked)".to_string()
        } else {
            format!(
                "TP1_HIT (waiting for breakeven {}/{})",
                tick.mode.candles_waited, tick.mode.max_candles
            )
        };

        let mut actions = Vec::new();
        if let Some(lock) = &tick.lock {
            if position.side.is_tighter_stop(lock.price, position.stop_loss.price) {
                actions.push(ExitAction::UpdateSl {
                    new_stop_loss: lock.price,
                });
            }
        }
        if tick.changed {
            self.state_machine.update_modes(
                &position.symbol,
                &position.id,
                ModeUpdate {
                    pre_be_mode: Patch::Set(tick.mode),
                    ..ModeUpdate::default()
                },
            )?;
        }

        Ok(ExitOrchestratorResult::new(LifecycleState::Tp1Hit, actions, label))
    }

    fn evaluate_tp2(
        &mut self,
        key: &PositionKey,
        position: &Position,
        price: f64,
        indicators: Option<&ExitIndicators>,
    ) -> Result<ExitOrchestratorResult, ExitError> {
        let final_target = if self.adaptive_target.is_enabled() {
            Some(
                self.adaptive_target
                    .calculate(indicators)
                    .price(position.entry_price, position.side),
            )
        } else {
            position.take_profit(3).map(|tp| tp.price)
        };

        if final_target.map_or(false, |target| position.side.has_reached(price, target)) {
            let transition = self.state_machine.transition(
                &position.symbol,
                &position.id,
                LifecycleState::Tp3Hit,
                ModeUpdate::none(),
            )?;
            return Ok(advance(
                transition,
                vec![ExitAction::ClosePercent {
                    percent: self.config.tp_close_percents[2],
                }],
            ));
        }

        let distance = self.trailing.distance(price, indicators);
        let mut tracker = match self.trackers.get(key) {
            Some(tracker) => tracker.clone(),
            None => {
                let tracker = TrailingTracker::activate(position.side, price, distance.absolute);
                tracing::warn!(position = %key, "No trailing state found in TP2_HIT, rebuilt at {:.6}", price);
                self.state_machine.update_modes(
                    &position.symbol,
                    &position.id,
                    ModeUpdate {
                        trailing_mode: Patch::Set(tracker.to_mode()),
                        ..ModeUpdate::default()
                    },
                )?;
                self.trackers.insert(key.clone(), tracker);
                return Ok(ExitOrchestratorResult::hold(
                    LifecycleState::Tp2Hit,
                    "TP2_HIT (trailing rebuilt)",
                ));
            }
        };
        let before = tracker.clone();

        let trailing_cfg = &self.config.trailing;
        let band = match (trailing_cfg.method, indicators) {
            (TrailingMethod::Band, Some(ind)) => band_stop(
                position.side,
                &ind.closes(),
                trailing_cfg.band_period,
                trailing_cfg.band_std_dev,
            ),
            _ => None,
        };

        let moved = match &band {
            Some(band) => tracker.propose(band.stop_price),
            None => tracker.update(price, distance.percent),
        };

        if tracker != before {
            self.state_machine.update_modes(
                &position.symbol,
                &position.id,
                ModeUpdate {
                    trailing_mode: Patch::Set(tracker.to_mode()),
                    bb_trailing_mode: match (&band, moved) {
                        (Some(band), Some(_)) => Patch::Set(band.clone()),
                        _ => Patch::Keep,
                    },
                    ..ModeUpdate::default()
                },
            )?;
            self.trackers.insert(key.clone(), tracker);
        }

        let actions = match moved {
            Some(stop) if position.side.is_tighter_stop(stop, position.stop_loss.price) => {
                vec![ExitAction::UpdateSl { new_stop_loss: stop }]
            }
            _ => Vec::new(),
        };
        let label = match (&band, moved) {
            (Some(_), Some(stop)) => format!("TP2_HIT (band trail to {:.6})", stop),
            (None, Some(stop)) => format!("TP2_HIT (trail to {:.6})", stop),
            _ => "TP2_HIT (trailing)".to_string(),
        };

        Ok(ExitOrchestratorResult::new(LifecycleState::Tp2Hit, actions, label))
    }

    /// The more protective of the position stop and the trailing tracker,
    /// flagged with whether the trailing logic owns it
    fn effective_stop(&self, key: &PositionKey, position: &Position) -> Option<(f64, bool)> {
        let sl = &position.stop_loss;
        let static_stop = (sl.price.is_finite() && sl.price > 0.0).then_some((sl.price, sl.is_trailing));
        let tracker_stop = self.trackers.get(key).map(|t| (t.stop_price(), true));

        match (static_stop, tracker_stop) {
            (Some(s), Some(t)) => {
                if position.side.is_tighter_stop(t.0, s.0) {
                    Some(t)
                } else {
                    Some(s)
                }
            }
            (s, t) => s.or(t),
        }
    }

    fn rehydrate_tracker(&mut self, key: &PositionKey, side: Side) {
        if self.trackers.contains_key(key) {
            return;
        }
        let mode = self
            .state_machine
            .get_state(&key.symbol, &key.position_id)
            .and_then(|s| s.trailing_mode.as_ref());
        if let Some(mode) = mode {
            let tracker = TrailingTracker::from_mode(side, mode);
            tracing::debug!(position = %key, "Trailing tracker restored at {:.6}", tracker.stop_price());
            self.trackers.insert(key.clone(), tracker);
        }
    }

    fn fail_safe(&mut self, position: &Position, price: f64, error: ExitError) -> ExitOrchestratorResult {
        tracing::error!(
            symbol = %position.symbol,
            position_id = %position.id,
            "Exit evaluation failed, closing position: {}",
            error
        );

        if position.validate().is_ok() {
            let closing_price = if price.is_finite() && price > 0.0 {
                price
            } else {
                position.entry_price
            };
            let pnl = position.pnl_percent(closing_price);
            if let Err(e) = self.state_machine.close_position(
                &position.symbol,
                &position.id,
                ClosureReason::Other,
                closing_price,
                pnl,
            ) {
                tracing::error!(position_id = %position.id, "Failed to record fail-safe close: {}", e);
            }
            self.trackers
                .remove(&PositionKey::new(position.symbol.as_str(), position.id.as_str()));
        }

        ExitOrchestratorResult::new(
            LifecycleState::Closed,
            vec![ExitAction::CloseAll],
            format!("FAIL_SAFE -> CLOSED ({})", error),
        )
    }
}

fn advance(transition: TransitionResult, actions: Vec<ExitAction>) -> ExitOrchestratorResult {
    if !transition.allowed {
        return ExitOrchestratorResult::hold(
            transition.current_state,
            format!(
                "{} (transition rejected: {})",
                transition.current_state,
                transition.rejection.unwrap_or_default()
            ),
        );
    }
    ExitOrchestratorResult::new(
        transition.current_state,
        actions,
        format!("{} -> {}", transition.previous_state, transition.current_state),
    )
}
