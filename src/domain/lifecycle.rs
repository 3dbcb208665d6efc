//! Position Lifecycle State Machine
//!
//! Per-position progress through the take-profit ladder:
//!
//! ```text
//! OPEN -> TP1_HIT -> TP2_HIT -> TP3_HIT -> CLOSED
//!   \________\__________\__________\______/
//!            (any non-terminal -> CLOSED)
//! ```
//!
//! Transitions are validated against a fixed table. Rejected requests leave
//! the state untouched, so a closed position can never be resurrected and
//! state never moves backwards. When a [`StateLog`] is attached every change
//! is appended to it before the in-memory map is updated.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use thiserror::Error;

use super::state_log::{self, LogEvent, RecoveryReport, StateLog, StateLogError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleState {
    Open,
    Tp1Hit,
    Tp2Hit,
    Tp3Hit,
    Closed,
}

impl LifecycleState {
    /// Position in the forward ordering of the table
    pub fn rank(&self) -> u8 {
        match self {
            LifecycleState::Open => 0,
            LifecycleState::Tp1Hit => 1,
            LifecycleState::Tp2Hit => 2,
            LifecycleState::Tp3Hit => 3,
            LifecycleState::Closed => 4,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, LifecycleState::Closed)
    }

    /// The single forward step from this state, if any
    pub fn next(&self) -> Option<LifecycleState> {
        match self {
            LifecycleState::Open => Some(LifecycleState::Tp1Hit),
            LifecycleState::Tp1Hit => Some(LifecycleState::Tp2Hit),
            LifecycleState::Tp2Hit => Some(LifecycleState::Tp3Hit),
            LifecycleState::Tp3Hit => Some(LifecycleState::Closed),
            LifecycleState::Closed => None,
        }
    }

    pub fn can_transition_to(&self, target: LifecycleState) -> bool {
        if self.is_terminal() {
            return false;
        }
        target == LifecycleState::Closed || self.next() == Some(target)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Open => "OPEN",
            LifecycleState::Tp1Hit => "TP1_HIT",
            LifecycleState::Tp2Hit => "TP2_HIT",
            LifecycleState::Tp3Hit => "TP3_HIT",
            LifecycleState::Closed => "CLOSED",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClosureReason {
    SlHit,
    Tp1Hit,
    Tp2Hit,
    Tp3Hit,
    TrailingStop,
    Manual,
    Other,
}

impl fmt::Display for ClosureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ClosureReason::SlHit => "SL_HIT",
            ClosureReason::Tp1Hit => "TP1_HIT",
            ClosureReason::Tp2Hit => "TP2_HIT",
            ClosureReason::Tp3Hit => "TP3_HIT",
            ClosureReason::TrailingStop => "TRAILING_STOP",
            ClosureReason::Manual => "MANUAL",
            ClosureReason::Other => "OTHER",
        };
        write!(f, "{}", name)
    }
}

/// Candle counter used while waiting to lock breakeven after TP1
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreBreakevenMode {
    pub activated_at: DateTime<Utc>,
    pub candles_waited: u32,
    pub max_candles: u32,
    pub breakeven_locked: bool,
    #[serde(default)]
    pub breakeven_price: Option<f64>,
}

impl PreBreakevenMode {
    pub fn new(max_candles: u32) -> Self {
        Self {
            activated_at: Utc::now(),
            candles_waited: 0,
            max_candles,
            breakeven_locked: false,
            breakeven_price: None,
        }
    }
}

/// Volatility-aware trailing stop tracking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrailingMode {
    pub activated_at: DateTime<Utc>,
    pub distance: f64,
    pub stop_price: f64,
    /// Most favorable price seen since activation
    pub extreme_price: f64,
}

/// Bollinger-band trailing bounds from the last evaluation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BandTrailingMode {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
    pub stop_price: f64,
}

/// Field-level change to a mode payload
#[derive(Debug, Clone, PartialEq)]
pub enum Patch<T> {
    Keep,
    Set(T),
    Clear,
}

impl<T> Default for Patch<T> {
    fn default() -> Self {
        Patch::Keep
    }
}

impl<T> Patch<T> {
    fn apply(self, slot: &mut Option<T>) {
        match self {
            Patch::Keep => {}
            Patch::Set(value) => *slot = Some(value),
            Patch::Clear => *slot = None,
        }
    }

    fn is_keep(&self) -> bool {
        matches!(self, Patch::Keep)
    }
}

/// Mode metadata attached to a transition or a mode-only update
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ModeUpdate {
    pub pre_be_mode: Patch<PreBreakevenMode>,
    pub trailing_mode: Patch<TrailingMode>,
    pub bb_trailing_mode: Patch<BandTrailingMode>,
}

impl ModeUpdate {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.pre_be_mode.is_keep() && self.trailing_mode.is_keep() && self.bb_trailing_mode.is_keep()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionKey {
    pub symbol: String,
    pub position_id: String,
}

impl PositionKey {
    pub fn new(symbol: impl Into<String>, position_id: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            position_id: position_id.into(),
        }
    }
}

impl fmt::Display for PositionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.symbol, self.position_id)
    }
}

/// Persisted lifecycle record for one position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionStateMachineState {
    pub symbol: String,
    pub position_id: String,
    pub current_state: LifecycleState,
    pub state_changed_at: DateTime<Utc>,
    #[serde(default)]
    pub pre_be_mode: Option<PreBreakevenMode>,
    #[serde(default)]
    pub trailing_mode: Option<TrailingMode>,
    #[serde(default)]
    pub bb_trailing_mode: Option<BandTrailingMode>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub closure_reason: Option<ClosureReason>,
    #[serde(default)]
    pub closing_price: Option<f64>,
    /// Realized PnL in percent of entry
    #[serde(default)]
    pub realized_pnl: Option<f64>,
}

impl PositionStateMachineState {
    fn fresh(key: &PositionKey, now: DateTime<Utc>) -> Self {
        Self {
            symbol: key.symbol.clone(),
            position_id: key.position_id.clone(),
            current_state: LifecycleState::Open,
            state_changed_at: now,
            pre_be_mode: None,
            trailing_mode: None,
            bb_trailing_mode: None,
            created_at: now,
            closed_at: None,
            closure_reason: None,
            closing_price: None,
            realized_pnl: None,
        }
    }

    pub fn key(&self) -> PositionKey {
        PositionKey::new(self.symbol.clone(), self.position_id.clone())
    }

    fn apply_modes(&mut self, modes: ModeUpdate) {
        modes.pre_be_mode.apply(&mut self.pre_be_mode);
        modes.trailing_mode.apply(&mut self.trailing_mode);
        modes.bb_trailing_mode.apply(&mut self.bb_trailing_mode);
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TransitionError {
    #[error("Position is already CLOSED; {0} rejected")]
    Terminal(LifecycleState),
    #[error("Transition {0} -> {1} is not in the transition table")]
    NotAllowed(LifecycleState, LifecycleState),
}

/// Pure table check, independent of any storage
pub fn validate_transition(
    from: LifecycleState,
    to: LifecycleState,
) -> Result<(), TransitionError> {
    if from.is_terminal() {
        return Err(TransitionError::Terminal(to));
    }
    if !from.can_transition_to(to) {
        return Err(TransitionError::NotAllowed(from, to));
    }
    Ok(())
}

/// Outcome of a transition request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionResult {
    pub allowed: bool,
    pub previous_state: LifecycleState,
    pub current_state: LifecycleState,
    #[serde(default)]
    pub rejection: Option<String>,
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("State log error: {0}")]
    Log(#[from] StateLogError),
    #[error("No lifecycle record for {0}")]
    UnknownPosition(PositionKey),
    #[error("Cannot clear {0} while it is {1}, close it first")]
    NotClosed(PositionKey, LifecycleState),
}

/// Keyed lifecycle store. Each instance owns its own map so separate
/// strategies stay isolated.
#[derive(Debug, Default)]
pub struct PositionLifecycleStateMachine {
    states: HashMap<PositionKey, PositionStateMachineState>,
    log: Option<StateLog>,
}

impl PositionLifecycleStateMachine {
    /// In-memory store without persistence
    pub fn new() -> Self {
        Self::default()
    }

    /// Open (or create) the log at `path` and rebuild state by replaying it
    pub fn open(path: impl AsRef<Path>) -> Result<(Self, RecoveryReport), LifecycleError> {
        let (log, loaded) = StateLog::open(path.as_ref())?;
        let records_replayed = loaded.records.len();
        let states = state_log::replay(loaded.records);

        let report = RecoveryReport {
            records_replayed,
            skipped_lines: loaded.skipped_lines,
            live_positions: states.len(),
        };
        tracing::info!(
            path = %path.as_ref().display(),
            records = report.records_replayed,
            skipped = report.skipped_lines,
            positions = report.live_positions,
            "Lifecycle state rebuilt from log"
        );

        Ok((
            Self {
                states,
                log: Some(log),
            },
            report,
        ))
    }

    pub fn is_persistent(&self) -> bool {
        self.log.is_some()
    }

    /// Current state, `OPEN` when nothing has been recorded yet
    pub fn current_state(&self, symbol: &str, position_id: &str) -> LifecycleState {
        self.get_state(symbol, position_id)
            .map(|s| s.current_state)
            .unwrap_or(LifecycleState::Open)
    }

    pub fn get_state(&self, symbol: &str, position_id: &str) -> Option<&PositionStateMachineState> {
        self.states.get(&PositionKey::new(symbol, position_id))
    }

    /// Most recently changed record for `symbol`
    pub fn get_position_state(&self, symbol: &str) -> Option<&PositionStateMachineState> {
        self.states
            .values()
            .filter(|s| s.symbol == symbol)
            .max_by_key(|s| s.state_changed_at)
    }

    pub fn states(&self) -> impl Iterator<Item = &PositionStateMachineState> {
        self.states.values()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Request a transition to `target`, attaching `modes` to the new state.
    ///
    /// Table violations come back as `Ok` with `allowed == false`. `Err` is
    /// reserved for persistence failures, in which case memory is unchanged.
    pub fn transition(
        &mut self,
        symbol: &str,
        position_id: &str,
        target: LifecycleState,
        modes: ModeUpdate,
    ) -> Result<TransitionResult, LifecycleError> {
        let key = PositionKey::new(symbol, position_id);
        let now = Utc::now();
        let mut next = self
            .states
            .get(&key)
            .cloned()
            .unwrap_or_else(|| PositionStateMachineState::fresh(&key, now));
        let from = next.current_state;

        if let Err(e) = validate_transition(from, target) {
            tracing::warn!(position = %key, "Transition rejected: {}", e);
            return Ok(TransitionResult {
                allowed: false,
                previous_state: from,
                current_state: from,
                rejection: Some(e.to_string()),
            });
        }

        next.current_state = target;
        next.state_changed_at = now;
        next.apply_modes(modes);
        if target.is_terminal() {
            next.closed_at = Some(now);
        }

        self.commit(
            key.clone(),
            LogEvent::Transition {
                from,
                to: target,
                state: next,
            },
        )?;
        tracing::info!(position = %key, "Lifecycle {} -> {}", from, target);

        Ok(TransitionResult {
            allowed: true,
            previous_state: from,
            current_state: target,
            rejection: None,
        })
    }

    /// Update mode payloads without changing state
    pub fn update_modes(
        &mut self,
        symbol: &str,
        position_id: &str,
        modes: ModeUpdate,
    ) -> Result<(), LifecycleError> {
        if modes.is_empty() {
            return Ok(());
        }
        let key = PositionKey::new(symbol, position_id);
        let mut next = self
            .states
            .get(&key)
            .cloned()
            .ok_or_else(|| LifecycleError::UnknownPosition(key.clone()))?;
        next.apply_modes(modes);

        self.commit(key, LogEvent::ModeUpdate { state: next })
    }

    /// Transition to `CLOSED` and record why, where and with what result
    pub fn close_position(
        &mut self,
        symbol: &str,
        position_id: &str,
        reason: ClosureReason,
        closing_price: f64,
        realized_pnl: f64,
    ) -> Result<TransitionResult, LifecycleError> {
        let key = PositionKey::new(symbol, position_id);
        let now = Utc::now();
        let mut next = self
            .states
            .get(&key)
            .cloned()
            .unwrap_or_else(|| PositionStateMachineState::fresh(&key, now));
        let from = next.current_state;

        if let Err(e) = validate_transition(from, LifecycleState::Closed) {
            tracing::warn!(position = %key, "Close rejected: {}", e);
            return Ok(TransitionResult {
                allowed: false,
                previous_state: from,
                current_state: from,
                rejection: Some(e.to_string()),
            });
        }

        next.current_state = LifecycleState::Closed;
        next.state_changed_at = now;
        next.closed_at = Some(now);
        next.closure_reason = Some(reason);
        next.closing_price = Some(closing_price);
        next.realized_pnl = Some(realized_pnl);
        next.pre_be_mode = None;
        next.trailing_mode = None;
        next.bb_trailing_mode = None;

        self.commit(
            key.clone(),
            LogEvent::Transition {
                from,
                to: LifecycleState::Closed,
                state: next,
            },
        )?;
        tracing::info!(
            position = %key,
            reason = %reason,
            price = closing_price,
            pnl_pct = realized_pnl,
            "Lifecycle {} -> CLOSED",
            from
        );

        Ok(TransitionResult {
            allowed: true,
            previous_state: from,
            current_state: LifecycleState::Closed,
            rejection: None,
        })
    }

    /// Drop a position's record once the exchange-side close is confirmed.
    /// Returns whether a record existed. Only `CLOSED` records can be
    /// cleared; a live record would otherwise restart the ladder at `OPEN`.
    pub fn clear_state(&mut self, symbol: &str, position_id: &str) -> Result<bool, LifecycleError> {
        let key = PositionKey::new(symbol, position_id);
        let current = match self.states.get(&key) {
            Some(state) => state.current_state,
            None => return Ok(false),
        };
        if !current.is_terminal() {
            tracing::warn!(position = %key, "Refusing to clear live {} record", current);
            return Err(LifecycleError::NotClosed(key, current));
        }
        if let Some(log) = self.log.as_mut() {
            log.append(LogEvent::Cleared { key: key.clone() })?;
        }
        self.states.remove(&key);
        tracing::info!(position = %key, "Lifecycle record cleared");
        Ok(true)
    }

    fn commit(&mut self, key: PositionKey, event: LogEvent) -> Result<(), LifecycleError> {
        let state = match &event {
            LogEvent::Transition { state, .. } | LogEvent::ModeUpdate { state } => state.clone(),
            LogEvent::Cleared { .. } => return Ok(()),
        };
        if let Some(log) = self.log.as_mut() {
            log.append(event)?;
        }
        self.states.insert(key, state);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const ALL: [LifecycleState; 5] = [
        LifecycleState::Open,
        LifecycleState::Tp1Hit,
        LifecycleState::Tp2Hit,
        LifecycleState::Tp3Hit,
        LifecycleState::Closed,
    ];

    #[test]
    fn test_transition_table() {
        for from in ALL {
            for to in ALL {
                let expected = !from.is_terminal()
                    && (to == LifecycleState::Closed || to.rank() == from.rank() + 1);
                assert_eq!(
                    validate_transition(from, to).is_ok(),
                    expected,
                    "{} -> {}",
                    from,
                    to
                );
            }
        }
    }

    #[test]
    fn test_closed_is_terminal() {
        assert_eq!(
            validate_transition(LifecycleState::Closed, LifecycleState::Closed),
            Err(TransitionError::Terminal(LifecycleState::Closed))
        );
        assert!(matches!(
            validate_transition(LifecycleState::Tp2Hit, LifecycleState::Tp1Hit),
            Err(TransitionError::NotAllowed(_, _))
        ));
    }

    #[test]
    fn test_implicit_open() {
        let machine = PositionLifecycleStateMachine::new();
        assert_eq!(machine.current_state("BTCUSDT", "p-1"), LifecycleState::Open);
        assert!(machine.get_state("BTCUSDT", "p-1").is_none());
        assert!(machine.is_empty());
    }

    #[test]
    fn test_forward_progress() {
        let mut machine = PositionLifecycleStateMachine::new();
        let result = machine
            .transition("BTCUSDT", "p-1", LifecycleState::Tp1Hit, ModeUpdate::none())
            .unwrap();
        assert!(result.allowed);
        assert_eq!(result.previous_state, LifecycleState::Open);
        assert_eq!(machine.current_state("BTCUSDT", "p-1"), LifecycleState::Tp1Hit);

        let skip = machine
            .transition("BTCUSDT", "p-1", LifecycleState::Tp3Hit, ModeUpdate::none())
            .unwrap();
        assert!(!skip.allowed);
        assert_eq!(skip.current_state, LifecycleState::Tp1Hit);
        assert!(skip.rejection.is_some());

        let same = machine
            .transition("BTCUSDT", "p-1", LifecycleState::Tp1Hit, ModeUpdate::none())
            .unwrap();
        assert!(!same.allowed);
    }

    #[test]
    fn test_modes_attach_with_transition() {
        let mut machine = PositionLifecycleStateMachine::new();
        let modes = ModeUpdate {
            pre_be_mode: Patch::Set(PreBreakevenMode::new(5)),
            ..ModeUpdate::default()
        };
        machine
            .transition("ETHUSDT", "p-2", LifecycleState::Tp1Hit, modes)
            .unwrap();
        let state = machine.get_state("ETHUSDT", "p-2").unwrap();
        assert_eq!(state.pre_be_mode.as_ref().unwrap().max_candles, 5);

        machine
            .transition(
                "ETHUSDT",
                "p-2",
                LifecycleState::Tp2Hit,
                ModeUpdate {
                    pre_be_mode: Patch::Clear,
                    ..ModeUpdate::default()
                },
            )
            .unwrap();
        assert!(machine.get_state("ETHUSDT", "p-2").unwrap().pre_be_mode.is_none());
    }

    #[test]
    fn test_update_modes_requires_record() {
        let mut machine = PositionLifecycleStateMachine::new();
        let modes = ModeUpdate {
            pre_be_mode: Patch::Set(PreBreakevenMode::new(5)),
            ..ModeUpdate::default()
        };
        assert!(matches!(
            machine.update_modes("SOLUSDT", "p-3", modes.clone()),
            Err(LifecycleError::UnknownPosition(_))
        ));

        machine
            .transition("SOLUSDT", "p-3", LifecycleState::Tp1Hit, ModeUpdate::none())
            .unwrap();
        machine.update_modes("SOLUSDT", "p-3", modes).unwrap();
        assert!(machine.get_state("SOLUSDT", "p-3").unwrap().pre_be_mode.is_some());
    }

    #[test]
    fn test_close_position_records_closure() {
        let mut machine = PositionLifecycleStateMachine::new();
        machine
            .transition("BTCUSDT", "p-1", LifecycleState::Tp1Hit, ModeUpdate::none())
            .unwrap();
        let result = machine
            .close_position("BTCUSDT", "p-1", ClosureReason::SlHit, 100.1, 0.1)
            .unwrap();
        assert!(result.allowed);
        assert_eq!(result.previous_state, LifecycleState::Tp1Hit);

        let state = machine.get_state("BTCUSDT", "p-1").unwrap();
        assert_eq!(state.current_state, LifecycleState::Closed);
        assert_eq!(state.closure_reason, Some(ClosureReason::SlHit));
        assert_eq!(state.closing_price, Some(100.1));
        assert_eq!(state.realized_pnl, Some(0.1));
        assert!(state.closed_at.is_some());

        let again = machine
            .close_position("BTCUSDT", "p-1", ClosureReason::Manual, 99.0, -1.0)
            .unwrap();
        assert!(!again.allowed);
        assert_eq!(
            machine.get_state("BTCUSDT", "p-1").unwrap().closure_reason,
            Some(ClosureReason::SlHit)
        );
    }

    #[test]
    fn test_close_from_implicit_open() {
        let mut machine = PositionLifecycleStateMachine::new();
        let result = machine
            .close_position("BTCUSDT", "p-9", ClosureReason::SlHit, 97.9, -2.1)
            .unwrap();
        assert!(result.allowed);
        assert_eq!(result.previous_state, LifecycleState::Open);
    }

    #[test]
    fn test_clear_state() {
        let mut machine = PositionLifecycleStateMachine::new();
        machine
            .close_position("BTCUSDT", "p-1", ClosureReason::Manual, 100.0, 0.0)
            .unwrap();
        assert!(machine.clear_state("BTCUSDT", "p-1").unwrap());
        assert!(!machine.clear_state("BTCUSDT", "p-1").unwrap());
        assert_eq!(machine.current_state("BTCUSDT", "p-1"), LifecycleState::Open);
    }

    #[test]
    fn test_clear_state_refuses_live_record() {
        let mut machine = PositionLifecycleStateMachine::new();
        machine
            .transition("BTCUSDT", "p-1", LifecycleState::Tp1Hit, ModeUpdate::none())
            .unwrap();
        machine
            .transition("BTCUSDT", "p-1", LifecycleState::Tp2Hit, ModeUpdate::none())
            .unwrap();

        let err = machine.clear_state("BTCUSDT", "p-1").unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::NotClosed(_, LifecycleState::Tp2Hit)
        ));
        assert_eq!(machine.current_state("BTCUSDT", "p-1"), LifecycleState::Tp2Hit);
    }

    #[test]
    fn test_get_position_state_by_symbol() {
        let mut machine = PositionLifecycleStateMachine::new();
        machine
            .transition("BTCUSDT", "p-1", LifecycleState::Tp1Hit, ModeUpdate::none())
            .unwrap();
        machine
            .transition("ETHUSDT", "p-2", LifecycleState::Tp1Hit, ModeUpdate::none())
            .unwrap();

        let state = machine.get_position_state("ETHUSDT").unwrap();
        assert_eq!(state.position_id, "p-2");
        assert!(machine.get_position_state("XRPUSDT").is_none());
    }

    #[test]
    fn test_restart_replays_log() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("lifecycle.jsonl");

        {
            let (mut machine, report) = PositionLifecycleStateMachine::open(&path).unwrap();
            assert_eq!(report.records_replayed, 0);
            assert!(machine.is_persistent());
            machine
                .transition("BTCUSDT", "p-1", LifecycleState::Tp1Hit, ModeUpdate::none())
                .unwrap();
            machine
                .transition("BTCUSDT", "p-1", LifecycleState::Tp2Hit, ModeUpdate::none())
                .unwrap();
            machine
                .close_position("ETHUSDT", "p-2", ClosureReason::SlHit, 97.0, -3.0)
                .unwrap();
            machine
                .transition("SOLUSDT", "p-3", LifecycleState::Tp1Hit, ModeUpdate::none())
                .unwrap();
            machine
                .close_position("SOLUSDT", "p-3", ClosureReason::Manual, 101.0, 1.0)
                .unwrap();
            machine.clear_state("SOLUSDT", "p-3").unwrap();
        }

        let (machine, report) = PositionLifecycleStateMachine::open(&path).unwrap();
        assert_eq!(report.records_replayed, 6);
        assert_eq!(report.live_positions, 2);
        assert_eq!(machine.current_state("BTCUSDT", "p-1"), LifecycleState::Tp2Hit);
        assert_eq!(machine.current_state("ETHUSDT", "p-2"), LifecycleState::Closed);
        assert!(machine.get_state("SOLUSDT", "p-3").is_none());
    }

    #[test]
    fn test_rejected_transition_is_not_logged() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("lifecycle.jsonl");

        {
            let (mut machine, _) = PositionLifecycleStateMachine::open(&path).unwrap();
            machine
                .close_position("BTCUSDT", "p-1", ClosureReason::Manual, 100.0, 0.0)
                .unwrap();
            machine
                .transition("BTCUSDT", "p-1", LifecycleState::Tp1Hit, ModeUpdate::none())
                .unwrap();
        }

        let (_, report) = PositionLifecycleStateMachine::open(&path).unwrap();
        assert_eq!(report.records_replayed, 1);
    }
}
