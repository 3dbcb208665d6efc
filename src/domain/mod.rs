//! Domain Layer - Core types and rules for the ladder decision core
//!
//! Pure domain logic. The only I/O is the append-only lifecycle log in
//! `state_log`, which the state machine drives but never depends on for
//! validation.
//!
//! - `signal`: Analyzer signals, take-profit ladder rungs, trend context
//! - `position`: Executor-owned positions and stop-loss configuration
//! - `market`: Candle and indicator inputs for exit evaluation
//! - `circuit_breaker`: Daily P&L limits and loss-streak tracking
//! - `risk`: Admission control and position sizing
//! - `lifecycle`: TP-ladder state machine
//! - `state_log`: Write-ahead log and replay for the state machine

pub mod signal;
pub mod position;
pub mod market;
pub mod circuit_breaker;
pub mod risk;
pub mod lifecycle;
pub mod state_log;

pub use signal::{Direction, Signal, TakeProfit, TrendAnalysis, TrendBias};
pub use position::{Position, PositionError, Side, Status, StopLossConfig};
pub use market::{Candle, ExitIndicators};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerError};
pub use risk::{loss_streak_multiplier, RiskConfig, RiskDecision, RiskDetails, RiskError, RiskManager};
pub use lifecycle::{
    validate_transition, BandTrailingMode, ClosureReason, LifecycleError, LifecycleState, ModeUpdate,
    Patch, PositionKey, PositionLifecycleStateMachine, PositionStateMachineState, PreBreakevenMode,
    TrailingMode, TransitionError, TransitionResult,
};
pub use state_log::{replay, LogEvent, LogRecord, RecoveryReport, StateLog, StateLogError};
