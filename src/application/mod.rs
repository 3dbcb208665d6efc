//! Application Layer - Entry and exit orchestration
//!
//! Wires the strategy policies and domain stores into the two operations
//! an executor calls: `evaluate_entry` once per decision cycle and
//! `evaluate_exit` on every price tick of an open position.

pub mod entry_orchestrator;
pub mod exit_orchestrator;

pub use entry_orchestrator::{EntryAction, EntryDecision, EntryOrchestrator};
pub use exit_orchestrator::{ExitAction, ExitError, ExitOrchestrator, ExitOrchestratorResult};
