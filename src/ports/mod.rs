//! Ports Layer - Trait definitions for external dependencies
//!
//! Following hexagonal architecture, the orchestrators depend on these
//! traits rather than on concrete services:
//! - Risk admission (`RiskGate`), possibly backed by remote balance checks

pub mod risk;

pub use risk::RiskGate;
#[cfg(test)]
pub use risk::MockRiskGate;
