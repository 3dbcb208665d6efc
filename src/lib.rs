//! Ladder - decision core for a TP-ladder trading bot
//!
//! Turns strategy signals into entry decisions and walks open positions
//! through a three-step take-profit ladder. Lifecycle state is persisted in
//! an append-only log so a restart resumes every position where it left off.
//!
//! # Modules
//!
//! - `domain`: Core types and stores (Signal, Position, RiskManager, lifecycle state machine)
//! - `ports`: Trait abstractions (RiskGate)
//! - `strategy`: Consensus, breakeven, trailing and adaptive target policies
//! - `application`: Entry and exit orchestrators
//! - `config`: Configuration loading and validation
//! - `adapters`: CLI

pub mod domain;
pub mod ports;
pub mod strategy;
pub mod application;
pub mod config;
pub mod adapters;
