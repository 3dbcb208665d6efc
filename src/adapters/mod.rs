//! Adapters Layer - External System Implementations
//!
//! - CLI: Command-line interface handlers

pub mod cli;

pub use cli::CliApp;
