//! CLI Adapter
//!
//! Command-line interface for the ladder decision core.
//! Uses clap derive macros for argument parsing.

mod commands;

pub use commands::{
    CheckConfigCmd, CliApp, Command, EvaluateEntryCmd, EvaluateExitCmd, InspectCmd, OutputFormat,
    ResetCmd, StateAction, StateCmd,
};

use anyhow::Result;

/// Execute the CLI command
pub async fn execute(app: CliApp) -> Result<()> {
    commands::execute(app).await
}
