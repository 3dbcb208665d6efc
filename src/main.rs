//! Ladder - TP-ladder trading decision core
//!
//! Operator CLI over the entry and exit orchestrators.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

use ladder::adapters::cli::{self, CliApp};
use ladder::config::load_config;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if it exists (LADDER_STATE_LOG, RUST_LOG)
    dotenvy::dotenv().ok();

    let app = CliApp::parse();
    init_logging(app.verbose, app.debug, configured_level(&app))?;

    cli::execute(app).await
}

/// Level from the `[logging]` section, if the command names a readable config.
/// Load errors are left for the command itself to report.
fn configured_level(app: &CliApp) -> Option<String> {
    let path = app.config_path()?;
    load_config(path).ok().map(|config| config.logging.level)
}

fn init_logging(verbose: bool, debug: bool, configured: Option<String>) -> Result<()> {
    let filter = if debug {
        EnvFilter::new("debug")
    } else if verbose {
        EnvFilter::new("info")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(configured.unwrap_or_else(|| "warn".to_string())))
    };

    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
    Ok(())
}
