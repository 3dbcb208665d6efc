//! CLI Command Handlers
//!
//! Operator commands around the decision core: validate a config file,
//! inspect or reset the persisted lifecycle log, and run one entry or exit
//! evaluation against JSON inputs.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::application::{EntryOrchestrator, ExitOrchestrator};
use crate::config::{load_config, Config};
use crate::domain::lifecycle::{PositionLifecycleStateMachine, PositionStateMachineState};
use crate::domain::market::ExitIndicators;
use crate::domain::position::Position;
use crate::domain::risk::RiskManager;
use crate::domain::signal::{Signal, TrendAnalysis};
use crate::domain::state_log::{replay, StateLog};

/// Ladder - signal consensus, risk admission and TP-ladder exits
#[derive(Parser, Debug)]
#[command(
    name = "ladder",
    version = env!("CARGO_PKG_VERSION"),
    author = env!("CARGO_PKG_AUTHORS"),
    about = "Decision core for a TP-ladder trading bot",
    long_about = "Ladder decides whether to open a position from a set of strategy signals \
                  and walks open positions through a three-step take-profit ladder with \
                  breakeven locking and trailing stops. Lifecycle state survives restarts \
                  through an append-only log."
)]
pub struct CliApp {
    /// The command to execute
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,
}

impl CliApp {
    /// Config file named on the command line, if the command takes one
    pub fn config_path(&self) -> Option<&Path> {
        match &self.command {
            Command::CheckConfig(cmd) => Some(cmd.config.as_path()),
            Command::State(StateCmd {
                action: StateAction::Inspect(cmd),
            }) => cmd.config.as_deref(),
            Command::State(StateCmd {
                action: StateAction::Reset(cmd),
            }) => cmd.config.as_deref(),
            Command::EvaluateEntry(cmd) => cmd.config.as_deref(),
            Command::EvaluateExit(cmd) => cmd.config.as_deref(),
        }
    }
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Validate a configuration file and print the effective values
    CheckConfig(CheckConfigCmd),

    /// Inspect or reset persisted lifecycle state
    State(StateCmd),

    /// Run one entry decision for a set of signals
    EvaluateEntry(EvaluateEntryCmd),

    /// Run one exit evaluation for an open position
    EvaluateExit(EvaluateExitCmd),
}

/// Validate configuration
#[derive(Parser, Debug)]
pub struct CheckConfigCmd {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", default_value = "config/ladder.toml")]
    pub config: PathBuf,
}

#[derive(Parser, Debug)]
pub struct StateCmd {
    #[command(subcommand)]
    pub action: StateAction,
}

#[derive(Subcommand, Debug)]
pub enum StateAction {
    /// Print every position recorded in the lifecycle log
    Inspect(InspectCmd),

    /// Drop the lifecycle record of one position
    Reset(ResetCmd),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Parser, Debug)]
pub struct InspectCmd {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Lifecycle log to read (overrides config and LADDER_STATE_LOG)
    #[arg(short, long, value_name = "FILE")]
    pub log: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Parser, Debug)]
pub struct ResetCmd {
    /// Trading symbol (e.g., BTCUSDT)
    #[arg(value_name = "SYMBOL")]
    pub symbol: String,

    /// Position identifier
    #[arg(value_name = "POSITION_ID")]
    pub position_id: String,

    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Lifecycle log to modify (overrides config and LADDER_STATE_LOG)
    #[arg(short, long, value_name = "FILE")]
    pub log: Option<PathBuf>,
}

#[derive(Parser, Debug)]
pub struct EvaluateEntryCmd {
    /// JSON array of strategy signals
    #[arg(short, long, value_name = "FILE")]
    pub signals: PathBuf,

    /// Account balance in quote currency
    #[arg(short, long, value_name = "AMOUNT")]
    pub balance: f64,

    /// JSON trend analysis (neutral when omitted)
    #[arg(short, long, value_name = "FILE")]
    pub trend: Option<PathBuf>,

    /// JSON array of currently open positions
    #[arg(long, value_name = "FILE")]
    pub positions: Option<PathBuf>,

    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

#[derive(Parser, Debug)]
pub struct EvaluateExitCmd {
    /// JSON position snapshot
    #[arg(short, long, value_name = "FILE")]
    pub position: PathBuf,

    /// Current market price
    #[arg(long, value_name = "PRICE")]
    pub price: f64,

    /// JSON exit indicators (ATR, volume, candles)
    #[arg(short, long, value_name = "FILE")]
    pub indicators: Option<PathBuf>,

    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Lifecycle log (overrides config and LADDER_STATE_LOG)
    #[arg(short, long, value_name = "FILE")]
    pub log: Option<PathBuf>,
}

/// Execute the parsed command
pub async fn execute(app: CliApp) -> Result<()> {
    match app.command {
        Command::CheckConfig(cmd) => check_config_command(cmd),
        Command::State(StateCmd { action }) => match action {
            StateAction::Inspect(cmd) => inspect_command(cmd),
            StateAction::Reset(cmd) => reset_command(cmd),
        },
        Command::EvaluateEntry(cmd) => evaluate_entry_command(cmd).await,
        Command::EvaluateExit(cmd) => evaluate_exit_command(cmd),
    }
}

fn check_config_command(cmd: CheckConfigCmd) -> Result<()> {
    let config = load_config(&cmd.config)
        .with_context(|| format!("Failed to load configuration from {}", cmd.config.display()))?;

    println!("✓ Configuration valid: {}", cmd.config.display());
    println!();
    println!("Entry:");
    println!("  Min confidence:        {:.1}", config.entry.min_confidence_threshold);
    println!("  Flat market confidence: {:.1}", config.entry.flat_market_confidence_threshold);
    println!("  Conflict threshold:    {:.2}", config.entry.signal_conflict_threshold);
    println!("Risk:");
    println!("  Risk per trade:        {:.2}%", config.risk.risk_per_trade_percent);
    println!("  Max positions:         {}", config.risk.max_positions);
    println!("  Max exposure:          {:.1}%", config.risk.max_total_exposure_percent);
    println!("Exit:");
    let [tp1, tp2, tp3] = config.exit.tp_close_percents;
    println!("  TP close split:        {}/{}/{}", tp1, tp2, tp3);
    println!("  Breakeven activation:  {:.2}%", config.exit.breakeven.activation_profit_percent);
    println!("  Trailing method:       {:?}", config.exit.trailing.method);
    println!("  Adaptive TP3:          {}", config.exit.adaptive_target.enabled);
    println!("State log:               {}", config.state.get_log_path().display());

    Ok(())
}

fn inspect_command(cmd: InspectCmd) -> Result<()> {
    let config = resolve_config(cmd.config.as_deref())?;
    let path = resolve_log_path(&config, cmd.log);

    let loaded = StateLog::load(&path)
        .with_context(|| format!("Failed to read lifecycle log {}", path.display()))?;
    let skipped = loaded.skipped_lines;
    let mut states: Vec<PositionStateMachineState> = replay(loaded.records).into_values().collect();
    states.sort_by(|a, b| a.key().cmp(&b.key()));

    match cmd.format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&states)?);
        }
        OutputFormat::Text => {
            println!("Lifecycle log: {}", path.display());
            if skipped > 0 {
                println!("  ({} unreadable line(s) skipped)", skipped);
            }
            if states.is_empty() {
                println!("  No positions recorded");
            }
            for state in &states {
                print_state(state);
            }
        }
    }

    Ok(())
}

fn print_state(state: &PositionStateMachineState) {
    println!();
    println!("  {} [{}]", state.key(), state.current_state);
    println!("    Since:     {}", state.state_changed_at.to_rfc3339());
    if let Some(be) = &state.pre_be_mode {
        match be.breakeven_price.filter(|_| be.breakeven_locked) {
            Some(price) => println!("    Breakeven: locked at {:.6}", price),
            None => println!(
                "    Breakeven: waiting ({}/{} candles)",
                be.candles_waited, be.max_candles
            ),
        }
    }
    if let Some(trailing) = &state.trailing_mode {
        println!(
            "    Trailing:  stop {:.6} (distance {:.6}, extreme {:.6})",
            trailing.stop_price, trailing.distance, trailing.extreme_price
        );
    }
    if let Some(band) = &state.bb_trailing_mode {
        println!(
            "    Band:      {:.6} / {:.6} / {:.6}",
            band.lower, band.middle, band.upper
        );
    }
    if let Some(reason) = state.closure_reason {
        println!(
            "    Closed:    {} at {} (pnl {})",
            reason,
            state.closing_price.map_or("-".to_string(), |p| format!("{:.6}", p)),
            state.realized_pnl.map_or("-".to_string(), |p| format!("{:.4}", p)),
        );
    }
}

fn reset_command(cmd: ResetCmd) -> Result<()> {
    let config = resolve_config(cmd.config.as_deref())?;
    let path = resolve_log_path(&config, cmd.log);

    let (mut machine, _) = PositionLifecycleStateMachine::open(&path)
        .with_context(|| format!("Failed to open lifecycle log {}", path.display()))?;

    if machine
        .clear_state(&cmd.symbol, &cmd.position_id)
        .context("Failed to reset lifecycle state")?
    {
        println!("✓ Cleared lifecycle state for {}:{}", cmd.symbol, cmd.position_id);
    } else {
        println!("No lifecycle state recorded for {}:{}", cmd.symbol, cmd.position_id);
    }

    Ok(())
}

async fn evaluate_entry_command(cmd: EvaluateEntryCmd) -> Result<()> {
    let config = resolve_config(cmd.config.as_deref())?;

    let signals: Vec<Signal> = read_json(&cmd.signals)?;
    let trend = match &cmd.trend {
        Some(path) => read_json::<TrendAnalysis>(path)?,
        None => TrendAnalysis::neutral(),
    };
    let open_positions: Vec<Position> = match &cmd.positions {
        Some(path) => read_json(path)?,
        None => Vec::new(),
    };

    let risk = Arc::new(RwLock::new(RiskManager::new(config.risk)));
    let orchestrator = EntryOrchestrator::new(risk, config.entry);
    let decision = orchestrator
        .evaluate_entry(&signals, cmd.balance, &open_positions, &trend)
        .await;

    println!("{}", serde_json::to_string_pretty(&decision)?);
    Ok(())
}

fn evaluate_exit_command(cmd: EvaluateExitCmd) -> Result<()> {
    let config = resolve_config(cmd.config.as_deref())?;
    let path = resolve_log_path(&config, cmd.log);

    let position: Position = read_json(&cmd.position)?;
    let indicators: Option<ExitIndicators> = match &cmd.indicators {
        Some(path) => Some(read_json(path)?),
        None => None,
    };

    let (machine, report) = PositionLifecycleStateMachine::open(&path)
        .with_context(|| format!("Failed to open lifecycle log {}", path.display()))?;
    tracing::info!(
        "Recovered {} lifecycle record(s) from {}",
        report.live_positions,
        path.display()
    );

    let mut orchestrator = ExitOrchestrator::new(config.exit, machine);
    let result = orchestrator.evaluate_exit(&position, cmd.price, indicators.as_ref());

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

/// Load the named config file, or fall back to built-in defaults
fn resolve_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => load_config(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display())),
        None => Ok(Config::default()),
    }
}

fn resolve_log_path(config: &Config, flag: Option<PathBuf>) -> PathBuf {
    flag.unwrap_or_else(|| config.state.get_log_path())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Invalid JSON in {}", path.display()))
}
