//! Configuration Loader
//!
//! Loads and validates configuration from TOML files. Every section and key
//! has a default, so an empty file yields the production profile.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::domain::risk::RiskConfig;
use crate::strategy::params::{self, ExitConfig, OrchestrationConfig};

/// Environment variable overriding `[state] log_path`
pub const STATE_LOG_ENV: &str = "LADDER_STATE_LOG";

/// Main configuration structure matching config.toml
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub entry: OrchestrationConfig,
    pub risk: RiskConfig,
    pub exit: ExitConfig,
    pub state: StateSection,
    pub logging: LoggingSection,
}

/// Lifecycle persistence section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateSection {
    /// Append-only lifecycle log (JSON lines)
    pub log_path: String,
}

impl Default for StateSection {
    fn default() -> Self {
        Self {
            log_path: "data/lifecycle.jsonl".to_string(),
        }
    }
}

impl StateSection {
    /// Get log path with environment variable override
    /// Checks LADDER_STATE_LOG env var first, falls back to config value
    pub fn get_log_path(&self) -> PathBuf {
        self.resolve_log_path(std::env::var(STATE_LOG_ENV).ok())
    }

    /// Resolve the log path from an optional override, expanding `~`
    pub fn resolve_log_path(&self, override_path: Option<String>) -> PathBuf {
        let raw = override_path
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| self.log_path.clone());
        PathBuf::from(shellexpand::tilde(&raw).into_owned())
    }
}

/// Logging configuration section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Log level: "trace", "debug", "info", "warn", "error"
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
        }
    }
}

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Configuration errors
#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Invalid parameters: {0}")]
    InvalidParameters(#[from] params::ConfigError),
    #[error("Validation failed: {0}")]
    ValidationError(String),
}

/// Load configuration from a TOML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, LoaderError> {
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}

/// Parse and validate configuration from TOML text
pub fn parse_config(content: &str) -> Result<Config, LoaderError> {
    let config: Config = toml::from_str(content)?;
    config.validate()?;
    Ok(config)
}

impl Config {
    /// Validate all configuration parameters
    pub fn validate(&self) -> Result<(), LoaderError> {
        self.entry.validate()?;
        self.risk.validate()?;
        self.exit.validate()?;

        if self.state.log_path.trim().is_empty() {
            return Err(LoaderError::ValidationError(
                "state.log_path cannot be empty".to_string(),
            ));
        }

        let level = self.logging.level.to_lowercase();
        if !LOG_LEVELS.contains(&level.as_str()) {
            return Err(LoaderError::ValidationError(format!(
                "logging.level must be one of {:?}, got '{}'",
                LOG_LEVELS, self.logging.level
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::params::TrailingMethod;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_valid_config() -> String {
        r#"
[entry]
min_confidence_threshold = 65.0
flat_market_confidence_threshold = 75.0
signal_conflict_threshold = 0.35
min_primary_candles = 100

[risk]
risk_per_trade_percent = 5.0
max_positions = 2
max_total_exposure_percent = 40.0
stop_after_consecutive_losses = 4

[exit]
tp_close_percents = [40.0, 40.0, 20.0]

[exit.breakeven]
activation_profit_percent = 0.5
max_wait_candles = 3

[exit.trailing]
method = "band"
min_distance_percent = 1.0
max_distance_percent = 2.5

[exit.adaptive_target]
enabled = true
base_percent = 2.5

[state]
log_path = "/var/lib/ladder/lifecycle.jsonl"

[logging]
level = "info"
"#
        .to_string()
    }

    fn write_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_valid_config() {
        let file = write_config(&create_valid_config());
        let config = load_config(file.path()).unwrap();

        assert_eq!(config.entry.min_confidence_threshold, 65.0);
        assert_eq!(config.entry.min_primary_candles, 100);
        assert_eq!(config.entry.min_context_candles, 20);
        assert_eq!(config.risk.max_positions, 2);
        assert_eq!(config.risk.stop_after_consecutive_losses, Some(4));
        assert_eq!(config.risk.min_position_size_usdt, 5.0);
        assert_eq!(config.exit.tp_close_percents, [40.0, 40.0, 20.0]);
        assert_eq!(config.exit.breakeven.max_wait_candles, 3);
        assert_eq!(config.exit.breakeven.profit_margin_percent, 0.1);
        assert_eq!(config.exit.trailing.method, TrailingMethod::Band);
        assert!(config.exit.adaptive_target.enabled);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.entry.min_confidence_threshold, 60.0);
        assert_eq!(config.exit.tp_close_percents, [50.0, 30.0, 20.0]);
        assert_eq!(config.logging.level, "warn");
    }

    #[test]
    fn test_shipped_config_matches_defaults() {
        let config = parse_config(include_str!("../../config/ladder.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_missing_file() {
        let result = load_config("/nonexistent/path/config.toml");
        assert!(matches!(result.unwrap_err(), LoaderError::IoError(_)));
    }

    #[test]
    fn test_parse_error() {
        let result = parse_config("[entry\nmin_confidence_threshold = ");
        assert!(matches!(result.unwrap_err(), LoaderError::ParseError(_)));
    }

    #[test]
    fn test_invalid_close_split() {
        let result = parse_config("[exit]\ntp_close_percents = [50.0, 30.0, 30.0]\n");
        assert!(matches!(result.unwrap_err(), LoaderError::InvalidParameters(_)));
    }

    #[test]
    fn test_invalid_confidence() {
        let result = parse_config("[entry]\nmin_confidence_threshold = 140.0\n");
        assert!(matches!(result.unwrap_err(), LoaderError::InvalidParameters(_)));
    }

    #[test]
    fn test_invalid_log_level() {
        let result = parse_config("[logging]\nlevel = \"loud\"\n");
        assert!(matches!(result.unwrap_err(), LoaderError::ValidationError(_)));
    }

    #[test]
    fn test_empty_log_path() {
        let result = parse_config("[state]\nlog_path = \"\"\n");
        assert!(matches!(result.unwrap_err(), LoaderError::ValidationError(_)));
    }

    #[test]
    fn test_log_path_override() {
        let state = StateSection {
            log_path: "data/lifecycle.jsonl".to_string(),
        };
        assert_eq!(state.resolve_log_path(None), PathBuf::from("data/lifecycle.jsonl"));
        assert_eq!(
            state.resolve_log_path(Some("/tmp/other.jsonl".to_string())),
            PathBuf::from("/tmp/other.jsonl")
        );
        assert_eq!(
            state.resolve_log_path(Some("  ".to_string())),
            PathBuf::from("data/lifecycle.jsonl")
        );
    }

    #[test]
    fn test_log_path_tilde_expansion() {
        let state = StateSection {
            log_path: "~/ladder/lifecycle.jsonl".to_string(),
        };
        let resolved = state.resolve_log_path(None);
        assert!(resolved.ends_with("ladder/lifecycle.jsonl"));
    }
}
