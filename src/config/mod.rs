//! Configuration Module
//!
//! Loads and validates configuration from TOML files.

pub mod loader;

pub use loader::{
    Config, LoaderError, LoggingSection, StateSection, load_config, parse_config, STATE_LOG_ENV,
};
