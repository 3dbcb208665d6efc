//! Lifecycle State Log
//!
//! Append-only JSON-lines log of lifecycle changes. Every line carries the
//! full state snapshot for one position, so startup recovery is a pure fold
//! over the records in order. History is never rewritten.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::lifecycle::{LifecycleState, PositionKey, PositionStateMachineState};

/// Default log file name inside the data directory
pub const DEFAULT_STATE_LOG_FILE: &str = "lifecycle.jsonl";

#[derive(Error, Debug, Clone)]
pub enum StateLogError {
    #[error("Failed to serialize log record: {0}")]
    SerializationError(String),

    #[error("Failed to write state log: {0}")]
    WriteError(String),

    #[error("Failed to read state log: {0}")]
    ReadError(String),

    #[error("Failed to create directory: {0}")]
    DirectoryError(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogEvent {
    Transition {
        from: LifecycleState,
        to: LifecycleState,
        state: PositionStateMachineState,
    },
    ModeUpdate {
        state: PositionStateMachineState,
    },
    Cleared {
        key: PositionKey,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRecord {
    pub seq: u64,
    pub recorded_at: DateTime<Utc>,
    pub event: LogEvent,
}

/// Records read back from disk
#[derive(Debug, Clone, Default)]
pub struct LoadedLog {
    pub records: Vec<LogRecord>,
    /// Lines that could not be decoded (e.g. a torn final write)
    pub skipped_lines: usize,
}

/// Summary of a startup replay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryReport {
    pub records_replayed: usize,
    pub skipped_lines: usize,
    pub live_positions: usize,
}

#[derive(Debug)]
pub struct StateLog {
    path: PathBuf,
    next_seq: u64,
    /// The file ends in a partial line
    torn_tail: bool,
}

impl StateLog {
    /// Open the log at `path`, creating it and its directory if needed,
    /// and return everything already recorded.
    pub fn open(path: &Path) -> Result<(Self, LoadedLog), StateLogError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .map_err(|e| StateLogError::DirectoryError(e.to_string()))?;
            }
        }

        let loaded = Self::load(path)?;
        let next_seq = loaded.records.last().map_or(1, |r| r.seq + 1);
        let torn_tail = ends_mid_line(path)?;

        Ok((
            Self {
                path: path.to_path_buf(),
                next_seq,
                torn_tail,
            },
            loaded,
        ))
    }

    /// Read all decodable records. A missing file is an empty log.
    pub fn load(path: &Path) -> Result<LoadedLog, StateLogError> {
        if !path.exists() {
            return Ok(LoadedLog::default());
        }

        let file = File::open(path).map_err(|e| StateLogError::ReadError(e.to_string()))?;
        let mut loaded = LoadedLog::default();

        for (idx, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| StateLogError::ReadError(e.to_string()))?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<LogRecord>(&line) {
                Ok(record) => loaded.records.push(record),
                Err(e) => {
                    tracing::warn!(
                        "Skipping undecodable state log line {} in {}: {}",
                        idx + 1,
                        path.display(),
                        e
                    );
                    loaded.skipped_lines += 1;
                }
            }
        }

        Ok(loaded)
    }

    /// Append one event and sync it to disk before returning
    pub fn append(&mut self, event: LogEvent) -> Result<LogRecord, StateLogError> {
        let record = LogRecord {
            seq: self.next_seq,
            recorded_at: Utc::now(),
            event,
        };
        let mut line = String::new();
        // Terminate a partial line left by a crash so the record stays decodable
        if self.torn_tail {
            line.push('\n');
        }
        line.push_str(
            &serde_json::to_string(&record)
                .map_err(|e| StateLogError::SerializationError(e.to_string()))?,
        );
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| StateLogError::WriteError(e.to_string()))?;
        file.write_all(line.as_bytes())
            .map_err(|e| StateLogError::WriteError(e.to_string()))?;
        file.sync_data()
            .map_err(|e| StateLogError::WriteError(e.to_string()))?;

        self.next_seq += 1;
        self.torn_tail = false;
        Ok(record)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Default log path for a data directory
    pub fn default_path(data_dir: &Path) -> PathBuf {
        data_dir.join(DEFAULT_STATE_LOG_FILE)
    }
}

fn ends_mid_line(path: &Path) -> Result<bool, StateLogError> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(StateLogError::ReadError(e.to_string())),
    };
    let len = file
        .metadata()
        .map_err(|e| StateLogError::ReadError(e.to_string()))?
        .len();
    if len == 0 {
        return Ok(false);
    }
    let mut last = [0u8; 1];
    file.seek(SeekFrom::End(-1))
        .and_then(|_| file.read_exact(&mut last))
        .map_err(|e| StateLogError::ReadError(e.to_string()))?;
    Ok(last[0] != b'\n')
}

/// Rebuild the keyed state map from records in log order.
///
/// A snapshot that would move a live position backwards is ignored, so a
/// duplicated or reordered record cannot revert state.
pub fn replay(
    records: impl IntoIterator<Item = LogRecord>,
) -> HashMap<PositionKey, PositionStateMachineState> {
    let mut states: HashMap<PositionKey, PositionStateMachineState> = HashMap::new();

    for record in records {
        match record.event {
            LogEvent::Transition { state, .. } | LogEvent::ModeUpdate { state } => {
                let key = state.key();
                if let Some(existing) = states.get(&key) {
                    if state.current_state.rank() < existing.current_state.rank() {
                        tracing::warn!(
                            position = %key,
                            "Ignoring record #{} that would revert {} to {}",
                            record.seq,
                            existing.current_state,
                            state.current_state
                        );
                        continue;
                    }
                }
                states.insert(key, state);
            }
            LogEvent::Cleared { key } => {
                states.remove(&key);
            }
        }
    }

    states
}
