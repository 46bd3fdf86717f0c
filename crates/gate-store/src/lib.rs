//! Persistence for the target: a capped event log plus two overwritable
//! records, kept as standalone JSON documents.

mod insert;
mod memory;
mod open;
mod query;

pub use memory::MemoryStore;
pub use open::JsonStore;
pub use query::StoreExt;

use gate_core::LogEntry;
use serde_json::Value;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKey {
    Settings,
    Logs,
    ScanMetadata,
}

impl RecordKey {
    pub const ALL: [RecordKey; 3] = [RecordKey::Settings, RecordKey::Logs, RecordKey::ScanMetadata];

    pub fn file_name(self) -> &'static str {
        match self {
            RecordKey::Settings => "settings.json",
            RecordKey::Logs => "logs.json",
            RecordKey::ScanMetadata => "last_scan_metadata.json",
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read {}", path.display())]
    Read { path: PathBuf, source: std::io::Error },
    #[error("failed to write {}", path.display())]
    Write { path: PathBuf, source: std::io::Error },
    #[error("failed to encode record")]
    Encode(#[from] serde_json::Error),
}

/// Key-value access shared by every connection task.
///
/// Implementations serialize their own read-modify-write cycles so that
/// concurrent [`Store::append_log`] calls never drop entries.
pub trait Store: Send + Sync {
    /// Missing or malformed records load as `None`.
    fn load(&self, key: RecordKey) -> Result<Option<Value>, StoreError>;
    fn save(&self, key: RecordKey, value: &Value) -> Result<(), StoreError>;
    /// Whether the record exists at all, readable or not.
    fn contains(&self, key: RecordKey) -> Result<bool, StoreError>;
    /// Append to the log, keeping only the newest [`gate_core::LOG_CAPACITY`] entries.
    fn append_log(&self, entry: &LogEntry) -> Result<(), StoreError>;
}

/// Oldest entries are dropped first.
pub(crate) fn cap_log(mut logs: Vec<Value>) -> Vec<Value> {
    let cap = gate_core::LOG_CAPACITY;
    if logs.len() > cap {
        logs.drain(..logs.len() - cap);
    }
    logs
}

pub(crate) fn log_array(v: Option<Value>) -> Vec<Value> {
    match v {
        Some(Value::Array(a)) => a,
        _ => Vec::new(),
    }
}
