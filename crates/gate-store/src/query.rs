use crate::{log_array, RecordKey, Store, StoreError};
use gate_core::{LogEntry, ScanMetadata, Settings};
use serde::de::DeserializeOwned;
use tracing::warn;

/// Typed views over a [`Store`]. Reads fall back to defaults on missing or
/// malformed data; unrelated I/O faults are logged and also read as defaults.
pub trait StoreExt: Store {
    fn logs(&self) -> Vec<LogEntry> {
        log_array(load_or_warn(self, RecordKey::Logs))
            .into_iter()
            .filter_map(|v| serde_json::from_value(v).ok())
            .collect()
    }

    fn scan_metadata(&self) -> ScanMetadata {
        typed(self, RecordKey::ScanMetadata).unwrap_or_default()
    }

    fn settings(&self) -> Option<Settings> {
        typed(self, RecordKey::Settings)
    }

    fn save_scan_metadata(&self, meta: &ScanMetadata) -> Result<(), StoreError> {
        self.save(RecordKey::ScanMetadata, &serde_json::to_value(meta)?)
    }
}

impl<S: Store + ?Sized> StoreExt for S {}

fn load_or_warn<S: Store + ?Sized>(store: &S, key: RecordKey) -> Option<serde_json::Value> {
    match store.load(key) {
        Ok(v) => v,
        Err(e) => {
            warn!(record = key.file_name(), error = %e, "record unreadable");
            None
        }
    }
}

fn typed<T: DeserializeOwned, S: Store + ?Sized>(store: &S, key: RecordKey) -> Option<T> {
    load_or_warn(store, key).and_then(|v| serde_json::from_value(v).ok())
}
