use crate::query::StoreExt;
use crate::{RecordKey, Store, StoreError};
use gate_core::{ScanMetadata, Settings};
use serde_json::Value;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{info, warn};

/// File-backed store: one pretty-printed JSON document per record.
pub struct JsonStore {
    dir: PathBuf,
    lock: Mutex<()>,
}

impl JsonStore {
    /// Open `dir` and create any record that does not exist yet.
    pub fn open_or_create(dir: impl AsRef<Path>, settings: &Settings) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|source| StoreError::Write { path: dir.clone(), source })?;
        let store = JsonStore { dir, lock: Mutex::new(()) };
        bootstrap(&store, settings)?;
        Ok(store)
    }

    pub fn path(&self, key: RecordKey) -> PathBuf {
        self.dir.join(key.file_name())
    }

    pub(crate) fn guard(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub(crate) fn read(&self, key: RecordKey) -> Result<Option<Value>, StoreError> {
        let path = self.path(key);
        // Bytes, not a string: invalid UTF-8 is malformed content, not an IO fault.
        let bytes = match fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(StoreError::Read { path, source }),
        };
        match serde_json::from_slice(&bytes) {
            Ok(v) => Ok(Some(v)),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "malformed record, using default");
                Ok(None)
            }
        }
    }

    pub(crate) fn write(&self, key: RecordKey, value: &Value) -> Result<(), StoreError> {
        let path = self.path(key);
        let text = serde_json::to_string_pretty(value)?;
        fs::write(&path, text).map_err(|source| StoreError::Write { path, source })
    }
}

/// Seed the three records when absent. Existing records, settings included,
/// are never rewritten.
pub(crate) fn bootstrap<S: Store + ?Sized>(store: &S, settings: &Settings) -> Result<(), StoreError> {
    if !store.contains(RecordKey::Settings)? {
        info!(target_id = %settings.target_id, port = settings.port, "writing initial settings");
        store.save(RecordKey::Settings, &serde_json::to_value(settings)?)?;
    }
    if !store.contains(RecordKey::Logs)? {
        store.save(RecordKey::Logs, &Value::Array(Vec::new()))?;
    }
    if !store.contains(RecordKey::ScanMetadata)? {
        store.save_scan_metadata(&ScanMetadata::default())?;
    }
    Ok(())
}
