use crate::open::bootstrap;
use crate::{cap_log, log_array, RecordKey, Store, StoreError};
use gate_core::{LogEntry, Settings};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;

/// In-process store with the same semantics as [`crate::JsonStore`].
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<RecordKey, Value>>,
}

impl MemoryStore {
    pub fn new(settings: &Settings) -> Result<Self, StoreError> {
        let store = MemoryStore::default();
        bootstrap(&store, settings)?;
        Ok(store)
    }

    fn records(&self) -> std::sync::MutexGuard<'_, HashMap<RecordKey, Value>> {
        self.records.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl Store for MemoryStore {
    fn load(&self, key: RecordKey) -> Result<Option<Value>, StoreError> {
        Ok(self.records().get(&key).cloned())
    }

    fn save(&self, key: RecordKey, value: &Value) -> Result<(), StoreError> {
        self.records().insert(key, value.clone());
        Ok(())
    }

    fn contains(&self, key: RecordKey) -> Result<bool, StoreError> {
        Ok(self.records().contains_key(&key))
    }

    fn append_log(&self, entry: &LogEntry) -> Result<(), StoreError> {
        let entry = serde_json::to_value(entry)?;
        let mut records = self.records();
        let mut logs = log_array(records.remove(&RecordKey::Logs));
        logs.push(entry);
        records.insert(RecordKey::Logs, Value::Array(cap_log(logs)));
        Ok(())
    }
}
