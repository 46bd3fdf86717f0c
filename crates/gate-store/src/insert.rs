use crate::{cap_log, log_array, JsonStore, RecordKey, Store, StoreError};
use gate_core::LogEntry;
use serde_json::Value;

impl Store for JsonStore {
    fn load(&self, key: RecordKey) -> Result<Option<Value>, StoreError> {
        let _g = self.guard();
        self.read(key)
    }

    fn save(&self, key: RecordKey, value: &Value) -> Result<(), StoreError> {
        let _g = self.guard();
        self.write(key, value)
    }

    fn contains(&self, key: RecordKey) -> Result<bool, StoreError> {
        let path = self.path(key);
        path.try_exists().map_err(|source| StoreError::Read { path, source })
    }

    fn append_log(&self, entry: &LogEntry) -> Result<(), StoreError> {
        let entry = serde_json::to_value(entry)?;
        let _g = self.guard();
        let mut logs = log_array(self.read(RecordKey::Logs)?);
        logs.push(entry);
        self.write(RecordKey::Logs, &Value::Array(cap_log(logs)))
    }
}
