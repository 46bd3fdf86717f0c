//! Documents persisted by the target.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Number of log entries the store keeps.
pub const LOG_CAPACITY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    ConnectionReceived,
    InvalidMessage,
    ConsentResponse,
    ConnectionClosed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub event: EventKind,
    #[serde(default)]
    pub details: Map<String, Value>,
}

impl LogEntry {
    pub fn new(event: EventKind) -> Self {
        LogEntry { event, details: Map::new() }
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanMetadata {
    pub last_scan_time: Option<String>,
    pub agent_source: Option<Value>,
}

/// Written once when absent and left alone afterwards, even when a restart
/// generates a different target id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub target_id: String,
    pub port: u16,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn log_entry_wire_shape() {
        let e = LogEntry::new(EventKind::InvalidMessage).with("reason", "Invalid or missing 'type' field");
        assert_eq!(
            serde_json::to_value(&e).unwrap(),
            json!({"event": "INVALID_MESSAGE", "details": {"reason": "Invalid or missing 'type' field"}})
        );
        let closed = serde_json::to_value(LogEntry::new(EventKind::ConnectionClosed)).unwrap();
        assert_eq!(closed, json!({"event": "CONNECTION_CLOSED", "details": {}}));
    }

    #[test]
    fn empty_metadata_is_null_fields() {
        assert_eq!(
            serde_json::to_value(ScanMetadata::default()).unwrap(),
            json!({"last_scan_time": null, "agent_source": null})
        );
    }
}
