//! Schema check for decoded inbound frames.
//!
//! Rules run in order and the first failure wins:
//! the frame must be an object, `type` must be `ping` or
//! `security_test_request`, and a security test request must carry an
//! `agent_id` key. Extra fields are ignored and `agent_id` may hold any value.

use crate::message::InboundMessage;
use serde_json::Value;
use thiserror::Error;

pub const VALID_MESSAGE: &str = "Valid message";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Message must be a JSON object")]
    NotAnObject,
    #[error("Invalid or missing 'type' field")]
    InvalidType,
    #[error("Missing 'agent_id' in security_test_request")]
    MissingAgentId,
}

/// Classify a decoded frame into an [`InboundMessage`].
pub fn validate(raw: &Value) -> Result<InboundMessage, ValidationError> {
    let obj = raw.as_object().ok_or(ValidationError::NotAnObject)?;
    match obj.get("type").and_then(Value::as_str) {
        Some("ping") => Ok(InboundMessage::Ping),
        Some("security_test_request") => {
            let agent_id = obj.get("agent_id").ok_or(ValidationError::MissingAgentId)?;
            Ok(InboundMessage::SecurityTestRequest { agent_id: agent_id.clone() })
        }
        _ => Err(ValidationError::InvalidType),
    }
}

/// `(ok, reason)` view of [`validate`].
pub fn verdict(raw: &Value) -> (bool, String) {
    match validate(raw) {
        Ok(_) => (true, VALID_MESSAGE.to_string()),
        Err(e) => (false, e.to_string()),
    }
}
