//! Wire messages exchanged between agent and target.

use crate::consent::Consent;
use crate::validate::{validate, ValidationError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// A frame that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    Ping,
    SecurityTestRequest { agent_id: Value },
}

impl InboundMessage {
    /// JSON form an agent puts on the wire.
    pub fn to_value(&self) -> Value {
        match self {
            InboundMessage::Ping => serde_json::json!({ "type": "ping" }),
            InboundMessage::SecurityTestRequest { agent_id } => serde_json::json!({
                "type": "security_test_request",
                "agent_id": agent_id,
            }),
        }
    }
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Invalid JSON")]
    Decode(#[source] serde_json::Error),
    #[error(transparent)]
    Invalid(#[from] ValidationError),
}

/// Parse raw frame bytes and classify them.
pub fn decode(bytes: &[u8]) -> Result<InboundMessage, ProtocolError> {
    let raw: Value = serde_json::from_slice(bytes).map_err(ProtocolError::Decode)?;
    Ok(validate(&raw)?)
}

/// Replies that carry a `type` tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Reply {
    TargetRegister {
        target_id: String,
    },
    Pong {
        target_id: String,
    },
    ConsentResponse {
        target_id: String,
        agent_id: Value,
        consent: Consent,
    },
}

/// Anything the target sends. Errors have no `type` field on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OutboundMessage {
    Reply(Reply),
    Error { error: String },
}

impl OutboundMessage {
    pub fn error(reason: impl Into<String>) -> Self {
        OutboundMessage::Error { error: reason.into() }
    }

    pub fn to_json(&self) -> String {
        // Plain strings and enums only; serialization cannot fail.
        serde_json::to_string(self).unwrap_or_else(|_| String::from("{}"))
    }
}

impl From<Reply> for OutboundMessage {
    fn from(r: Reply) -> Self {
        OutboundMessage::Reply(r)
    }
}

impl From<&ProtocolError> for OutboundMessage {
    fn from(e: &ProtocolError) -> Self {
        OutboundMessage::error(e.to_string())
    }
}
