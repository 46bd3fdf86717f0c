use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Consent {
    Accepted,
    Denied,
}

/// Decides whether a security test requested by `agent_id` may proceed.
pub trait ConsentPolicy: Send + Sync {
    fn decide(&self, agent_id: &Value) -> Consent;
}

/// There is no consent prompt; every request is accepted.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysAccept;

impl ConsentPolicy for AlwaysAccept {
    fn decide(&self, _agent_id: &Value) -> Consent {
        Consent::Accepted
    }
}
