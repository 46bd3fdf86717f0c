use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

const PREFIX: &str = "TARGET-";

/// Identity announced by a target device. Generated once at process start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceIdentity(String);

impl DeviceIdentity {
    /// Fresh identity: `TARGET-` followed by 8 random hex chars.
    pub fn generate() -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        DeviceIdentity(format!("{}{}", PREFIX, &suffix[..8]))
    }

    pub fn id(&self) -> &str {
        &self.0
    }
}

impl From<&str> for DeviceIdentity {
    fn from(s: &str) -> Self {
        DeviceIdentity(s.to_string())
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
