//! Typed error records and agent bootstrap data

use crate::error::CloudError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Error entry attached to an image or instance record. Connectors report
/// per-entity failures through lists of these instead of raising, so one
/// broken entity never aborts a fetch cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypedError {
    pub kind: String,
    pub message: String,
}

impl TypedError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }

    pub fn from_error(error: &CloudError) -> Self {
        Self::new(error.kind(), error.to_string())
    }
}

impl std::fmt::Display for TypedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

/// Bootstrap data handed to a freshly created agent VM. The connector
/// serializes it to JSON and passes it base64-encoded through the provider's
/// custom-data channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentUserData {
    pub agent_name: String,
    pub server_address: String,
    pub profile_id: String,
    #[serde(default)]
    pub custom_properties: HashMap<String, String>,
}

impl AgentUserData {
    pub fn new(
        agent_name: impl Into<String>,
        server_address: impl Into<String>,
        profile_id: impl Into<String>,
    ) -> Self {
        Self {
            agent_name: agent_name.into(),
            server_address: server_address.into(),
            profile_id: profile_id.into(),
            custom_properties: HashMap::new(),
        }
    }

    pub fn serialize(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
