//! Agent pool DTOs

use serde::{Deserialize, Serialize};

use crate::domain::pool::AgentToken;

/// Request to create an agent pool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAgentPool {
    pub organisation: String,
    pub name: String,
    #[serde(default)]
    pub allow_all_workspaces: bool,
}

/// Update command for an agent pool. Only the fields listed here are mutable;
/// `None` leaves the current value in place.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateAgentPool {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_all_workspaces: Option<bool>,
}

impl UpdateAgentPool {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.allow_all_workspaces.is_none()
    }
}

/// Request to mint a registration token for a pool
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateAgentToken {
    #[serde(default)]
    pub description: String,
}

/// A freshly minted token. `secret` is shown once and never stored in clear.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatedAgentToken {
    pub token: AgentToken,
    pub secret: String,
}
