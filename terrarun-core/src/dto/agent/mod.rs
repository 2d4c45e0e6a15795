//! Agent DTOs
//!
//! Payloads for the registration, heartbeat and claim channels.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::agent::{Agent, AgentStatus};
use crate::dto::run::RunDescriptor;

/// Request to register an agent. The pool token travels as a bearer credential.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterAgent {
    /// Display name of the agent process
    pub name: String,
}

/// Result of a successful registration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisteredAgent {
    pub agent: Agent,

    /// Credential for all further calls made by this agent
    pub session_token: String,
}

/// Periodic status report from an agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Heartbeat {
    pub status: AgentStatus,

    /// Agent-side clock at send time. Informational; the server stamps
    /// `last_ping_at` with its own clock.
    pub timestamp: DateTime<Utc>,
}

/// Answer to a claim request. `None` means no eligible work right now.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClaimResponse {
    pub run: Option<RunDescriptor>,
}

/// Failure report for a run the agent could not finish
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailRun {
    pub message: String,
}
