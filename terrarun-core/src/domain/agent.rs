//! Agent domain model
//!
//! Represents an external worker process that executes runs on behalf of the
//! control plane.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A registered agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    /// Unique identifier assigned at registration
    pub id: Uuid,

    /// Pool whose token was used to register this agent
    pub pool_id: Uuid,

    /// Display name supplied by the agent process
    pub name: String,

    /// Current status of the agent
    pub status: AgentStatus,

    /// When this agent registered
    pub created_at: DateTime<Utc>,

    /// Last time the agent was heard from. Never moves backwards.
    pub last_ping_at: DateTime<Utc>,
}

/// Status of an agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    /// Registered and waiting for work
    Idle,

    /// Holding a claimed or executing run
    Busy,

    /// Process shut down cleanly
    Exited,

    /// Process reported an unrecoverable failure
    Errored,

    /// Heartbeats lapsed beyond the staleness timeout
    Unknown,
}

impl AgentStatus {
    pub const ALL: [AgentStatus; 5] = [
        AgentStatus::Idle,
        AgentStatus::Busy,
        AgentStatus::Exited,
        AgentStatus::Errored,
        AgentStatus::Unknown,
    ];

    /// Storage and wire representation
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Idle => "idle",
            AgentStatus::Busy => "busy",
            AgentStatus::Exited => "exited",
            AgentStatus::Errored => "errored",
            AgentStatus::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.as_str() == s)
    }

    /// Only idle agents are handed new work
    pub fn can_claim(&self) -> bool {
        matches!(self, AgentStatus::Idle)
    }

    /// Statuses reported by a process that will not finish what it holds.
    /// Entries owned by an agent entering one of these are released.
    pub fn abandons_work(&self) -> bool {
        matches!(self, AgentStatus::Exited | AgentStatus::Errored)
    }

    /// Whether the staleness sweep may move an agent in this status to `Unknown`
    pub fn is_sweepable(&self) -> bool {
        !matches!(self, AgentStatus::Unknown | AgentStatus::Exited)
    }

    /// Status to record for a heartbeat.
    ///
    /// Busy and idle follow run ownership, which only claim and completion
    /// change; an agent cannot talk itself into being idle while it still
    /// holds an entry. Exited and errored are taken as reported.
    pub fn from_report(reported: AgentStatus, holds_work: bool) -> AgentStatus {
        match reported {
            AgentStatus::Idle | AgentStatus::Busy if holds_work => AgentStatus::Busy,
            AgentStatus::Idle | AgentStatus::Busy => AgentStatus::Idle,
            other => other,
        }
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
