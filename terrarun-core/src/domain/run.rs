//! Run queue domain types
//!
//! A run-queue entry is a pending plan or apply awaiting execution by an
//! agent. Ownership is exclusive: once claimed, only the claiming agent may
//! move the entry forward until it finishes or is released.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A queued unit of work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunQueueEntry {
    pub id: Uuid,

    /// Run in the execution engine this entry dispatches
    pub run_id: Uuid,
    pub workspace_id: Uuid,
    pub operation: RunOperation,
    pub state: RunState,

    /// Owning agent while claimed or executing; the finishing agent once
    /// terminal; cleared on release.
    pub agent_id: Option<Uuid>,

    /// Number of times the entry has been claimed
    pub attempt: i32,

    pub queued_at: DateTime<Utc>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub failure_message: Option<String>,
}

/// Terraform operation an entry performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunOperation {
    Plan,
    Apply,
}

impl RunOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunOperation::Plan => "plan",
            RunOperation::Apply => "apply",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "plan" => Some(RunOperation::Plan),
            "apply" => Some(RunOperation::Apply),
            _ => None,
        }
    }
}

impl std::fmt::Display for RunOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Dispatch state of an entry
///
/// `unclaimed -> claimed -> executing -> {completed, failed}`. Releasing a
/// held entry returns it to `unclaimed` with the owner cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Unclaimed,
    Claimed,
    Executing,
    Completed,
    Failed,
}

impl RunState {
    pub const ALL: [RunState; 5] = [
        RunState::Unclaimed,
        RunState::Claimed,
        RunState::Executing,
        RunState::Completed,
        RunState::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Unclaimed => "unclaimed",
            RunState::Claimed => "claimed",
            RunState::Executing => "executing",
            RunState::Completed => "completed",
            RunState::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|state| state.as_str() == s)
    }

    /// States in which an agent owns the entry
    pub fn is_held(&self) -> bool {
        matches!(self, RunState::Claimed | RunState::Executing)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Completed | RunState::Failed)
    }

    pub fn can_transition_to(&self, next: RunState) -> bool {
        use RunState::*;
        matches!(
            (self, next),
            (Unclaimed, Claimed)
                | (Claimed, Executing)
                | (Claimed, Completed)
                | (Claimed, Failed)
                | (Executing, Completed)
                | (Executing, Failed)
                | (Claimed, Unclaimed)
                | (Executing, Unclaimed)
        )
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl RunQueueEntry {
    /// A fresh, unclaimed entry
    pub fn queued(run_id: Uuid, workspace_id: Uuid, operation: RunOperation) -> Self {
        Self {
            id: Uuid::new_v4(),
            run_id,
            workspace_id,
            operation,
            state: RunState::Unclaimed,
            agent_id: None,
            attempt: 0,
            queued_at: Utc::now(),
            claimed_at: None,
            started_at: None,
            finished_at: None,
            failure_message: None,
        }
    }

    pub fn is_held_by(&self, agent_id: Uuid) -> bool {
        self.state.is_held() && self.agent_id == Some(agent_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_transitions() {
        assert!(RunState::Unclaimed.can_transition_to(RunState::Claimed));
        assert!(RunState::Claimed.can_transition_to(RunState::Executing));
        assert!(RunState::Executing.can_transition_to(RunState::Completed));
        assert!(RunState::Executing.can_transition_to(RunState::Failed));
    }

    #[test]
    fn test_release_only_from_held_states() {
        assert!(RunState::Claimed.can_transition_to(RunState::Unclaimed));
        assert!(RunState::Executing.can_transition_to(RunState::Unclaimed));
        assert!(!RunState::Completed.can_transition_to(RunState::Unclaimed));
        assert!(!RunState::Failed.can_transition_to(RunState::Unclaimed));
    }

    #[test]
    fn test_no_skipping_the_claim() {
        assert!(!RunState::Unclaimed.can_transition_to(RunState::Executing));
        assert!(!RunState::Unclaimed.can_transition_to(RunState::Completed));
        assert!(!RunState::Completed.can_transition_to(RunState::Failed));
    }

    #[test]
    fn test_queued_entry_is_unowned() {
        let entry = RunQueueEntry::queued(Uuid::new_v4(), Uuid::new_v4(), RunOperation::Plan);
        assert_eq!(entry.state, RunState::Unclaimed);
        assert_eq!(entry.agent_id, None);
        assert_eq!(entry.attempt, 0);
        assert!(!entry.is_held_by(Uuid::new_v4()));
    }

    #[test]
    fn test_state_parse() {
        for state in RunState::ALL {
            assert_eq!(RunState::parse(state.as_str()), Some(state));
        }
        assert_eq!(RunOperation::parse("destroy"), None);
    }
}
