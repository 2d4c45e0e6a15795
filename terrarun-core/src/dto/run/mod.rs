//! Run queue DTOs

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::run::{RunOperation, RunQueueEntry, RunState};
use crate::domain::scope::Workspace;

/// Request to queue a run for agent execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnqueueRun {
    pub run_id: Uuid,
    pub workspace_id: Uuid,
    pub operation: RunOperation,
}

/// Everything an agent needs to execute a claimed entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunDescriptor {
    pub entry_id: Uuid,
    pub run_id: Uuid,
    pub workspace_id: Uuid,
    pub workspace_name: String,
    pub organisation: String,
    pub operation: RunOperation,
    pub attempt: i32,
}

impl RunDescriptor {
    pub fn new(entry: &RunQueueEntry, workspace: &Workspace) -> Self {
        Self {
            entry_id: entry.id,
            run_id: entry.run_id,
            workspace_id: workspace.id,
            workspace_name: workspace.name.clone(),
            organisation: workspace.organisation.clone(),
            operation: entry.operation,
            attempt: entry.attempt,
        }
    }
}

/// Filters for listing run-queue entries
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<RunState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<Uuid>,
}
