//! Scope entities
//!
//! Workspaces, projects and environments are owned by the organisation
//! registry. The control plane keeps a synced copy so it can decide which
//! agent pools may execute a workspace's runs.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A workspace that runs are queued against
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workspace {
    pub id: Uuid,
    pub organisation: String,
    pub name: String,
    pub project_id: Option<Uuid>,
    pub environment_id: Option<Uuid>,
}

/// A project grouping workspaces
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: Uuid,
    pub organisation: String,
    pub name: String,
}

/// A lifecycle environment grouping workspaces
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Environment {
    pub id: Uuid,
    pub organisation: String,
    pub name: String,
}
