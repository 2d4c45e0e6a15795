//! Scope sync DTOs
//!
//! The organisation registry pushes workspaces, projects and environments to
//! the control plane with these payloads; the id travels in the URL.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncWorkspace {
    pub organisation: String,
    pub name: String,
    #[serde(default)]
    pub project_id: Option<Uuid>,
    #[serde(default)]
    pub environment_id: Option<Uuid>,
}

/// Shared payload for projects and environments
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncScopeEntity {
    pub organisation: String,
    pub name: String,
}
