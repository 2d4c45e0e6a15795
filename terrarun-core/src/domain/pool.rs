//! Agent pool domain types
//!
//! A pool groups agents and decides which workspaces may dispatch runs to
//! them, either organisation-wide (`allow_all_workspaces`) or through explicit
//! workspace/project/environment associations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::scope::Workspace;

/// A named group of agents within an organisation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentPool {
    pub id: Uuid,
    pub organisation: String,
    pub name: String,
    pub allow_all_workspaces: bool,
    pub created_at: DateTime<Utc>,
}

/// An explicit association between a pool and a scope entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum PoolScope {
    Workspace(Uuid),
    Project(Uuid),
    Environment(Uuid),
}

impl PoolScope {
    pub fn kind(&self) -> &'static str {
        match self {
            PoolScope::Workspace(_) => "workspace",
            PoolScope::Project(_) => "project",
            PoolScope::Environment(_) => "environment",
        }
    }

    pub fn target_id(&self) -> Uuid {
        match self {
            PoolScope::Workspace(id) | PoolScope::Project(id) | PoolScope::Environment(id) => *id,
        }
    }

    pub fn from_parts(kind: &str, id: Uuid) -> Option<Self> {
        match kind {
            "workspace" => Some(PoolScope::Workspace(id)),
            "project" => Some(PoolScope::Project(id)),
            "environment" => Some(PoolScope::Environment(id)),
            _ => None,
        }
    }

    /// Whether this association covers the given workspace
    pub fn matches(&self, workspace: &Workspace) -> bool {
        match self {
            PoolScope::Workspace(id) => *id == workspace.id,
            PoolScope::Project(id) => workspace.project_id == Some(*id),
            PoolScope::Environment(id) => workspace.environment_id == Some(*id),
        }
    }
}

impl AgentPool {
    /// Decide whether runs of `workspace` may be dispatched to this pool.
    ///
    /// Allow-all pools cover every workspace of their own organisation.
    /// Explicit associations are unioned with that, never used to narrow it.
    /// A pool never serves another organisation, whatever its associations.
    pub fn is_eligible_for(&self, workspace: &Workspace, scopes: &[PoolScope]) -> bool {
        if self.organisation != workspace.organisation {
            return false;
        }

        self.allow_all_workspaces || scopes.iter().any(|scope| scope.matches(workspace))
    }
}

/// A pool registration token (the secret itself is never part of this type)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentToken {
    pub id: Uuid,
    pub pool_id: Uuid,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl AgentToken {
    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(organisation: &str, allow_all: bool) -> AgentPool {
        AgentPool {
            id: Uuid::new_v4(),
            organisation: organisation.to_string(),
            name: "default".to_string(),
            allow_all_workspaces: allow_all,
            created_at: Utc::now(),
        }
    }

    fn workspace(organisation: &str) -> Workspace {
        Workspace {
            id: Uuid::new_v4(),
            organisation: organisation.to_string(),
            name: "network".to_string(),
            project_id: Some(Uuid::new_v4()),
            environment_id: Some(Uuid::new_v4()),
        }
    }

    #[test]
    fn test_allow_all_covers_own_organisation_only() {
        let p = pool("acme", true);
        assert!(p.is_eligible_for(&workspace("acme"), &[]));
        assert!(!p.is_eligible_for(&workspace("globex"), &[]));
    }

    #[test]
    fn test_explicit_workspace_association() {
        let p = pool("acme", false);
        let ws = workspace("acme");
        assert!(!p.is_eligible_for(&ws, &[]));
        assert!(p.is_eligible_for(&ws, &[PoolScope::Workspace(ws.id)]));
        assert!(!p.is_eligible_for(&ws, &[PoolScope::Workspace(Uuid::new_v4())]));
    }

    #[test]
    fn test_project_and_environment_associations() {
        let p = pool("acme", false);
        let ws = workspace("acme");
        let project = ws.project_id.unwrap();
        let environment = ws.environment_id.unwrap();

        assert!(p.is_eligible_for(&ws, &[PoolScope::Project(project)]));
        assert!(p.is_eligible_for(&ws, &[PoolScope::Environment(environment)]));

        let mut bare = ws.clone();
        bare.project_id = None;
        bare.environment_id = None;
        assert!(!p.is_eligible_for(&bare, &[PoolScope::Project(project)]));
    }

    #[test]
    fn test_associations_do_not_cross_organisations() {
        let p = pool("acme", false);
        let ws = workspace("globex");
        let scopes = [
            PoolScope::Workspace(ws.id),
            PoolScope::Project(ws.project_id.unwrap()),
            PoolScope::Environment(ws.environment_id.unwrap()),
        ];
        assert!(!p.is_eligible_for(&ws, &scopes));
    }

    #[test]
    fn test_scope_parts_round_trip() {
        let id = Uuid::new_v4();
        for scope in [
            PoolScope::Workspace(id),
            PoolScope::Project(id),
            PoolScope::Environment(id),
        ] {
            assert_eq!(PoolScope::from_parts(scope.kind(), id), Some(scope));
        }
        assert_eq!(PoolScope::from_parts("organisation", id), None);
    }

    #[test]
    fn test_scope_wire_format() {
        let id = Uuid::nil();
        let json = serde_json::to_value(PoolScope::Project(id)).unwrap();
        assert_eq!(json["kind"], "project");
        assert_eq!(json["id"], id.to_string());
    }
}
