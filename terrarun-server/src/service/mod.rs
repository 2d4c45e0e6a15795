//! Service Module
//!
//! Business logic layer for the server.
//! Services validate requests, apply domain rules and call into a
//! [`Repository`](crate::repository::Repository) for storage.

pub mod credentials;
pub mod dispatch;
pub mod pool;
pub mod registry;
pub mod scope;
pub mod sweeper;

// Re-export for convenience
pub use dispatch as dispatch_service;
pub use pool as pool_service;
pub use registry as registry_service;
pub use scope as scope_service;

#[cfg(test)]
pub(crate) mod fixtures {
    use chrono::{DateTime, Utc};
    use terrarun_core::domain::agent::Agent;
    use terrarun_core::domain::pool::AgentPool;
    use terrarun_core::domain::run::{RunOperation, RunQueueEntry};
    use terrarun_core::domain::scope::Workspace;
    use terrarun_core::dto::pool::{CreateAgentPool, CreateAgentToken, CreatedAgentToken};
    use terrarun_core::dto::scope::SyncWorkspace;
    use uuid::Uuid;

    use crate::repository::Repository;

    pub async fn pool(
        repo: &dyn Repository,
        organisation: &str,
        name: &str,
        allow_all_workspaces: bool,
    ) -> AgentPool {
        super::pool::create_pool(
            repo,
            CreateAgentPool {
                organisation: organisation.to_string(),
                name: name.to_string(),
                allow_all_workspaces,
            },
        )
        .await
        .unwrap()
    }

    pub async fn token(repo: &dyn Repository, pool_id: Uuid) -> CreatedAgentToken {
        super::registry::create_token(repo, pool_id, CreateAgentToken::default())
            .await
            .unwrap()
    }

    /// Registers an agent in `pool_id` with its first ping at `at`
    pub async fn agent_in(repo: &dyn Repository, pool_id: Uuid, at: DateTime<Utc>) -> Agent {
        let token = token(repo, pool_id).await;
        super::registry::register(repo, &token.secret, "agent", at)
            .await
            .unwrap()
            .agent
    }

    /// Registers an agent in a fresh organisation-wide pool
    pub async fn agent(repo: &dyn Repository, organisation: &str, at: DateTime<Utc>) -> Agent {
        let name = format!("pool-{}", Uuid::new_v4().simple());
        let pool = pool(repo, organisation, &name, true).await;
        agent_in(repo, pool.id, at).await
    }

    pub async fn workspace(repo: &dyn Repository, organisation: &str) -> Workspace {
        super::scope::sync_workspace(
            repo,
            Uuid::new_v4(),
            SyncWorkspace {
                organisation: organisation.to_string(),
                name: "infra".to_string(),
                project_id: None,
                environment_id: None,
            },
        )
        .await
        .unwrap()
    }

    pub async fn run(repo: &dyn Repository, workspace_id: Uuid) -> RunQueueEntry {
        let entry = RunQueueEntry::queued(Uuid::new_v4(), workspace_id, RunOperation::Plan);
        repo.insert_run(&entry).await.unwrap();
        entry
    }
}
