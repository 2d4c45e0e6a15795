//! PostgreSQL repository
//!
//! Implements [`Repository`] over a sqlx connection pool by delegating to the
//! per-entity query modules.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use terrarun_core::domain::agent::{Agent, AgentStatus};
use terrarun_core::domain::pool::{AgentPool, AgentToken, PoolScope};
use terrarun_core::domain::run::RunQueueEntry;
use terrarun_core::domain::scope::{Environment, Project, Workspace};
use terrarun_core::dto::pool::UpdateAgentPool;
use terrarun_core::dto::run::RunQuery;
use uuid::Uuid;

use crate::repository::{
    Repository, RepositoryError, Result, RunOutcome, SweepReport, agent, pool, run, scope,
};

/// Repository backed by PostgreSQL
#[derive(Debug, Clone)]
pub struct PgRepository {
    pool: PgPool,
}

impl PgRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Map unique violations to `Conflict`, everything else stays a database error
fn conflict_or_database(err: sqlx::Error, message: impl FnOnce() -> String) -> RepositoryError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            RepositoryError::Conflict(message())
        }
        _ => RepositoryError::Database(err),
    }
}

#[async_trait]
impl Repository for PgRepository {
    async fn upsert_workspace(&self, workspace: &Workspace) -> Result<()> {
        Ok(scope::upsert_workspace(&self.pool, workspace).await?)
    }

    async fn find_workspace(&self, id: Uuid) -> Result<Option<Workspace>> {
        Ok(scope::find_workspace(&self.pool, id).await?)
    }

    async fn list_workspaces(&self, organisation: Option<&str>) -> Result<Vec<Workspace>> {
        Ok(scope::list_workspaces(&self.pool, organisation).await?)
    }

    async fn upsert_project(&self, project: &Project) -> Result<()> {
        Ok(scope::upsert_project(&self.pool, project).await?)
    }

    async fn find_project(&self, id: Uuid) -> Result<Option<Project>> {
        Ok(scope::find_project(&self.pool, id).await?)
    }

    async fn upsert_environment(&self, environment: &Environment) -> Result<()> {
        Ok(scope::upsert_environment(&self.pool, environment).await?)
    }

    async fn find_environment(&self, id: Uuid) -> Result<Option<Environment>> {
        Ok(scope::find_environment(&self.pool, id).await?)
    }

    async fn insert_pool(&self, agent_pool: &AgentPool) -> Result<()> {
        pool::insert(&self.pool, agent_pool).await.map_err(|e| {
            conflict_or_database(e, || {
                format!(
                    "Organisation {} already has a pool named {}",
                    agent_pool.organisation, agent_pool.name
                )
            })
        })
    }

    async fn find_pool(&self, id: Uuid) -> Result<Option<AgentPool>> {
        Ok(pool::find_by_id(&self.pool, id).await?)
    }

    async fn list_pools(&self, organisation: Option<&str>) -> Result<Vec<AgentPool>> {
        Ok(pool::list(&self.pool, organisation).await?)
    }

    async fn update_pool(&self, id: Uuid, update: &UpdateAgentPool) -> Result<Option<AgentPool>> {
        pool::update(&self.pool, id, update).await.map_err(|e| {
            conflict_or_database(e, || {
                format!(
                    "Organisation already has a pool named {}",
                    update.name.as_deref().unwrap_or_default()
                )
            })
        })
    }

    async fn delete_pool(&self, id: Uuid) -> Result<bool> {
        Ok(pool::delete(&self.pool, id).await?)
    }

    async fn add_pool_scope(&self, pool_id: Uuid, scope: PoolScope) -> Result<()> {
        Ok(pool::add_scope(&self.pool, pool_id, scope).await?)
    }

    async fn remove_pool_scope(&self, pool_id: Uuid, scope: PoolScope) -> Result<bool> {
        Ok(pool::remove_scope(&self.pool, pool_id, scope).await?)
    }

    async fn list_pool_scopes(&self, pool_id: Uuid) -> Result<Vec<PoolScope>> {
        Ok(pool::list_scopes(&self.pool, pool_id).await?)
    }

    async fn eligible_pools(&self, workspace: &Workspace) -> Result<Vec<AgentPool>> {
        Ok(pool::eligible_for(&self.pool, workspace).await?)
    }

    async fn insert_token(&self, token: &AgentToken, secret_hash: &str) -> Result<()> {
        Ok(pool::insert_token(&self.pool, token, secret_hash).await?)
    }

    async fn list_tokens(&self, pool_id: Uuid) -> Result<Vec<AgentToken>> {
        Ok(pool::list_tokens(&self.pool, pool_id).await?)
    }

    async fn revoke_token(&self, id: Uuid, at: DateTime<Utc>) -> Result<Option<AgentToken>> {
        Ok(pool::revoke_token(&self.pool, id, at).await?)
    }

    async fn register_agent(
        &self,
        token_hash: &str,
        name: &str,
        session_hash: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<Agent>> {
        Ok(agent::register(&self.pool, token_hash, name, session_hash, at).await?)
    }

    async fn authenticate_agent(&self, id: Uuid, session_hash: &str) -> Result<Option<Agent>> {
        Ok(agent::authenticate(&self.pool, id, session_hash).await?)
    }

    async fn find_agent(&self, id: Uuid) -> Result<Option<Agent>> {
        Ok(agent::find_by_id(&self.pool, id).await?)
    }

    async fn list_agents(&self, pool_id: Option<Uuid>) -> Result<Vec<Agent>> {
        Ok(agent::list(&self.pool, pool_id).await?)
    }

    async fn record_heartbeat(
        &self,
        id: Uuid,
        status: AgentStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<Agent>> {
        Ok(agent::record_heartbeat(&self.pool, id, status, at).await?)
    }

    async fn delete_agent(&self, id: Uuid) -> Result<bool> {
        Ok(agent::delete(&self.pool, id).await?)
    }

    async fn mark_stale(&self, cutoff: DateTime<Utc>) -> Result<SweepReport> {
        Ok(agent::mark_stale(&self.pool, cutoff).await?)
    }

    async fn insert_run(&self, entry: &RunQueueEntry) -> Result<()> {
        Ok(run::create(&self.pool, entry).await?)
    }

    async fn find_run(&self, id: Uuid) -> Result<Option<RunQueueEntry>> {
        Ok(run::find_by_id(&self.pool, id).await?)
    }

    async fn list_runs(&self, query: &RunQuery) -> Result<Vec<RunQueueEntry>> {
        Ok(run::list(&self.pool, query).await?)
    }

    async fn claim_next(&self, agent_id: Uuid, at: DateTime<Utc>) -> Result<Option<RunQueueEntry>> {
        Ok(run::claim_next(&self.pool, agent_id, at).await?)
    }

    async fn start_run(
        &self,
        entry_id: Uuid,
        agent_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<RunQueueEntry>> {
        Ok(run::start(&self.pool, entry_id, agent_id, at).await?)
    }

    async fn finish_run(
        &self,
        entry_id: Uuid,
        agent_id: Uuid,
        outcome: RunOutcome,
        at: DateTime<Utc>,
    ) -> Result<Option<RunQueueEntry>> {
        Ok(run::finish(&self.pool, entry_id, agent_id, outcome, at).await?)
    }

    async fn release_run(&self, entry_id: Uuid, agent_id: Uuid) -> Result<Option<RunQueueEntry>> {
        Ok(run::release(&self.pool, entry_id, agent_id).await?)
    }
}
