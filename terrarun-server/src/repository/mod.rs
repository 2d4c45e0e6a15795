//! Repository Module
//!
//! Data access layer for the server.
//!
//! [`Repository`] is the seam between services and storage. Every operation
//! that must be atomic (registration, claim, ownership-guarded transitions,
//! the staleness sweep) is a single trait method so each backend can apply it
//! under its own transactional guarantees:
//! - [`PgRepository`]: PostgreSQL through sqlx, one transaction per call
//! - [`MemoryRepository`]: a single mutex around all state, for development
//!   and tests

pub mod agent;
pub mod memory;
pub mod pool;
pub mod postgres;
pub mod run;
pub mod scope;

pub use memory::MemoryRepository;
pub use postgres::PgRepository;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use terrarun_core::domain::agent::{Agent, AgentStatus};
use terrarun_core::domain::pool::{AgentPool, AgentToken, PoolScope};
use terrarun_core::domain::run::RunQueueEntry;
use terrarun_core::domain::scope::{Environment, Project, Workspace};
use terrarun_core::dto::pool::UpdateAgentPool;
use terrarun_core::dto::run::RunQuery;
use thiserror::Error;
use uuid::Uuid;

/// Storage error type
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A uniqueness constraint rejected the write
    #[error("{0}")]
    Conflict(String),
}

pub type Result<T> = std::result::Result<T, RepositoryError>;

/// How an owned entry finished
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Failed(String),
}

/// Result of a staleness sweep
#[derive(Debug, Clone, Default)]
pub struct SweepReport {
    /// Agents moved to `unknown`
    pub agents: Vec<Agent>,

    /// Entries returned to the unclaimed pool
    pub released: Vec<RunQueueEntry>,
}

#[async_trait]
pub trait Repository: Send + Sync {
    // -------------------------------------------------------------------------
    // Scope registry
    // -------------------------------------------------------------------------

    async fn upsert_workspace(&self, workspace: &Workspace) -> Result<()>;
    async fn find_workspace(&self, id: Uuid) -> Result<Option<Workspace>>;
    async fn list_workspaces(&self, organisation: Option<&str>) -> Result<Vec<Workspace>>;
    async fn upsert_project(&self, project: &Project) -> Result<()>;
    async fn find_project(&self, id: Uuid) -> Result<Option<Project>>;
    async fn upsert_environment(&self, environment: &Environment) -> Result<()>;
    async fn find_environment(&self, id: Uuid) -> Result<Option<Environment>>;

    // -------------------------------------------------------------------------
    // Pools and associations
    // -------------------------------------------------------------------------

    /// Fails with `Conflict` if the organisation already has a pool by that name
    async fn insert_pool(&self, pool: &AgentPool) -> Result<()>;
    async fn find_pool(&self, id: Uuid) -> Result<Option<AgentPool>>;
    async fn list_pools(&self, organisation: Option<&str>) -> Result<Vec<AgentPool>>;
    async fn update_pool(&self, id: Uuid, update: &UpdateAgentPool) -> Result<Option<AgentPool>>;

    /// Deletes the pool with its agents, tokens and associations. Entries held
    /// by its agents are released first.
    async fn delete_pool(&self, id: Uuid) -> Result<bool>;

    /// Idempotent
    async fn add_pool_scope(&self, pool_id: Uuid, scope: PoolScope) -> Result<()>;
    async fn remove_pool_scope(&self, pool_id: Uuid, scope: PoolScope) -> Result<bool>;
    async fn list_pool_scopes(&self, pool_id: Uuid) -> Result<Vec<PoolScope>>;

    /// Pools that may execute runs of `workspace`
    async fn eligible_pools(&self, workspace: &Workspace) -> Result<Vec<AgentPool>>;

    // -------------------------------------------------------------------------
    // Tokens
    // -------------------------------------------------------------------------

    async fn insert_token(&self, token: &AgentToken, secret_hash: &str) -> Result<()>;
    async fn list_tokens(&self, pool_id: Uuid) -> Result<Vec<AgentToken>>;

    /// Returns `None` if the token does not exist. Revoking twice keeps the
    /// first revocation time.
    async fn revoke_token(&self, id: Uuid, at: DateTime<Utc>) -> Result<Option<AgentToken>>;

    // -------------------------------------------------------------------------
    // Agents
    // -------------------------------------------------------------------------

    /// Atomically validate a pool token, refresh its `last_used_at` and create
    /// an idle agent in the token's pool. `None` if the token is unknown or
    /// revoked, in which case nothing is written.
    async fn register_agent(
        &self,
        token_hash: &str,
        name: &str,
        session_hash: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<Agent>>;

    /// The agent, if `session_hash` is its session credential
    async fn authenticate_agent(&self, id: Uuid, session_hash: &str) -> Result<Option<Agent>>;
    async fn find_agent(&self, id: Uuid) -> Result<Option<Agent>>;
    async fn list_agents(&self, pool_id: Option<Uuid>) -> Result<Vec<Agent>>;

    /// Record a heartbeat: `last_ping_at` moves forward to `at` (never back)
    /// and the status is reconciled with run ownership. Entries held by an
    /// agent reporting `exited` or `errored` are released.
    async fn record_heartbeat(
        &self,
        id: Uuid,
        status: AgentStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<Agent>>;

    /// Releases held entries, then deletes the agent
    async fn delete_agent(&self, id: Uuid) -> Result<bool>;

    /// Move every sweepable agent last heard from before `cutoff` to
    /// `unknown` and release what it held, as one atomic step.
    async fn mark_stale(&self, cutoff: DateTime<Utc>) -> Result<SweepReport>;

    // -------------------------------------------------------------------------
    // Run queue
    // -------------------------------------------------------------------------

    async fn insert_run(&self, entry: &RunQueueEntry) -> Result<()>;
    async fn find_run(&self, id: Uuid) -> Result<Option<RunQueueEntry>>;
    async fn list_runs(&self, query: &RunQuery) -> Result<Vec<RunQueueEntry>>;

    /// Claim the oldest unclaimed entry eligible for the agent's pool and mark
    /// the agent busy. At most one caller can win any given entry. `None` if
    /// the agent is not idle or nothing is eligible.
    async fn claim_next(&self, agent_id: Uuid, at: DateTime<Utc>) -> Result<Option<RunQueueEntry>>;

    /// `claimed -> executing`, only for the owning agent
    async fn start_run(
        &self,
        entry_id: Uuid,
        agent_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<RunQueueEntry>>;

    /// Held entry to a terminal state, owning agent back to idle
    async fn finish_run(
        &self,
        entry_id: Uuid,
        agent_id: Uuid,
        outcome: RunOutcome,
        at: DateTime<Utc>,
    ) -> Result<Option<RunQueueEntry>>;

    /// Held entry back to unclaimed, owning agent back to idle
    async fn release_run(&self, entry_id: Uuid, agent_id: Uuid) -> Result<Option<RunQueueEntry>>;
}
