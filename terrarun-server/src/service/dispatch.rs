//! Run Dispatch Service
//!
//! Queueing and the claim protocol. An entry moves
//! `unclaimed -> claimed -> executing -> completed | failed`, and goes back
//! to `unclaimed` when its agent releases it or stops heartbeating.
//!
//! Every transition is guarded by ownership in the repository, so a report
//! from an agent that lost the entry changes nothing and is answered with
//! [`DispatchError::Conflict`].

use chrono::{DateTime, Utc};
use std::time::Duration;
use terrarun_core::domain::run::{RunQueueEntry, RunState};
use terrarun_core::dto::run::{EnqueueRun, RunDescriptor, RunQuery};
use thiserror::Error;
use tokio::time::Instant;
use uuid::Uuid;

use crate::repository::{Repository, RepositoryError, RunOutcome};

/// Pause between claim attempts while a claim request is waiting for work
pub const CLAIM_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Longest server-side wait a claim may request
pub const MAX_CLAIM_WAIT: Duration = Duration::from_secs(3600);

/// Service error type
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Agent {0} is not registered")]
    UnknownAgent(Uuid),

    #[error("Workspace {0} not found")]
    WorkspaceNotFound(Uuid),

    #[error("Run queue entry {0} not found")]
    RunNotFound(Uuid),

    /// The entry is not held by the reporting agent, or not in a state the
    /// transition applies to
    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    ValidationError(String),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

pub type Result<T> = std::result::Result<T, DispatchError>;

/// Queue a run for execution by an agent
pub async fn enqueue(repo: &dyn Repository, req: EnqueueRun) -> Result<RunQueueEntry> {
    let workspace = repo
        .find_workspace(req.workspace_id)
        .await?
        .ok_or(DispatchError::WorkspaceNotFound(req.workspace_id))?;

    let entry = RunQueueEntry::queued(req.run_id, workspace.id, req.operation);
    repo.insert_run(&entry).await?;

    if repo.eligible_pools(&workspace).await?.is_empty() {
        tracing::warn!(
            "Run {} queued for workspace {} which no agent pool serves",
            entry.run_id,
            workspace.name
        );
    }

    tracing::info!(
        "Run {} queued as entry {} ({} in {})",
        entry.run_id,
        entry.id,
        entry.operation,
        workspace.name
    );

    Ok(entry)
}

/// Claim the oldest eligible entry for an agent
///
/// `None` when nothing is eligible, when the agent is not idle, or when
/// another agent won the race.
pub async fn claim_next(
    repo: &dyn Repository,
    agent_id: Uuid,
    at: DateTime<Utc>,
) -> Result<Option<RunDescriptor>> {
    let Some(entry) = repo.claim_next(agent_id, at).await? else {
        return Ok(None);
    };

    let workspace = repo
        .find_workspace(entry.workspace_id)
        .await?
        .ok_or(DispatchError::WorkspaceNotFound(entry.workspace_id))?;

    tracing::info!(
        "Agent {} claimed entry {} (run {}, attempt {})",
        agent_id,
        entry.id,
        entry.run_id,
        entry.attempt
    );

    Ok(Some(RunDescriptor::new(&entry, &workspace)))
}

/// Claim with a server-side long poll of up to `wait`
pub async fn claim(
    repo: &dyn Repository,
    agent_id: Uuid,
    wait: Duration,
) -> Result<Option<RunDescriptor>> {
    repo.find_agent(agent_id)
        .await?
        .ok_or(DispatchError::UnknownAgent(agent_id))?;

    let deadline = Instant::now() + wait.min(MAX_CLAIM_WAIT);

    loop {
        if let Some(run) = claim_next(repo, agent_id, Utc::now()).await? {
            return Ok(Some(run));
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(None);
        }

        tokio::time::sleep(remaining.min(CLAIM_RETRY_INTERVAL)).await;
    }
}

/// Mark a claimed entry as executing
pub async fn start_run(
    repo: &dyn Repository,
    agent_id: Uuid,
    entry_id: Uuid,
    at: DateTime<Utc>,
) -> Result<RunQueueEntry> {
    match repo.start_run(entry_id, agent_id, at).await? {
        Some(entry) => {
            tracing::info!("Entry {} executing on agent {}", entry_id, agent_id);
            Ok(entry)
        }
        None => Err(rejection(repo, agent_id, entry_id, RunState::Executing).await),
    }
}

pub async fn complete_run(
    repo: &dyn Repository,
    agent_id: Uuid,
    entry_id: Uuid,
    at: DateTime<Utc>,
) -> Result<RunQueueEntry> {
    match repo
        .finish_run(entry_id, agent_id, RunOutcome::Completed, at)
        .await?
    {
        Some(entry) => {
            tracing::info!("Entry {} completed by agent {}", entry_id, agent_id);
            Ok(entry)
        }
        None => Err(rejection(repo, agent_id, entry_id, RunState::Completed).await),
    }
}

/// Record a failed execution. Failed entries are not retried.
pub async fn fail_run(
    repo: &dyn Repository,
    agent_id: Uuid,
    entry_id: Uuid,
    message: String,
    at: DateTime<Utc>,
) -> Result<RunQueueEntry> {
    if message.trim().is_empty() {
        return Err(DispatchError::ValidationError(
            "Failure message cannot be empty".to_string(),
        ));
    }

    match repo
        .finish_run(entry_id, agent_id, RunOutcome::Failed(message), at)
        .await?
    {
        Some(entry) => {
            tracing::warn!(
                "Entry {} failed on agent {}: {}",
                entry_id,
                agent_id,
                entry.failure_message.as_deref().unwrap_or_default()
            );
            Ok(entry)
        }
        None => Err(rejection(repo, agent_id, entry_id, RunState::Failed).await),
    }
}

/// Hand an entry back to the queue
pub async fn release_run(
    repo: &dyn Repository,
    agent_id: Uuid,
    entry_id: Uuid,
) -> Result<RunQueueEntry> {
    match repo.release_run(entry_id, agent_id).await? {
        Some(entry) => {
            tracing::info!("Entry {} released by agent {}", entry_id, agent_id);
            Ok(entry)
        }
        None => Err(rejection(repo, agent_id, entry_id, RunState::Unclaimed).await),
    }
}

pub async fn get_run(repo: &dyn Repository, entry_id: Uuid) -> Result<RunQueueEntry> {
    repo.find_run(entry_id)
        .await?
        .ok_or(DispatchError::RunNotFound(entry_id))
}

pub async fn list_runs(repo: &dyn Repository, query: RunQuery) -> Result<Vec<RunQueueEntry>> {
    Ok(repo.list_runs(&query).await?)
}

/// Explain why a guarded transition did not apply
async fn rejection(
    repo: &dyn Repository,
    agent_id: Uuid,
    entry_id: Uuid,
    target: RunState,
) -> DispatchError {
    let entry = match repo.find_run(entry_id).await {
        Ok(Some(entry)) => entry,
        Ok(None) => return DispatchError::RunNotFound(entry_id),
        Err(e) => return e.into(),
    };

    let reason = match entry.agent_id {
        Some(owner) if owner != agent_id => format!("held by agent {}", owner),
        _ if !entry.state.can_transition_to(target) => format!("in state {}", entry.state),
        _ => format!("not held by agent {}", agent_id),
    };

    tracing::debug!(
        "Rejected {} transition of entry {} from agent {}: {}",
        target,
        entry_id,
        agent_id,
        reason
    );

    DispatchError::Conflict(format!(
        "Entry {} cannot move to {}: {}",
        entry_id, target, reason
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::MemoryRepository;
    use crate::service::{fixtures, pool, registry};
    use chrono::Duration as TimeDelta;
    use std::sync::Arc;
    use terrarun_core::domain::agent::AgentStatus;
    use terrarun_core::domain::pool::PoolScope;
    use terrarun_core::domain::run::RunOperation;

    #[tokio::test]
    async fn test_enqueue_requires_workspace() {
        let repo = MemoryRepository::new();

        let err = enqueue(
            &repo,
            EnqueueRun {
                run_id: Uuid::new_v4(),
                workspace_id: Uuid::new_v4(),
                operation: RunOperation::Plan,
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, DispatchError::WorkspaceNotFound(_)));
    }

    #[tokio::test]
    async fn test_claim_returns_descriptor_and_marks_agent_busy() {
        let repo = MemoryRepository::new();
        let t0 = Utc::now();
        let agent = fixtures::agent(&repo, "acme", t0).await;
        let workspace = fixtures::workspace(&repo, "acme").await;
        let entry = fixtures::run(&repo, workspace.id).await;

        let run = claim_next(&repo, agent.id, t0).await.unwrap().unwrap();
        assert_eq!(run.entry_id, entry.id);
        assert_eq!(run.run_id, entry.run_id);
        assert_eq!(run.workspace_name, workspace.name);
        assert_eq!(run.organisation, "acme");
        assert_eq!(run.attempt, 1);

        let agent = repo.find_agent(agent.id).await.unwrap().unwrap();
        assert_eq!(agent.status, AgentStatus::Busy);

        let entry = get_run(&repo, entry.id).await.unwrap();
        assert_eq!(entry.state, RunState::Claimed);
        assert_eq!(entry.agent_id, Some(agent.id));
        assert_eq!(entry.claimed_at, Some(t0));
    }

    #[tokio::test]
    async fn test_claim_is_fifo() {
        let repo = MemoryRepository::new();
        let t0 = Utc::now();
        let workspace = fixtures::workspace(&repo, "acme").await;

        let mut first = RunQueueEntry::queued(Uuid::new_v4(), workspace.id, RunOperation::Plan);
        first.queued_at = t0;
        let mut second = RunQueueEntry::queued(Uuid::new_v4(), workspace.id, RunOperation::Apply);
        second.queued_at = t0 + TimeDelta::seconds(1);
        repo.insert_run(&second).await.unwrap();
        repo.insert_run(&first).await.unwrap();

        let agent = fixtures::agent(&repo, "acme", t0).await;
        let run = claim_next(&repo, agent.id, t0).await.unwrap().unwrap();
        assert_eq!(run.entry_id, first.id);
    }

    #[tokio::test]
    async fn test_claim_ignores_ineligible_workspaces() {
        let repo = MemoryRepository::new();
        let t0 = Utc::now();
        let scoped = fixtures::pool(&repo, "acme", "scoped", false).await;
        let agent = fixtures::agent_in(&repo, scoped.id, t0).await;
        let served = fixtures::workspace(&repo, "acme").await;
        let unserved = fixtures::workspace(&repo, "acme").await;
        let foreign = fixtures::workspace(&repo, "globex").await;
        pool::add_scope(&repo, scoped.id, PoolScope::Workspace(served.id))
            .await
            .unwrap();

        fixtures::run(&repo, unserved.id).await;
        fixtures::run(&repo, foreign.id).await;
        assert!(claim_next(&repo, agent.id, t0).await.unwrap().is_none());

        let entry = fixtures::run(&repo, served.id).await;
        let run = claim_next(&repo, agent.id, t0).await.unwrap().unwrap();
        assert_eq!(run.entry_id, entry.id);
    }

    #[tokio::test]
    async fn test_project_scoped_pool_ignores_other_organisations() {
        let repo = MemoryRepository::new();
        let t0 = Utc::now();
        let project = Uuid::new_v4();
        crate::service::scope::sync_project(
            &repo,
            project,
            terrarun_core::dto::scope::SyncScopeEntity {
                organisation: "acme".into(),
                name: "infra".into(),
            },
        )
        .await
        .unwrap();

        let private = fixtures::pool(&repo, "acme", "private", false).await;
        pool::add_scope(&repo, private.id, PoolScope::Project(project))
            .await
            .unwrap();
        let agent = fixtures::agent_in(&repo, private.id, t0).await;

        // Written straight to the repository, past the sync reference check
        let mut foreign = fixtures::workspace(&repo, "globex").await;
        foreign.project_id = Some(project);
        repo.upsert_workspace(&foreign).await.unwrap();
        fixtures::run(&repo, foreign.id).await;

        assert!(claim_next(&repo, agent.id, t0).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unbounded_claim_wait_is_capped() {
        let repo = MemoryRepository::new();
        let t0 = Utc::now();
        let agent = fixtures::agent(&repo, "acme", t0).await;
        let workspace = fixtures::workspace(&repo, "acme").await;
        let entry = fixtures::run(&repo, workspace.id).await;

        let run = claim(&repo, agent.id, Duration::MAX).await.unwrap().unwrap();
        assert_eq!(run.entry_id, entry.id);
    }

    #[tokio::test]
    async fn test_busy_agent_gets_nothing() {
        let repo = MemoryRepository::new();
        let t0 = Utc::now();
        let agent = fixtures::agent(&repo, "acme", t0).await;
        let workspace = fixtures::workspace(&repo, "acme").await;
        fixtures::run(&repo, workspace.id).await;
        fixtures::run(&repo, workspace.id).await;

        assert!(claim_next(&repo, agent.id, t0).await.unwrap().is_some());
        assert!(claim_next(&repo, agent.id, t0).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_claims_have_exactly_one_winner() {
        let repo = Arc::new(MemoryRepository::new());
        let t0 = Utc::now();
        let pool = fixtures::pool(repo.as_ref(), "acme", "default", true).await;
        let workspace = fixtures::workspace(repo.as_ref(), "acme").await;
        let entry = fixtures::run(repo.as_ref(), workspace.id).await;

        let mut agents = Vec::new();
        for _ in 0..16 {
            agents.push(fixtures::agent_in(repo.as_ref(), pool.id, t0).await);
        }

        let handles: Vec<_> = agents
            .iter()
            .map(|agent| {
                let repo = Arc::clone(&repo);
                let agent_id = agent.id;
                tokio::spawn(async move { claim_next(repo.as_ref(), agent_id, t0).await })
            })
            .collect();

        let mut winners = Vec::new();
        for (agent, handle) in agents.iter().zip(handles) {
            if let Some(run) = handle.await.unwrap().unwrap() {
                assert_eq!(run.entry_id, entry.id);
                winners.push(agent.id);
            }
        }

        assert_eq!(winners.len(), 1);
        let entry = get_run(repo.as_ref(), entry.id).await.unwrap();
        assert_eq!(entry.agent_id, Some(winners[0]));
        assert_eq!(entry.attempt, 1);
    }

    #[tokio::test]
    async fn test_full_lifecycle_returns_agent_to_idle() {
        let repo = MemoryRepository::new();
        let t0 = Utc::now();
        let agent = fixtures::agent(&repo, "acme", t0).await;
        let workspace = fixtures::workspace(&repo, "acme").await;
        let entry = fixtures::run(&repo, workspace.id).await;

        claim_next(&repo, agent.id, t0).await.unwrap().unwrap();
        let started = start_run(&repo, agent.id, entry.id, t0).await.unwrap();
        assert_eq!(started.state, RunState::Executing);

        let done = complete_run(&repo, agent.id, entry.id, t0).await.unwrap();
        assert_eq!(done.state, RunState::Completed);
        assert_eq!(done.finished_at, Some(t0));

        let agent_now = repo.find_agent(agent.id).await.unwrap().unwrap();
        assert_eq!(agent_now.status, AgentStatus::Idle);

        let err = complete_run(&repo, agent.id, entry.id, t0).await.unwrap_err();
        assert!(matches!(err, DispatchError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_fail_records_message() {
        let repo = MemoryRepository::new();
        let t0 = Utc::now();
        let agent = fixtures::agent(&repo, "acme", t0).await;
        let workspace = fixtures::workspace(&repo, "acme").await;
        let entry = fixtures::run(&repo, workspace.id).await;
        claim_next(&repo, agent.id, t0).await.unwrap().unwrap();

        let err = fail_run(&repo, agent.id, entry.id, " ".into(), t0)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::ValidationError(_)));

        let failed = fail_run(&repo, agent.id, entry.id, "terraform exited 1".into(), t0)
            .await
            .unwrap();
        assert_eq!(failed.state, RunState::Failed);
        assert_eq!(failed.failure_message.as_deref(), Some("terraform exited 1"));

        // Not retried
        assert!(claim_next(&repo, agent.id, t0).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_non_owner_reports_mutate_nothing() {
        let repo = MemoryRepository::new();
        let t0 = Utc::now();
        let pool = fixtures::pool(&repo, "acme", "default", true).await;
        let owner = fixtures::agent_in(&repo, pool.id, t0).await;
        let intruder = fixtures::agent_in(&repo, pool.id, t0).await;
        let workspace = fixtures::workspace(&repo, "acme").await;
        let entry = fixtures::run(&repo, workspace.id).await;
        claim_next(&repo, owner.id, t0).await.unwrap().unwrap();

        let before = get_run(&repo, entry.id).await.unwrap();

        for err in [
            start_run(&repo, intruder.id, entry.id, t0).await.unwrap_err(),
            complete_run(&repo, intruder.id, entry.id, t0).await.unwrap_err(),
            fail_run(&repo, intruder.id, entry.id, "boom".into(), t0)
                .await
                .unwrap_err(),
            release_run(&repo, intruder.id, entry.id).await.unwrap_err(),
        ] {
            assert!(matches!(err, DispatchError::Conflict(_)));
        }

        assert_eq!(get_run(&repo, entry.id).await.unwrap(), before);

        let err = start_run(&repo, owner.id, Uuid::new_v4(), t0).await.unwrap_err();
        assert!(matches!(err, DispatchError::RunNotFound(_)));
    }

    #[tokio::test]
    async fn test_release_and_reclaim_counts_attempts() {
        let repo = MemoryRepository::new();
        let t0 = Utc::now();
        let agent = fixtures::agent(&repo, "acme", t0).await;
        let workspace = fixtures::workspace(&repo, "acme").await;
        let entry = fixtures::run(&repo, workspace.id).await;

        claim_next(&repo, agent.id, t0).await.unwrap().unwrap();
        let released = release_run(&repo, agent.id, entry.id).await.unwrap();
        assert_eq!(released.state, RunState::Unclaimed);
        assert_eq!(released.agent_id, None);

        let run = claim_next(&repo, agent.id, t0).await.unwrap().unwrap();
        assert_eq!(run.attempt, 2);
    }

    #[tokio::test]
    async fn test_lapsed_agent_loses_entry_to_another() {
        let repo = MemoryRepository::new();
        let t0 = Utc::now();
        let timeout = Duration::from_secs(90);
        let pool = fixtures::pool(&repo, "acme", "default", true).await;
        let a = fixtures::agent_in(&repo, pool.id, t0).await;
        let workspace = fixtures::workspace(&repo, "acme").await;
        let entry = fixtures::run(&repo, workspace.id).await;

        claim_next(&repo, a.id, t0).await.unwrap().unwrap();
        start_run(&repo, a.id, entry.id, t0).await.unwrap();

        let b = fixtures::agent_in(&repo, pool.id, t0 + TimeDelta::seconds(100)).await;
        let report = registry::mark_stale(&repo, timeout, t0 + TimeDelta::seconds(100))
            .await
            .unwrap();
        assert_eq!(report.agents.len(), 1);
        assert_eq!(report.agents[0].id, a.id);
        assert_eq!(report.released.len(), 1);

        let released = get_run(&repo, entry.id).await.unwrap();
        assert_eq!(released.state, RunState::Unclaimed);
        assert_eq!(released.agent_id, None);
        let a_now = repo.find_agent(a.id).await.unwrap().unwrap();
        assert_eq!(a_now.status, AgentStatus::Unknown);

        let run = claim_next(&repo, b.id, t0 + TimeDelta::seconds(101))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(run.entry_id, entry.id);
        assert_eq!(run.attempt, 2);

        // A comes back and reports a result for work it no longer owns
        let err = complete_run(&repo, a.id, entry.id, t0 + TimeDelta::seconds(102))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Conflict(_)));
        assert_eq!(
            get_run(&repo, entry.id).await.unwrap().agent_id,
            Some(b.id)
        );
    }

    #[tokio::test]
    async fn test_claim_wait_times_out_empty() {
        let repo = MemoryRepository::new();
        let agent = fixtures::agent(&repo, "acme", Utc::now()).await;

        let run = claim(&repo, agent.id, Duration::from_millis(20)).await.unwrap();
        assert!(run.is_none());
    }

    #[tokio::test]
    async fn test_claim_wait_picks_up_late_entry() {
        let repo = Arc::new(MemoryRepository::new());
        let agent = fixtures::agent(repo.as_ref(), "acme", Utc::now()).await;
        let workspace = fixtures::workspace(repo.as_ref(), "acme").await;

        let waiter = {
            let repo = Arc::clone(&repo);
            tokio::spawn(async move { claim(repo.as_ref(), agent.id, Duration::from_secs(5)).await })
        };

        tokio::time::sleep(Duration::from_millis(100)).await;
        let entry = fixtures::run(repo.as_ref(), workspace.id).await;

        let run = waiter.await.unwrap().unwrap().unwrap();
        assert_eq!(run.entry_id, entry.id);
    }

    #[tokio::test]
    async fn test_claim_unknown_agent() {
        let repo = MemoryRepository::new();
        let err = claim(&repo, Uuid::new_v4(), Duration::ZERO).await.unwrap_err();
        assert!(matches!(err, DispatchError::UnknownAgent(_)));
    }
}
