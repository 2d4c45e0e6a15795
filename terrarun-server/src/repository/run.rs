//! Run Queue Repository
//!
//! Handles all database operations related to run-queue entries, including
//! the atomic claim.

use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};
use terrarun_core::domain::agent::AgentStatus;
use terrarun_core::domain::run::{RunOperation, RunQueueEntry, RunState};
use terrarun_core::dto::run::RunQuery;
use uuid::Uuid;

use crate::repository::{RunOutcome, agent};

const RUN_COLUMNS: &str = "id, run_id, workspace_id, operation, state, agent_id, attempt, \
                           queued_at, claimed_at, started_at, finished_at, failure_message";

/// Create a new, unclaimed entry
pub async fn create(pool: &PgPool, entry: &RunQueueEntry) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO run_queue (id, run_id, workspace_id, operation, state, attempt, queued_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(entry.id)
    .bind(entry.run_id)
    .bind(entry.workspace_id)
    .bind(entry.operation.as_str())
    .bind(entry.state.as_str())
    .bind(entry.attempt)
    .bind(entry.queued_at)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<RunQueueEntry>, sqlx::Error> {
    let row = sqlx::query_as::<_, RunRow>(&format!(
        "SELECT {RUN_COLUMNS} FROM run_queue WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| r.into()))
}

/// List entries matching the query, oldest first
pub async fn list(pool: &PgPool, query: &RunQuery) -> Result<Vec<RunQueueEntry>, sqlx::Error> {
    let rows = sqlx::query_as::<_, RunRow>(&format!(
        r#"
        SELECT {RUN_COLUMNS}
        FROM run_queue
        WHERE ($1::TEXT IS NULL OR state = $1)
          AND ($2::UUID IS NULL OR workspace_id = $2)
        ORDER BY queued_at ASC, id ASC
        "#
    ))
    .bind(query.state.map(|s| s.as_str()))
    .bind(query.workspace_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

/// Claim the next eligible entry for an agent.
///
/// The agent row is locked and must be idle. The entry is picked with
/// `FOR UPDATE SKIP LOCKED` so concurrent pollers never block on, or both
/// obtain, the same row; the update re-checks `state = 'unclaimed'` as the
/// compare-and-set guard.
pub async fn claim_next(
    pool: &PgPool,
    agent_id: Uuid,
    at: DateTime<Utc>,
) -> Result<Option<RunQueueEntry>, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let pool_id: Option<Uuid> = sqlx::query_scalar(
        "SELECT pool_id FROM agents WHERE id = $1 AND status = $2 FOR UPDATE",
    )
    .bind(agent_id)
    .bind(AgentStatus::Idle.as_str())
    .fetch_optional(&mut *tx)
    .await?;

    let Some(pool_id) = pool_id else {
        tx.rollback().await?;
        return Ok(None);
    };

    let row = sqlx::query_as::<_, RunRow>(&format!(
        r#"
        WITH next_entry AS (
            SELECT q.id
            FROM run_queue q
            JOIN workspaces w ON w.id = q.workspace_id
            JOIN agent_pools p ON p.id = $2
            WHERE q.state = 'unclaimed'
              AND w.organisation = p.organisation
              AND (   p.allow_all_workspaces
                   OR EXISTS (
                        SELECT 1
                        FROM agent_pool_scopes s
                        WHERE s.pool_id = p.id
                          AND (   (s.kind = 'workspace' AND s.target_id = w.id)
                               OR (s.kind = 'project' AND s.target_id = w.project_id)
                               OR (s.kind = 'environment' AND s.target_id = w.environment_id))
                   ))
            ORDER BY q.queued_at, q.id
            FOR UPDATE OF q SKIP LOCKED
            LIMIT 1
        )
        UPDATE run_queue
        SET state = 'claimed',
            agent_id = $1,
            attempt = attempt + 1,
            claimed_at = $3,
            started_at = NULL
        FROM next_entry
        WHERE run_queue.id = next_entry.id
          AND run_queue.state = 'unclaimed'
        RETURNING {}
        "#,
        qualified_columns("run_queue")
    ))
    .bind(agent_id)
    .bind(pool_id)
    .bind(at)
    .fetch_optional(&mut *tx)
    .await?;

    let Some(row) = row else {
        tx.rollback().await?;
        return Ok(None);
    };

    agent::set_status(&mut tx, agent_id, AgentStatus::Busy).await?;
    tx.commit().await?;

    Ok(Some(row.into()))
}

/// `claimed -> executing` for the owning agent
pub async fn start(
    pool: &PgPool,
    entry_id: Uuid,
    agent_id: Uuid,
    at: DateTime<Utc>,
) -> Result<Option<RunQueueEntry>, sqlx::Error> {
    let row = sqlx::query_as::<_, RunRow>(&format!(
        r#"
        UPDATE run_queue
        SET state = 'executing', started_at = $3
        WHERE id = $1 AND agent_id = $2 AND state = 'claimed'
        RETURNING {RUN_COLUMNS}
        "#
    ))
    .bind(entry_id)
    .bind(agent_id)
    .bind(at)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| r.into()))
}

/// Move an owned entry to its terminal state and free the agent
pub async fn finish(
    pool: &PgPool,
    entry_id: Uuid,
    agent_id: Uuid,
    outcome: RunOutcome,
    at: DateTime<Utc>,
) -> Result<Option<RunQueueEntry>, sqlx::Error> {
    let (state, message) = match outcome {
        RunOutcome::Completed => (RunState::Completed, None),
        RunOutcome::Failed(message) => (RunState::Failed, Some(message)),
    };

    let mut tx = pool.begin().await?;
    agent::lock(&mut tx, &[agent_id]).await?;

    let row = sqlx::query_as::<_, RunRow>(&format!(
        r#"
        UPDATE run_queue
        SET state = $3, finished_at = $4, failure_message = $5
        WHERE id = $1 AND agent_id = $2 AND state IN ('claimed', 'executing')
        RETURNING {RUN_COLUMNS}
        "#
    ))
    .bind(entry_id)
    .bind(agent_id)
    .bind(state.as_str())
    .bind(at)
    .bind(message)
    .fetch_optional(&mut *tx)
    .await?;

    let Some(row) = row else {
        tx.rollback().await?;
        return Ok(None);
    };

    free_agent(&mut tx, agent_id).await?;
    tx.commit().await?;

    Ok(Some(row.into()))
}

/// Hand an owned entry back to the queue and free the agent
pub async fn release(
    pool: &PgPool,
    entry_id: Uuid,
    agent_id: Uuid,
) -> Result<Option<RunQueueEntry>, sqlx::Error> {
    let mut tx = pool.begin().await?;
    agent::lock(&mut tx, &[agent_id]).await?;

    let row = sqlx::query_as::<_, RunRow>(&format!(
        r#"
        UPDATE run_queue
        SET state = 'unclaimed', agent_id = NULL, claimed_at = NULL, started_at = NULL
        WHERE id = $1 AND agent_id = $2 AND state IN ('claimed', 'executing')
        RETURNING {RUN_COLUMNS}
        "#
    ))
    .bind(entry_id)
    .bind(agent_id)
    .fetch_optional(&mut *tx)
    .await?;

    let Some(row) = row else {
        tx.rollback().await?;
        return Ok(None);
    };

    free_agent(&mut tx, agent_id).await?;
    tx.commit().await?;

    Ok(Some(row.into()))
}

// =============================================================================
// Transaction Helpers
// =============================================================================

/// Whether the agent owns any claimed or executing entry
pub(crate) async fn holds_work(conn: &mut PgConnection, agent_id: Uuid) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar(
        r#"
        SELECT EXISTS (
            SELECT 1 FROM run_queue
            WHERE agent_id = $1 AND state IN ('claimed', 'executing')
        )
        "#,
    )
    .bind(agent_id)
    .fetch_one(conn)
    .await
}

/// Release every entry held by the given agents
pub(crate) async fn release_held_by(
    conn: &mut PgConnection,
    agent_ids: &[Uuid],
) -> Result<Vec<RunQueueEntry>, sqlx::Error> {
    if agent_ids.is_empty() {
        return Ok(Vec::new());
    }

    let rows = sqlx::query_as::<_, RunRow>(&format!(
        r#"
        UPDATE run_queue
        SET state = 'unclaimed', agent_id = NULL, claimed_at = NULL, started_at = NULL
        WHERE agent_id = ANY($1) AND state IN ('claimed', 'executing')
        RETURNING {RUN_COLUMNS}
        "#
    ))
    .bind(agent_ids)
    .fetch_all(conn)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

/// Idle unless the agent still owns another entry or has left the
/// idle/busy cycle
async fn free_agent(conn: &mut PgConnection, agent_id: Uuid) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE agents
        SET status = $2
        WHERE id = $1 AND status = $3
          AND NOT EXISTS (
              SELECT 1 FROM run_queue
              WHERE agent_id = $1 AND state IN ('claimed', 'executing')
          )
        "#,
    )
    .bind(agent_id)
    .bind(AgentStatus::Idle.as_str())
    .bind(AgentStatus::Busy.as_str())
    .execute(conn)
    .await?;

    Ok(())
}

fn qualified_columns(table: &str) -> String {
    RUN_COLUMNS
        .split(',')
        .map(|column| format!("{}.{}", table, column.trim()))
        .collect::<Vec<_>>()
        .join(", ")
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct RunRow {
    id: Uuid,
    run_id: Uuid,
    workspace_id: Uuid,
    operation: String,
    state: String,
    agent_id: Option<Uuid>,
    attempt: i32,
    queued_at: DateTime<Utc>,
    claimed_at: Option<DateTime<Utc>>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    failure_message: Option<String>,
}

impl From<RunRow> for RunQueueEntry {
    fn from(row: RunRow) -> Self {
        RunQueueEntry {
            id: row.id,
            run_id: row.run_id,
            workspace_id: row.workspace_id,
            operation: RunOperation::parse(&row.operation).unwrap_or(RunOperation::Plan),
            state: RunState::parse(&row.state).unwrap_or(RunState::Unclaimed),
            agent_id: row.agent_id,
            attempt: row.attempt,
            queued_at: row.queued_at,
            claimed_at: row.claimed_at,
            started_at: row.started_at,
            finished_at: row.finished_at,
            failure_message: row.failure_message,
        }
    }
}
