//! Agent Repository
//!
//! Handles all database operations related to agents: registration against a
//! pool token, heartbeats, and the staleness sweep.

use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};
use terrarun_core::domain::agent::{Agent, AgentStatus};
use uuid::Uuid;

use crate::repository::{SweepReport, run};

const AGENT_COLUMNS: &str = "id, pool_id, name, status, created_at, last_ping_at";

/// Validate a pool token and create an idle agent in the token's pool.
///
/// The token lookup and its `last_used_at` refresh are one guarded update,
/// so a token revoked concurrently either wins entirely or not at all.
pub async fn register(
    pool: &PgPool,
    token_hash: &str,
    name: &str,
    session_hash: &str,
    at: DateTime<Utc>,
) -> Result<Option<Agent>, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let pool_id: Option<Uuid> = sqlx::query_scalar(
        r#"
        UPDATE agent_tokens
        SET last_used_at = $2
        WHERE token_hash = $1 AND revoked_at IS NULL
        RETURNING pool_id
        "#,
    )
    .bind(token_hash)
    .bind(at)
    .fetch_optional(&mut *tx)
    .await?;

    let Some(pool_id) = pool_id else {
        tx.rollback().await?;
        return Ok(None);
    };

    let agent = Agent {
        id: Uuid::new_v4(),
        pool_id,
        name: name.to_string(),
        status: AgentStatus::Idle,
        created_at: at,
        last_ping_at: at,
    };

    sqlx::query(
        r#"
        INSERT INTO agents (id, pool_id, name, status, session_hash, created_at, last_ping_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(agent.id)
    .bind(agent.pool_id)
    .bind(&agent.name)
    .bind(agent.status.as_str())
    .bind(session_hash)
    .bind(agent.created_at)
    .bind(agent.last_ping_at)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(Some(agent))
}

pub async fn authenticate(
    pool: &PgPool,
    id: Uuid,
    session_hash: &str,
) -> Result<Option<Agent>, sqlx::Error> {
    let row = sqlx::query_as::<_, AgentRow>(&format!(
        "SELECT {AGENT_COLUMNS} FROM agents WHERE id = $1 AND session_hash = $2"
    ))
    .bind(id)
    .bind(session_hash)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| r.into()))
}

pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Agent>, sqlx::Error> {
    let row = sqlx::query_as::<_, AgentRow>(&format!(
        "SELECT {AGENT_COLUMNS} FROM agents WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| r.into()))
}

/// List agents, optionally restricted to one pool
pub async fn list(pool: &PgPool, pool_id: Option<Uuid>) -> Result<Vec<Agent>, sqlx::Error> {
    let rows = sqlx::query_as::<_, AgentRow>(&format!(
        r#"
        SELECT {AGENT_COLUMNS}
        FROM agents
        WHERE $1::UUID IS NULL OR pool_id = $1
        ORDER BY created_at DESC
        "#
    ))
    .bind(pool_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

/// Record a heartbeat.
///
/// The agent row is locked first so the heartbeat serializes with claims and
/// with the staleness sweep; whichever commits last decides the status.
pub async fn record_heartbeat(
    pool: &PgPool,
    id: Uuid,
    reported: AgentStatus,
    at: DateTime<Utc>,
) -> Result<Option<Agent>, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let exists: Option<Uuid> = sqlx::query_scalar("SELECT id FROM agents WHERE id = $1 FOR UPDATE")
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

    if exists.is_none() {
        tx.rollback().await?;
        return Ok(None);
    }

    let holds_work = run::holds_work(&mut tx, id).await?;
    let status = AgentStatus::from_report(reported, holds_work);

    if status.abandons_work() && holds_work {
        run::release_held_by(&mut tx, &[id]).await?;
    }

    let row = sqlx::query_as::<_, AgentRow>(&format!(
        r#"
        UPDATE agents
        SET status = $2, last_ping_at = GREATEST(last_ping_at, $3)
        WHERE id = $1
        RETURNING {AGENT_COLUMNS}
        "#
    ))
    .bind(id)
    .bind(status.as_str())
    .bind(at)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(Some(row.into()))
}

/// Release held entries, then delete the agent
pub async fn delete(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
    let mut tx = pool.begin().await?;

    // A claim committing after the release would leave an ownerless entry
    let locked = lock(&mut tx, &[id]).await?;
    run::release_held_by(&mut tx, &locked).await?;

    let result = sqlx::query("DELETE FROM agents WHERE id = $1")
        .bind(id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    Ok(result.rows_affected() > 0)
}

/// Mark agents whose last ping predates `cutoff` as unknown and release
/// their entries.
///
/// The status guard makes the transition happen once per lapse: an agent
/// already `unknown` is not selected again until a heartbeat revives it.
pub async fn mark_stale(pool: &PgPool, cutoff: DateTime<Utc>) -> Result<SweepReport, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let lapsed: Vec<Uuid> = sqlx::query_scalar(
        r#"
        SELECT id FROM agents
        WHERE last_ping_at < $1 AND status NOT IN ($2, $3)
        ORDER BY id
        FOR UPDATE
        "#,
    )
    .bind(cutoff)
    .bind(AgentStatus::Unknown.as_str())
    .bind(AgentStatus::Exited.as_str())
    .fetch_all(&mut *tx)
    .await?;

    // Re-checked under the lock: a heartbeat may have landed in between
    let rows = sqlx::query_as::<_, AgentRow>(&format!(
        r#"
        UPDATE agents
        SET status = $3
        WHERE id = ANY($1) AND last_ping_at < $2 AND status NOT IN ($3, $4)
        RETURNING {AGENT_COLUMNS}
        "#
    ))
    .bind(&lapsed)
    .bind(cutoff)
    .bind(AgentStatus::Unknown.as_str())
    .bind(AgentStatus::Exited.as_str())
    .fetch_all(&mut *tx)
    .await?;

    let agents: Vec<Agent> = rows.into_iter().map(|r| r.into()).collect();
    let ids: Vec<Uuid> = agents.iter().map(|a| a.id).collect();
    let released = run::release_held_by(&mut tx, &ids).await?;

    tx.commit().await?;

    Ok(SweepReport { agents, released })
}

/// Lock agent rows inside an open transaction, returning the ids that exist.
///
/// Every transaction touching both agents and run_queue takes the agent
/// locks first, in id order.
pub(crate) async fn lock(conn: &mut PgConnection, ids: &[Uuid]) -> Result<Vec<Uuid>, sqlx::Error> {
    sqlx::query_scalar("SELECT id FROM agents WHERE id = ANY($1) ORDER BY id FOR UPDATE")
        .bind(ids)
        .fetch_all(conn)
        .await
}

/// Set an agent's status inside an open transaction
pub(crate) async fn set_status(
    conn: &mut PgConnection,
    id: Uuid,
    status: AgentStatus,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE agents SET status = $2 WHERE id = $1")
        .bind(id)
        .bind(status.as_str())
        .execute(conn)
        .await?;

    Ok(())
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct AgentRow {
    id: Uuid,
    pool_id: Uuid,
    name: String,
    status: String,
    created_at: DateTime<Utc>,
    last_ping_at: DateTime<Utc>,
}

impl From<AgentRow> for Agent {
    fn from(row: AgentRow) -> Self {
        // Default to unknown for unrecognised status values
        let status = AgentStatus::parse(&row.status).unwrap_or(AgentStatus::Unknown);

        Agent {
            id: row.id,
            pool_id: row.pool_id,
            name: row.name,
            status,
            created_at: row.created_at,
            last_ping_at: row.last_ping_at,
        }
    }
}
