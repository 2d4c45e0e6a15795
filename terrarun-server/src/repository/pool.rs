//! Pool Repository
//!
//! PostgreSQL operations for agent pools, their scope associations and
//! registration tokens.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use terrarun_core::domain::pool::{AgentPool, AgentToken, PoolScope};
use terrarun_core::domain::scope::Workspace;
use terrarun_core::dto::pool::UpdateAgentPool;
use uuid::Uuid;

use crate::repository::run;

/// Insert a new pool. Duplicate names within an organisation surface as a
/// unique violation on `agent_pools_organisation_name_key`.
pub async fn insert(pool: &PgPool, agent_pool: &AgentPool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO agent_pools (id, organisation, name, allow_all_workspaces, created_at)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(agent_pool.id)
    .bind(&agent_pool.organisation)
    .bind(&agent_pool.name)
    .bind(agent_pool.allow_all_workspaces)
    .bind(agent_pool.created_at)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<AgentPool>, sqlx::Error> {
    let row = sqlx::query_as::<_, PoolRow>(
        r#"
        SELECT id, organisation, name, allow_all_workspaces, created_at
        FROM agent_pools
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| r.into()))
}

pub async fn list(pool: &PgPool, organisation: Option<&str>) -> Result<Vec<AgentPool>, sqlx::Error> {
    let rows = sqlx::query_as::<_, PoolRow>(
        r#"
        SELECT id, organisation, name, allow_all_workspaces, created_at
        FROM agent_pools
        WHERE $1::TEXT IS NULL OR organisation = $1
        ORDER BY organisation, name
        "#,
    )
    .bind(organisation)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

/// Apply an update command; absent fields keep their value
pub async fn update(
    pool: &PgPool,
    id: Uuid,
    update: &UpdateAgentPool,
) -> Result<Option<AgentPool>, sqlx::Error> {
    let row = sqlx::query_as::<_, PoolRow>(
        r#"
        UPDATE agent_pools
        SET name = COALESCE($2, name),
            allow_all_workspaces = COALESCE($3, allow_all_workspaces)
        WHERE id = $1
        RETURNING id, organisation, name, allow_all_workspaces, created_at
        "#,
    )
    .bind(id)
    .bind(update.name.as_deref())
    .bind(update.allow_all_workspaces)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| r.into()))
}

/// Delete a pool. Agents, tokens and associations go with it through
/// `ON DELETE CASCADE`; entries held by its agents are released beforehand
/// in the same transaction.
pub async fn delete(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let agent_ids: Vec<Uuid> =
        sqlx::query_scalar("SELECT id FROM agents WHERE pool_id = $1 ORDER BY id FOR UPDATE")
            .bind(id)
            .fetch_all(&mut *tx)
            .await?;

    run::release_held_by(&mut tx, &agent_ids).await?;

    let result = sqlx::query("DELETE FROM agent_pools WHERE id = $1")
        .bind(id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    Ok(result.rows_affected() > 0)
}

// =============================================================================
// Scope Associations
// =============================================================================

pub async fn add_scope(pool: &PgPool, pool_id: Uuid, scope: PoolScope) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO agent_pool_scopes (pool_id, kind, target_id)
        VALUES ($1, $2, $3)
        ON CONFLICT DO NOTHING
        "#,
    )
    .bind(pool_id)
    .bind(scope.kind())
    .bind(scope.target_id())
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn remove_scope(
    pool: &PgPool,
    pool_id: Uuid,
    scope: PoolScope,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "DELETE FROM agent_pool_scopes WHERE pool_id = $1 AND kind = $2 AND target_id = $3",
    )
    .bind(pool_id)
    .bind(scope.kind())
    .bind(scope.target_id())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn list_scopes(pool: &PgPool, pool_id: Uuid) -> Result<Vec<PoolScope>, sqlx::Error> {
    let rows: Vec<(String, Uuid)> = sqlx::query_as(
        r#"
        SELECT kind, target_id
        FROM agent_pool_scopes
        WHERE pool_id = $1
        ORDER BY kind, target_id
        "#,
    )
    .bind(pool_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .filter_map(|(kind, id)| PoolScope::from_parts(&kind, id))
        .collect())
}

/// Pools of the workspace's organisation that either allow all workspaces
/// or are explicitly associated to the workspace, its project or its
/// environment.
pub async fn eligible_for(pool: &PgPool, workspace: &Workspace) -> Result<Vec<AgentPool>, sqlx::Error> {
    let rows = sqlx::query_as::<_, PoolRow>(
        r#"
        SELECT p.id, p.organisation, p.name, p.allow_all_workspaces, p.created_at
        FROM agent_pools p
        WHERE p.organisation = $2
          AND (   p.allow_all_workspaces
               OR EXISTS (
                    SELECT 1
                    FROM agent_pool_scopes s
                    WHERE s.pool_id = p.id
                      AND (   (s.kind = 'workspace' AND s.target_id = $1)
                           OR (s.kind = 'project' AND s.target_id = $3)
                           OR (s.kind = 'environment' AND s.target_id = $4))
               ))
        ORDER BY p.organisation, p.name
        "#,
    )
    .bind(workspace.id)
    .bind(&workspace.organisation)
    .bind(workspace.project_id)
    .bind(workspace.environment_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

// =============================================================================
// Tokens
// =============================================================================

pub async fn insert_token(
    pool: &PgPool,
    token: &AgentToken,
    secret_hash: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO agent_tokens (id, pool_id, description, token_hash, created_at)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(token.id)
    .bind(token.pool_id)
    .bind(&token.description)
    .bind(secret_hash)
    .bind(token.created_at)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn list_tokens(pool: &PgPool, pool_id: Uuid) -> Result<Vec<AgentToken>, sqlx::Error> {
    let rows = sqlx::query_as::<_, TokenRow>(
        r#"
        SELECT id, pool_id, description, created_at, last_used_at, revoked_at
        FROM agent_tokens
        WHERE pool_id = $1
        ORDER BY created_at
        "#,
    )
    .bind(pool_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

pub async fn revoke_token(
    pool: &PgPool,
    id: Uuid,
    at: DateTime<Utc>,
) -> Result<Option<AgentToken>, sqlx::Error> {
    let row = sqlx::query_as::<_, TokenRow>(
        r#"
        UPDATE agent_tokens
        SET revoked_at = COALESCE(revoked_at, $2)
        WHERE id = $1
        RETURNING id, pool_id, description, created_at, last_used_at, revoked_at
        "#,
    )
    .bind(id)
    .bind(at)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| r.into()))
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct PoolRow {
    id: Uuid,
    organisation: String,
    name: String,
    allow_all_workspaces: bool,
    created_at: DateTime<Utc>,
}

impl From<PoolRow> for AgentPool {
    fn from(row: PoolRow) -> Self {
        AgentPool {
            id: row.id,
            organisation: row.organisation,
            name: row.name,
            allow_all_workspaces: row.allow_all_workspaces,
            created_at: row.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct TokenRow {
    id: Uuid,
    pool_id: Uuid,
    description: String,
    created_at: DateTime<Utc>,
    last_used_at: Option<DateTime<Utc>>,
    revoked_at: Option<DateTime<Utc>>,
}

impl From<TokenRow> for AgentToken {
    fn from(row: TokenRow) -> Self {
        AgentToken {
            id: row.id,
            pool_id: row.pool_id,
            description: row.description,
            created_at: row.created_at,
            last_used_at: row.last_used_at,
            revoked_at: row.revoked_at,
        }
    }
}
