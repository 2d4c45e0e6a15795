use sqlx::{PgPool, postgres::PgPoolOptions};
use std::time::Duration;

pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
}

/// Create tables and indexes if they do not exist yet
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    // Scope entities synced from the organisation registry
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS workspaces (
            id UUID PRIMARY KEY,
            organisation VARCHAR(255) NOT NULL,
            name VARCHAR(255) NOT NULL,
            project_id UUID,
            environment_id UUID
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS projects (
            id UUID PRIMARY KEY,
            organisation VARCHAR(255) NOT NULL,
            name VARCHAR(255) NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS environments (
            id UUID PRIMARY KEY,
            organisation VARCHAR(255) NOT NULL,
            name VARCHAR(255) NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Agent pools
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS agent_pools (
            id UUID PRIMARY KEY,
            organisation VARCHAR(255) NOT NULL,
            name VARCHAR(255) NOT NULL,
            allow_all_workspaces BOOLEAN NOT NULL DEFAULT FALSE,
            created_at TIMESTAMPTZ NOT NULL,
            UNIQUE (organisation, name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS agent_pool_scopes (
            pool_id UUID NOT NULL REFERENCES agent_pools(id) ON DELETE CASCADE,
            kind VARCHAR(20) NOT NULL,
            target_id UUID NOT NULL,
            PRIMARY KEY (pool_id, kind, target_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS agent_tokens (
            id UUID PRIMARY KEY,
            pool_id UUID NOT NULL REFERENCES agent_pools(id) ON DELETE CASCADE,
            description TEXT NOT NULL DEFAULT '',
            token_hash CHAR(64) NOT NULL UNIQUE,
            created_at TIMESTAMPTZ NOT NULL,
            last_used_at TIMESTAMPTZ,
            revoked_at TIMESTAMPTZ
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Agents
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS agents (
            id UUID PRIMARY KEY,
            pool_id UUID NOT NULL REFERENCES agent_pools(id) ON DELETE CASCADE,
            name VARCHAR(255) NOT NULL,
            status VARCHAR(20) NOT NULL,
            session_hash CHAR(64) NOT NULL,
            created_at TIMESTAMPTZ NOT NULL,
            last_ping_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Run queue
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS run_queue (
            id UUID PRIMARY KEY,
            run_id UUID NOT NULL,
            workspace_id UUID NOT NULL REFERENCES workspaces(id) ON DELETE CASCADE,
            operation VARCHAR(20) NOT NULL,
            state VARCHAR(20) NOT NULL,
            agent_id UUID REFERENCES agents(id) ON DELETE SET NULL,
            attempt INTEGER NOT NULL DEFAULT 0,
            queued_at TIMESTAMPTZ NOT NULL,
            claimed_at TIMESTAMPTZ,
            started_at TIMESTAMPTZ,
            finished_at TIMESTAMPTZ,
            failure_message TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes for the claim and sweep paths
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_run_queue_state ON run_queue(state, queued_at)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_run_queue_agent_id ON run_queue(agent_id)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_agents_pool_id ON agents(pool_id)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_agents_last_ping ON agents(last_ping_at)")
        .execute(pool)
        .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_agent_pool_scopes_target ON agent_pool_scopes(kind, target_id)",
    )
    .execute(pool)
    .await?;

    tracing::info!("Database migrations completed successfully");
    Ok(())
}
