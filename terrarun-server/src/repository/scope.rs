//! Scope Repository
//!
//! PostgreSQL operations for the synced workspace, project and environment
//! records.

use sqlx::PgPool;
use terrarun_core::domain::scope::{Environment, Project, Workspace};
use uuid::Uuid;

/// Insert or replace a workspace
pub async fn upsert_workspace(pool: &PgPool, workspace: &Workspace) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO workspaces (id, organisation, name, project_id, environment_id)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (id) DO UPDATE SET
            organisation = EXCLUDED.organisation,
            name = EXCLUDED.name,
            project_id = EXCLUDED.project_id,
            environment_id = EXCLUDED.environment_id
        "#,
    )
    .bind(workspace.id)
    .bind(&workspace.organisation)
    .bind(&workspace.name)
    .bind(workspace.project_id)
    .bind(workspace.environment_id)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn find_workspace(pool: &PgPool, id: Uuid) -> Result<Option<Workspace>, sqlx::Error> {
    let row = sqlx::query_as::<_, WorkspaceRow>(
        r#"
        SELECT id, organisation, name, project_id, environment_id
        FROM workspaces
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| r.into()))
}

/// List workspaces, optionally restricted to one organisation
pub async fn list_workspaces(
    pool: &PgPool,
    organisation: Option<&str>,
) -> Result<Vec<Workspace>, sqlx::Error> {
    let rows = sqlx::query_as::<_, WorkspaceRow>(
        r#"
        SELECT id, organisation, name, project_id, environment_id
        FROM workspaces
        WHERE $1::TEXT IS NULL OR organisation = $1
        ORDER BY organisation, name
        "#,
    )
    .bind(organisation)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

pub async fn upsert_project(pool: &PgPool, project: &Project) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO projects (id, organisation, name)
        VALUES ($1, $2, $3)
        ON CONFLICT (id) DO UPDATE SET
            organisation = EXCLUDED.organisation,
            name = EXCLUDED.name
        "#,
    )
    .bind(project.id)
    .bind(&project.organisation)
    .bind(&project.name)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn find_project(pool: &PgPool, id: Uuid) -> Result<Option<Project>, sqlx::Error> {
    let row = sqlx::query_as::<_, NamedRow>(
        "SELECT id, organisation, name FROM projects WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| Project {
        id: r.id,
        organisation: r.organisation,
        name: r.name,
    }))
}

pub async fn upsert_environment(
    pool: &PgPool,
    environment: &Environment,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO environments (id, organisation, name)
        VALUES ($1, $2, $3)
        ON CONFLICT (id) DO UPDATE SET
            organisation = EXCLUDED.organisation,
            name = EXCLUDED.name
        "#,
    )
    .bind(environment.id)
    .bind(&environment.organisation)
    .bind(&environment.name)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn find_environment(
    pool: &PgPool,
    id: Uuid,
) -> Result<Option<Environment>, sqlx::Error> {
    let row = sqlx::query_as::<_, NamedRow>(
        "SELECT id, organisation, name FROM environments WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| Environment {
        id: r.id,
        organisation: r.organisation,
        name: r.name,
    }))
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct WorkspaceRow {
    id: Uuid,
    organisation: String,
    name: String,
    project_id: Option<Uuid>,
    environment_id: Option<Uuid>,
}

impl From<WorkspaceRow> for Workspace {
    fn from(row: WorkspaceRow) -> Self {
        Workspace {
            id: row.id,
            organisation: row.organisation,
            name: row.name,
            project_id: row.project_id,
            environment_id: row.environment_id,
        }
    }
}

#[derive(sqlx::FromRow)]
struct NamedRow {
    id: Uuid,
    organisation: String,
    name: String,
}
