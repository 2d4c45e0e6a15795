//! Agent Pool Service
//!
//! Pool CRUD, scope associations and eligibility resolution.

use chrono::Utc;
use terrarun_core::domain::pool::{AgentPool, PoolScope};
use terrarun_core::dto::pool::{CreateAgentPool, UpdateAgentPool};
use thiserror::Error;
use uuid::Uuid;

use crate::repository::{Repository, RepositoryError};

/// Service error type
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("Pool {0} not found")]
    NotFound(Uuid),

    #[error("Workspace {0} not found")]
    WorkspaceNotFound(Uuid),

    #[error("Pool {0} is not associated with that scope")]
    ScopeNotAssociated(Uuid),

    #[error("Organisation {organisation} already has a pool named '{name}'")]
    NameTaken { organisation: String, name: String },

    #[error("{0}")]
    ValidationError(String),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

pub type Result<T> = std::result::Result<T, PoolError>;

/// Create a new pool in an organisation
pub async fn create_pool(repo: &dyn Repository, req: CreateAgentPool) -> Result<AgentPool> {
    if req.organisation.trim().is_empty() {
        return Err(PoolError::ValidationError(
            "Organisation cannot be empty".to_string(),
        ));
    }
    validate_pool_name(&req.name)?;

    let pool = AgentPool {
        id: Uuid::new_v4(),
        organisation: req.organisation,
        name: req.name,
        allow_all_workspaces: req.allow_all_workspaces,
        created_at: Utc::now(),
    };

    repo.insert_pool(&pool)
        .await
        .map_err(|e| name_taken(e, &pool.organisation, &pool.name))?;

    tracing::info!(
        "Pool created: {} ({}) in {}",
        pool.name,
        pool.id,
        pool.organisation
    );

    Ok(pool)
}

pub async fn get_pool(repo: &dyn Repository, id: Uuid) -> Result<AgentPool> {
    repo.find_pool(id).await?.ok_or(PoolError::NotFound(id))
}

pub async fn list_pools(repo: &dyn Repository, organisation: Option<&str>) -> Result<Vec<AgentPool>> {
    Ok(repo.list_pools(organisation).await?)
}

/// Apply an update command to a pool
pub async fn update_pool(
    repo: &dyn Repository,
    id: Uuid,
    update: UpdateAgentPool,
) -> Result<AgentPool> {
    if update.is_empty() {
        return Err(PoolError::ValidationError(
            "Update does not change any field".to_string(),
        ));
    }

    if let Some(name) = &update.name {
        validate_pool_name(name)?;
    }

    let current = get_pool(repo, id).await?;

    let pool = repo
        .update_pool(id, &update)
        .await
        .map_err(|e| {
            name_taken(
                e,
                &current.organisation,
                update.name.as_deref().unwrap_or(&current.name),
            )
        })?
        .ok_or(PoolError::NotFound(id))?;

    tracing::info!("Pool updated: {} ({})", pool.name, pool.id);

    Ok(pool)
}

/// Delete a pool together with its agents, tokens and associations
pub async fn delete_pool(repo: &dyn Repository, id: Uuid) -> Result<()> {
    if !repo.delete_pool(id).await? {
        return Err(PoolError::NotFound(id));
    }

    tracing::info!("Pool deleted: {}", id);

    Ok(())
}

// =============================================================================
// Scope Associations
// =============================================================================

/// Associate a pool with a workspace, project or environment
///
/// The target must exist and belong to the pool's organisation. Adding an
/// association twice is a no-op.
pub async fn add_scope(repo: &dyn Repository, pool_id: Uuid, scope: PoolScope) -> Result<()> {
    let pool = get_pool(repo, pool_id).await?;

    let organisation = match scope {
        PoolScope::Workspace(id) => repo.find_workspace(id).await?.map(|w| w.organisation),
        PoolScope::Project(id) => repo.find_project(id).await?.map(|p| p.organisation),
        PoolScope::Environment(id) => repo.find_environment(id).await?.map(|e| e.organisation),
    };

    let Some(organisation) = organisation else {
        return Err(PoolError::ValidationError(format!(
            "{} {} does not exist",
            scope.kind(),
            scope.target_id()
        )));
    };

    if organisation != pool.organisation {
        return Err(PoolError::ValidationError(format!(
            "{} {} belongs to organisation '{}', not '{}'",
            scope.kind(),
            scope.target_id(),
            organisation,
            pool.organisation
        )));
    }

    repo.add_pool_scope(pool_id, scope).await?;

    tracing::info!(
        "Pool {} associated with {} {}",
        pool_id,
        scope.kind(),
        scope.target_id()
    );

    Ok(())
}

pub async fn remove_scope(repo: &dyn Repository, pool_id: Uuid, scope: PoolScope) -> Result<()> {
    get_pool(repo, pool_id).await?;

    if !repo.remove_pool_scope(pool_id, scope).await? {
        return Err(PoolError::ScopeNotAssociated(pool_id));
    }

    tracing::info!(
        "Pool {} no longer associated with {} {}",
        pool_id,
        scope.kind(),
        scope.target_id()
    );

    Ok(())
}

pub async fn list_scopes(repo: &dyn Repository, pool_id: Uuid) -> Result<Vec<PoolScope>> {
    get_pool(repo, pool_id).await?;
    Ok(repo.list_pool_scopes(pool_id).await?)
}

/// Pools whose agents may execute runs of the workspace
///
/// Allow-all pools of the workspace's organisation, unioned with pools
/// explicitly associated with the workspace, its project or its environment.
pub async fn resolve_eligible_pools(
    repo: &dyn Repository,
    workspace_id: Uuid,
) -> Result<Vec<AgentPool>> {
    let workspace = repo
        .find_workspace(workspace_id)
        .await?
        .ok_or(PoolError::WorkspaceNotFound(workspace_id))?;

    Ok(repo.eligible_pools(&workspace).await?)
}

// =============================================================================
// Validation
// =============================================================================

fn validate_pool_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(PoolError::ValidationError(
            "Pool name cannot be empty".to_string(),
        ));
    }

    if name.len() > 255 {
        return Err(PoolError::ValidationError(
            "Pool name is too long (max 255 characters)".to_string(),
        ));
    }

    Ok(())
}

fn name_taken(err: RepositoryError, organisation: &str, name: &str) -> PoolError {
    match err {
        RepositoryError::Conflict(_) => PoolError::NameTaken {
            organisation: organisation.to_string(),
            name: name.to_string(),
        },
        other => PoolError::Repository(other),
    }
}
