//! Scope Sync API Handlers
//!
//! The organisation registry pushes workspaces, projects and environments
//! here. Also exposes workspace eligibility.

use axum::{
    Json,
    extract::{Path, Query, State},
};
use terrarun_core::domain::pool::AgentPool;
use terrarun_core::domain::scope::{Environment, Project, Workspace};
use terrarun_core::dto::scope::{SyncScopeEntity, SyncWorkspace};
use uuid::Uuid;

use crate::api::AppState;
use crate::api::error::ApiResult;
use crate::api::pool::OrganisationQuery;
use crate::service::{pool_service, scope_service};

/// PUT /api/workspaces/{id}
pub async fn sync_workspace(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<SyncWorkspace>,
) -> ApiResult<Json<Workspace>> {
    let workspace = scope_service::sync_workspace(state.repo.as_ref(), id, req).await?;

    Ok(Json(workspace))
}

/// GET /api/workspaces/{id}
pub async fn get_workspace(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Workspace>> {
    Ok(Json(scope_service::get_workspace(state.repo.as_ref(), id).await?))
}

/// GET /api/workspaces
pub async fn list_workspaces(
    State(state): State<AppState>,
    Query(query): Query<OrganisationQuery>,
) -> ApiResult<Json<Vec<Workspace>>> {
    let workspaces =
        scope_service::list_workspaces(state.repo.as_ref(), query.organisation.as_deref()).await?;

    Ok(Json(workspaces))
}

/// GET /api/workspaces/{id}/pools
/// Pools whose agents may run this workspace's plans and applies
pub async fn eligible_pools(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<AgentPool>>> {
    let pools = pool_service::resolve_eligible_pools(state.repo.as_ref(), id).await?;

    Ok(Json(pools))
}

/// PUT /api/projects/{id}
pub async fn sync_project(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<SyncScopeEntity>,
) -> ApiResult<Json<Project>> {
    Ok(Json(scope_service::sync_project(state.repo.as_ref(), id, req).await?))
}

/// GET /api/projects/{id}
pub async fn get_project(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Project>> {
    Ok(Json(scope_service::get_project(state.repo.as_ref(), id).await?))
}

/// PUT /api/environments/{id}
pub async fn sync_environment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<SyncScopeEntity>,
) -> ApiResult<Json<Environment>> {
    Ok(Json(
        scope_service::sync_environment(state.repo.as_ref(), id, req).await?,
    ))
}

/// GET /api/environments/{id}
pub async fn get_environment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Environment>> {
    Ok(Json(
        scope_service::get_environment(state.repo.as_ref(), id).await?,
    ))
}
