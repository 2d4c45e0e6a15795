//! Agent Pool API Handlers
//!
//! Pool CRUD, scope associations and registration tokens.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use chrono::Utc;
use serde::Deserialize;
use terrarun_core::domain::pool::{AgentPool, AgentToken, PoolScope};
use terrarun_core::dto::pool::{
    CreateAgentPool, CreateAgentToken, CreatedAgentToken, UpdateAgentPool,
};
use uuid::Uuid;

use crate::api::AppState;
use crate::api::error::ApiResult;
use crate::service::{pool_service, registry_service};

#[derive(Debug, Deserialize)]
pub struct OrganisationQuery {
    #[serde(default)]
    pub organisation: Option<String>,
}

// =============================================================================
// Pools
// =============================================================================

/// POST /api/pools
pub async fn create_pool(
    State(state): State<AppState>,
    Json(req): Json<CreateAgentPool>,
) -> ApiResult<(StatusCode, Json<AgentPool>)> {
    tracing::info!("Creating pool: {} in {}", req.name, req.organisation);

    let pool = pool_service::create_pool(state.repo.as_ref(), req).await?;

    Ok((StatusCode::CREATED, Json(pool)))
}

/// GET /api/pools
/// List pools, optionally of one organisation
pub async fn list_pools(
    State(state): State<AppState>,
    Query(query): Query<OrganisationQuery>,
) -> ApiResult<Json<Vec<AgentPool>>> {
    let pools = pool_service::list_pools(state.repo.as_ref(), query.organisation.as_deref()).await?;

    Ok(Json(pools))
}

/// GET /api/pools/{id}
pub async fn get_pool(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<AgentPool>> {
    let pool = pool_service::get_pool(state.repo.as_ref(), id).await?;

    Ok(Json(pool))
}

/// PATCH /api/pools/{id}
pub async fn update_pool(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(update): Json<UpdateAgentPool>,
) -> ApiResult<Json<AgentPool>> {
    tracing::info!("Updating pool: {}", id);

    let pool = pool_service::update_pool(state.repo.as_ref(), id, update).await?;

    Ok(Json(pool))
}

/// DELETE /api/pools/{id}
/// Delete a pool with its agents, tokens and associations
pub async fn delete_pool(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    tracing::info!("Deleting pool: {}", id);

    pool_service::delete_pool(state.repo.as_ref(), id).await?;

    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// Scope Associations
// =============================================================================

/// GET /api/pools/{id}/scopes
pub async fn list_scopes(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<PoolScope>>> {
    let scopes = pool_service::list_scopes(state.repo.as_ref(), id).await?;

    Ok(Json(scopes))
}

/// POST /api/pools/{id}/scopes
/// Body: `{"kind": "workspace" | "project" | "environment", "id": "<uuid>"}`
pub async fn add_scope(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(scope): Json<PoolScope>,
) -> ApiResult<StatusCode> {
    pool_service::add_scope(state.repo.as_ref(), id, scope).await?;

    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /api/pools/{id}/scopes
pub async fn remove_scope(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(scope): Json<PoolScope>,
) -> ApiResult<StatusCode> {
    pool_service::remove_scope(state.repo.as_ref(), id, scope).await?;

    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// Tokens
// =============================================================================

/// POST /api/pools/{id}/tokens
/// Mint a registration token. The secret is only ever returned here.
pub async fn create_token(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<CreateAgentToken>,
) -> ApiResult<(StatusCode, Json<CreatedAgentToken>)> {
    let created = registry_service::create_token(state.repo.as_ref(), id, req).await?;

    Ok((StatusCode::CREATED, Json(created)))
}

/// GET /api/pools/{id}/tokens
pub async fn list_tokens(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<AgentToken>>> {
    let tokens = registry_service::list_tokens(state.repo.as_ref(), id).await?;

    Ok(Json(tokens))
}

/// DELETE /api/tokens/{id}
pub async fn revoke_token(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<AgentToken>> {
    tracing::info!("Revoking token: {}", id);

    let token = registry_service::revoke_token(state.repo.as_ref(), id, Utc::now()).await?;

    Ok(Json(token))
}
