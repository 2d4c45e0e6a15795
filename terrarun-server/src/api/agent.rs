//! Agent API Handlers
//!
//! Endpoints used by agent processes (registration, heartbeat, claim and run
//! reports) and operator queries over registered agents.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use chrono::Utc;
use serde::Deserialize;
use std::time::Duration;
use terrarun_core::domain::agent::Agent;
use terrarun_core::domain::run::RunQueueEntry;
use terrarun_core::dto::agent::{ClaimResponse, FailRun, Heartbeat, RegisterAgent, RegisteredAgent};
use uuid::Uuid;

use crate::api::AppState;
use crate::api::auth::{BearerToken, authenticate_agent};
use crate::api::error::ApiResult;
use crate::service::{dispatch_service, registry_service};

// =============================================================================
// Agent Channel
// =============================================================================

/// POST /api/agents/register
/// Register an agent with a pool token
pub async fn register_agent(
    State(state): State<AppState>,
    BearerToken(pool_token): BearerToken,
    Json(req): Json<RegisterAgent>,
) -> ApiResult<(StatusCode, Json<RegisteredAgent>)> {
    tracing::info!("Registering agent: {}", req.name);

    let registered =
        registry_service::register(state.repo.as_ref(), &pool_token, &req.name, Utc::now()).await?;

    Ok((StatusCode::CREATED, Json(registered)))
}

/// POST /api/agents/{id}/heartbeat
/// Report agent status and refresh its liveness
pub async fn heartbeat(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    token: BearerToken,
    Json(req): Json<Heartbeat>,
) -> ApiResult<StatusCode> {
    authenticate_agent(&state, id, &token).await?;

    tracing::debug!(
        "Heartbeat from agent {}: {} (agent clock {})",
        id,
        req.status,
        req.timestamp
    );

    // last_ping_at is stamped with the server clock, never the agent's
    registry_service::heartbeat(state.repo.as_ref(), id, req.status, Utc::now()).await?;

    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct ClaimParams {
    /// Seconds to wait for work, capped by the server
    #[serde(default)]
    pub wait: Option<u64>,
}

/// POST /api/agents/{id}/claim
/// Claim the next eligible run, optionally waiting for one
pub async fn claim(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(params): Query<ClaimParams>,
    token: BearerToken,
) -> ApiResult<Json<ClaimResponse>> {
    authenticate_agent(&state, id, &token).await?;

    let wait = Duration::from_secs(params.wait.unwrap_or(0)).min(state.config.claim_max_wait);
    let run = dispatch_service::claim(state.repo.as_ref(), id, wait).await?;

    Ok(Json(ClaimResponse { run }))
}

/// POST /api/agents/{id}/runs/{entry_id}/start
pub async fn start_run(
    State(state): State<AppState>,
    Path((id, entry_id)): Path<(Uuid, Uuid)>,
    token: BearerToken,
) -> ApiResult<Json<RunQueueEntry>> {
    authenticate_agent(&state, id, &token).await?;

    let entry = dispatch_service::start_run(state.repo.as_ref(), id, entry_id, Utc::now()).await?;

    Ok(Json(entry))
}

/// POST /api/agents/{id}/runs/{entry_id}/complete
pub async fn complete_run(
    State(state): State<AppState>,
    Path((id, entry_id)): Path<(Uuid, Uuid)>,
    token: BearerToken,
) -> ApiResult<Json<RunQueueEntry>> {
    authenticate_agent(&state, id, &token).await?;

    let entry =
        dispatch_service::complete_run(state.repo.as_ref(), id, entry_id, Utc::now()).await?;

    Ok(Json(entry))
}

/// POST /api/agents/{id}/runs/{entry_id}/fail
pub async fn fail_run(
    State(state): State<AppState>,
    Path((id, entry_id)): Path<(Uuid, Uuid)>,
    token: BearerToken,
    Json(req): Json<FailRun>,
) -> ApiResult<Json<RunQueueEntry>> {
    authenticate_agent(&state, id, &token).await?;

    let entry =
        dispatch_service::fail_run(state.repo.as_ref(), id, entry_id, req.message, Utc::now())
            .await?;

    Ok(Json(entry))
}

/// POST /api/agents/{id}/runs/{entry_id}/release
/// Hand a claimed run back to the queue
pub async fn release_run(
    State(state): State<AppState>,
    Path((id, entry_id)): Path<(Uuid, Uuid)>,
    token: BearerToken,
) -> ApiResult<Json<RunQueueEntry>> {
    authenticate_agent(&state, id, &token).await?;

    let entry = dispatch_service::release_run(state.repo.as_ref(), id, entry_id).await?;

    Ok(Json(entry))
}

// =============================================================================
// Operator Queries
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct AgentQuery {
    #[serde(default)]
    pub pool_id: Option<Uuid>,
}

/// GET /api/agents
pub async fn list_agents(
    State(state): State<AppState>,
    Query(query): Query<AgentQuery>,
) -> ApiResult<Json<Vec<Agent>>> {
    tracing::debug!("Listing agents");

    let agents = registry_service::list_agents(state.repo.as_ref(), query.pool_id).await?;

    Ok(Json(agents))
}

/// GET /api/pools/{id}/agents
pub async fn list_pool_agents(
    State(state): State<AppState>,
    Path(pool_id): Path<Uuid>,
) -> ApiResult<Json<Vec<Agent>>> {
    let agents = registry_service::list_agents(state.repo.as_ref(), Some(pool_id)).await?;

    Ok(Json(agents))
}

/// GET /api/agents/{id}
pub async fn get_agent(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Agent>> {
    let agent = registry_service::get_agent(state.repo.as_ref(), id).await?;

    Ok(Json(agent))
}

/// DELETE /api/agents/{id}
/// Deregister an agent; its held runs go back to the queue
pub async fn delete_agent(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    tracing::info!("Deleting agent: {}", id);

    registry_service::delete_agent(state.repo.as_ref(), id).await?;

    Ok(StatusCode::NO_CONTENT)
}
