//! Run Queue API Handlers
//!
//! Queueing runs for agents and inspecting the queue.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use terrarun_core::domain::run::RunQueueEntry;
use terrarun_core::dto::run::{EnqueueRun, RunQuery};
use uuid::Uuid;

use crate::api::AppState;
use crate::api::error::ApiResult;
use crate::service::dispatch_service;

/// POST /api/runs
/// Queue a plan or apply for agent execution
pub async fn enqueue_run(
    State(state): State<AppState>,
    Json(req): Json<EnqueueRun>,
) -> ApiResult<(StatusCode, Json<RunQueueEntry>)> {
    tracing::info!("Queueing {} of run {}", req.operation, req.run_id);

    let entry = dispatch_service::enqueue(state.repo.as_ref(), req).await?;

    Ok((StatusCode::CREATED, Json(entry)))
}

/// GET /api/runs
/// List entries, filtered by `state` and/or `workspace_id`
pub async fn list_runs(
    State(state): State<AppState>,
    Query(query): Query<RunQuery>,
) -> ApiResult<Json<Vec<RunQueueEntry>>> {
    tracing::debug!("Listing run queue: {:?}", query);

    let entries = dispatch_service::list_runs(state.repo.as_ref(), query).await?;

    Ok(Json(entries))
}

/// GET /api/runs/{id}
pub async fn get_run(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<RunQueueEntry>> {
    let entry = dispatch_service::get_run(state.repo.as_ref(), id).await?;

    Ok(Json(entry))
}
