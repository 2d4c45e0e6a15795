//! API Module
//!
//! HTTP API layer for the server.
//! Each submodule handles endpoints for a specific domain.

pub mod agent;
pub mod auth;
pub mod error;
pub mod health;
pub mod pool;
pub mod run;
pub mod scope;

use axum::{
    Router,
    routing::{delete, get, post, put},
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::repository::Repository;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<dyn Repository>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(repo: Arc<dyn Repository>, config: Config) -> Self {
        Self {
            repo,
            config: Arc::new(config),
        }
    }
}

/// Create the main API router with all endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Agent channel
        .route("/api/agents/register", post(agent::register_agent))
        .route("/api/agents/{id}/heartbeat", post(agent::heartbeat))
        .route("/api/agents/{id}/claim", post(agent::claim))
        .route(
            "/api/agents/{id}/runs/{entry_id}/start",
            post(agent::start_run),
        )
        .route(
            "/api/agents/{id}/runs/{entry_id}/complete",
            post(agent::complete_run),
        )
        .route("/api/agents/{id}/runs/{entry_id}/fail", post(agent::fail_run))
        .route(
            "/api/agents/{id}/runs/{entry_id}/release",
            post(agent::release_run),
        )
        // Agent queries
        .route("/api/agents", get(agent::list_agents))
        .route(
            "/api/agents/{id}",
            get(agent::get_agent).delete(agent::delete_agent),
        )
        // Pool endpoints
        .route("/api/pools", post(pool::create_pool).get(pool::list_pools))
        .route(
            "/api/pools/{id}",
            get(pool::get_pool)
                .patch(pool::update_pool)
                .delete(pool::delete_pool),
        )
        .route(
            "/api/pools/{id}/scopes",
            get(pool::list_scopes)
                .post(pool::add_scope)
                .delete(pool::remove_scope),
        )
        .route("/api/pools/{id}/agents", get(agent::list_pool_agents))
        .route(
            "/api/pools/{id}/tokens",
            get(pool::list_tokens).post(pool::create_token),
        )
        .route("/api/tokens/{id}", delete(pool::revoke_token))
        // Scope sync
        .route("/api/workspaces", get(scope::list_workspaces))
        .route(
            "/api/workspaces/{id}",
            put(scope::sync_workspace).get(scope::get_workspace),
        )
        .route("/api/workspaces/{id}/pools", get(scope::eligible_pools))
        .route(
            "/api/projects/{id}",
            put(scope::sync_project).get(scope::get_project),
        )
        .route(
            "/api/environments/{id}",
            put(scope::sync_environment).get(scope::get_environment),
        )
        // Run queue
        .route("/api/runs", post(run::enqueue_run).get(run::list_runs))
        .route("/api/runs/{id}", get(run::get_run))
        // Add state and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
