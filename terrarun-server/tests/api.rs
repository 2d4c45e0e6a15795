//! End-to-end API tests against the in-memory repository
//!
//! These tests drive the full HTTP surface:
//! - Pool, token and scope management
//! - Agent registration and session authentication
//! - Heartbeats, claims and run reports
//! - Recovery of work held by a silent agent

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use chrono::Utc;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use terrarun_server::api::{AppState, create_router};
use terrarun_server::config::{Config, StoreBackend};
use terrarun_server::repository::{MemoryRepository, Repository};
use terrarun_server::service::registry_service;
use tower::util::ServiceExt; // for oneshot
use uuid::Uuid;

struct TestApp {
    router: Router,
    repo: Arc<dyn Repository>,
}

fn setup_app() -> TestApp {
    let repo: Arc<dyn Repository> = Arc::new(MemoryRepository::new());
    let config = Config {
        store: StoreBackend::Memory,
        claim_max_wait: Duration::from_secs(2),
        ..Config::default()
    };

    TestApp {
        router: create_router(AppState::new(Arc::clone(&repo), config)),
        repo,
    }
}

impl TestApp {
    async fn send(
        &self,
        method: &str,
        uri: &str,
        bearer: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        if let Some(token) = bearer {
            request = request.header("authorization", format!("Bearer {}", token));
        }
        let body = match body {
            Some(json) => {
                request = request.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };

        let response = self
            .router
            .clone()
            .oneshot(request.body(body).unwrap())
            .await
            .unwrap();

        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };

        (status, json)
    }

    async fn create_pool(&self, organisation: &str, name: &str, allow_all: bool) -> String {
        let (status, pool) = self
            .send(
                "POST",
                "/api/pools",
                None,
                Some(json!({
                    "organisation": organisation,
                    "name": name,
                    "allow_all_workspaces": allow_all
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        pool["id"].as_str().unwrap().to_string()
    }

    async fn create_token(&self, pool_id: &str) -> String {
        let (status, created) = self
            .send(
                "POST",
                &format!("/api/pools/{}/tokens", pool_id),
                None,
                Some(json!({ "description": "ci" })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        created["secret"].as_str().unwrap().to_string()
    }

    async fn sync_workspace(&self, organisation: &str) -> String {
        let id = Uuid::new_v4();
        let (status, _) = self
            .send(
                "PUT",
                &format!("/api/workspaces/{}", id),
                None,
                Some(json!({ "organisation": organisation, "name": "network" })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        id.to_string()
    }

    /// Returns `(agent_id, session_token)`
    async fn register(&self, pool_token: &str, name: &str) -> (String, String) {
        let (status, registered) = self
            .send(
                "POST",
                "/api/agents/register",
                Some(pool_token),
                Some(json!({ "name": name })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        (
            registered["agent"]["id"].as_str().unwrap().to_string(),
            registered["session_token"].as_str().unwrap().to_string(),
        )
    }

    async fn enqueue(&self, workspace_id: &str) -> String {
        let (status, entry) = self
            .send(
                "POST",
                "/api/runs",
                None,
                Some(json!({
                    "run_id": Uuid::new_v4(),
                    "workspace_id": workspace_id,
                    "operation": "plan"
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        entry["id"].as_str().unwrap().to_string()
    }

    async fn claim(&self, agent_id: &str, session: &str) -> Value {
        let (status, claim) = self
            .send(
                "POST",
                &format!("/api/agents/{}/claim", agent_id),
                Some(session),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        claim["run"].clone()
    }
}

#[tokio::test]
async fn test_health_check() {
    let app = setup_app();

    let response = app
        .router
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_agent_lifecycle() {
    let app = setup_app();
    let pool_id = app.create_pool("acme", "default", true).await;
    let token = app.create_token(&pool_id).await;
    let workspace_id = app.sync_workspace("acme").await;

    let (agent_id, session) = app.register(&token, "agent-1").await;

    let (status, agent) = app
        .send("GET", &format!("/api/agents/{}", agent_id), None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(agent["pool_id"], pool_id.as_str());
    assert_eq!(agent["status"], "idle");

    let (status, _) = app
        .send(
            "POST",
            &format!("/api/agents/{}/heartbeat", agent_id),
            Some(&session),
            Some(json!({ "status": "idle", "timestamp": Utc::now() })),
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    assert!(app.claim(&agent_id, &session).await.is_null());

    let entry_id = app.enqueue(&workspace_id).await;
    let run = app.claim(&agent_id, &session).await;
    assert_eq!(run["entry_id"], entry_id.as_str());
    assert_eq!(run["workspace_name"], "network");
    assert_eq!(run["organisation"], "acme");
    assert_eq!(run["operation"], "plan");
    assert_eq!(run["attempt"], 1);

    let (_, agent) = app
        .send("GET", &format!("/api/agents/{}", agent_id), None, None)
        .await;
    assert_eq!(agent["status"], "busy");

    let (status, entry) = app
        .send(
            "POST",
            &format!("/api/agents/{}/runs/{}/start", agent_id, entry_id),
            Some(&session),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(entry["state"], "executing");

    let (status, entry) = app
        .send(
            "POST",
            &format!("/api/agents/{}/runs/{}/complete", agent_id, entry_id),
            Some(&session),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(entry["state"], "completed");

    let (_, agent) = app
        .send("GET", &format!("/api/agents/{}", agent_id), None, None)
        .await;
    assert_eq!(agent["status"], "idle");

    let (status, entries) = app.send("GET", "/api/runs?state=completed", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(entries.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_registration_requires_valid_token() {
    let app = setup_app();
    let pool_id = app.create_pool("acme", "default", true).await;
    let token = app.create_token(&pool_id).await;

    let (status, body) = app
        .send(
            "POST",
            "/api/agents/register",
            None,
            Some(json!({ "name": "agent-1" })),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["error"].is_string());

    let (status, _) = app
        .send(
            "POST",
            "/api/agents/register",
            Some("trp_not-a-real-token"),
            Some(json!({ "name": "agent-1" })),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // Revoke and retry
    let (_, tokens) = app
        .send("GET", &format!("/api/pools/{}/tokens", pool_id), None, None)
        .await;
    let token_id = tokens[0]["id"].as_str().unwrap().to_string();
    let (status, revoked) = app
        .send("DELETE", &format!("/api/tokens/{}", token_id), None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(revoked["revoked_at"].is_string());

    let (status, _) = app
        .send(
            "POST",
            "/api/agents/register",
            Some(&token),
            Some(json!({ "name": "agent-1" })),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (_, agents) = app.send("GET", "/api/agents", None, None).await;
    assert!(agents.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_agent_endpoints_require_own_session() {
    let app = setup_app();
    let pool_id = app.create_pool("acme", "default", true).await;
    let token = app.create_token(&pool_id).await;
    let (a, _) = app.register(&token, "a").await;
    let (_, b_session) = app.register(&token, "b").await;

    let (status, _) = app
        .send(
            "POST",
            &format!("/api/agents/{}/heartbeat", a),
            Some(&b_session),
            Some(json!({ "status": "idle", "timestamp": Utc::now() })),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app
        .send("POST", &format!("/api/agents/{}/claim", a), None, None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_heartbeat_rejects_unknown_status() {
    let app = setup_app();
    let pool_id = app.create_pool("acme", "default", true).await;
    let token = app.create_token(&pool_id).await;
    let (agent_id, session) = app.register(&token, "a").await;

    let (status, _) = app
        .send(
            "POST",
            &format!("/api/agents/{}/heartbeat", agent_id),
            Some(&session),
            Some(json!({ "status": "unknown", "timestamp": Utc::now() })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_non_owner_report_conflicts() {
    let app = setup_app();
    let pool_id = app.create_pool("acme", "default", true).await;
    let token = app.create_token(&pool_id).await;
    let workspace_id = app.sync_workspace("acme").await;
    let (a, a_session) = app.register(&token, "a").await;
    let (b, b_session) = app.register(&token, "b").await;
    let entry_id = app.enqueue(&workspace_id).await;

    assert!(!app.claim(&a, &a_session).await.is_null());

    let (status, body) = app
        .send(
            "POST",
            &format!("/api/agents/{}/runs/{}/fail", b, entry_id),
            Some(&b_session),
            Some(json!({ "message": "not mine" })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains(&a));

    let (_, entry) = app
        .send("GET", &format!("/api/runs/{}", entry_id), None, None)
        .await;
    assert_eq!(entry["state"], "claimed");
    assert_eq!(entry["agent_id"], a.as_str());
}

#[tokio::test]
async fn test_silent_agent_work_is_reclaimed() {
    let app = setup_app();
    let pool_id = app.create_pool("acme", "default", true).await;
    let token = app.create_token(&pool_id).await;
    let workspace_id = app.sync_workspace("acme").await;
    let (a, a_session) = app.register(&token, "a").await;
    let entry_id = app.enqueue(&workspace_id).await;

    assert_eq!(app.claim(&a, &a_session).await["entry_id"], entry_id.as_str());

    // A stops heartbeating; the sweep runs after the timeout
    let report = registry_service::mark_stale(
        app.repo.as_ref(),
        Duration::from_secs(90),
        Utc::now() + chrono::Duration::seconds(120),
    )
    .await
    .unwrap();
    assert_eq!(report.agents.len(), 1);

    let (_, agent) = app
        .send("GET", &format!("/api/agents/{}", a), None, None)
        .await;
    assert_eq!(agent["status"], "unknown");

    let (_, entry) = app
        .send("GET", &format!("/api/runs/{}", entry_id), None, None)
        .await;
    assert_eq!(entry["state"], "unclaimed");
    assert!(entry["agent_id"].is_null());

    let (b, b_session) = app.register(&token, "b").await;
    let run = app.claim(&b, &b_session).await;
    assert_eq!(run["entry_id"], entry_id.as_str());
    assert_eq!(run["attempt"], 2);

    let (status, _) = app
        .send(
            "POST",
            &format!("/api/agents/{}/runs/{}/complete", a, entry_id),
            Some(&a_session),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_pool_management() {
    let app = setup_app();
    let pool_id = app.create_pool("acme", "default", false).await;

    let (status, _) = app
        .send(
            "POST",
            "/api/pools",
            None,
            Some(json!({ "organisation": "acme", "name": "default" })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, pool) = app
        .send(
            "PATCH",
            &format!("/api/pools/{}", pool_id),
            None,
            Some(json!({ "name": "renamed" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(pool["name"], "renamed");
    assert_eq!(pool["allow_all_workspaces"], false);

    let (_, pools) = app.send("GET", "/api/pools?organisation=acme", None, None).await;
    assert_eq!(pools.as_array().unwrap().len(), 1);

    let (status, _) = app
        .send("DELETE", &format!("/api/pools/{}", pool_id), None, None)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = app
        .send("GET", &format!("/api/pools/{}", pool_id), None, None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_scoped_pool_eligibility() {
    let app = setup_app();
    let everywhere = app.create_pool("acme", "everywhere", true).await;
    let scoped = app.create_pool("other-org", "scoped", false).await;
    let acme_workspace = app.sync_workspace("acme").await;
    let other_workspace = app.sync_workspace("other-org").await;

    let (status, _) = app
        .send(
            "POST",
            &format!("/api/pools/{}/scopes", scoped),
            None,
            Some(json!({ "kind": "workspace", "id": other_workspace })),
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    // Cross-organisation associations are rejected
    let (status, _) = app
        .send(
            "POST",
            &format!("/api/pools/{}/scopes", scoped),
            None,
            Some(json!({ "kind": "workspace", "id": acme_workspace })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, pools) = app
        .send("GET", &format!("/api/workspaces/{}/pools", other_workspace), None, None)
        .await;
    let ids: Vec<&str> = pools
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec![scoped.as_str()]);

    let (_, pools) = app
        .send("GET", &format!("/api/workspaces/{}/pools", acme_workspace), None, None)
        .await;
    assert_eq!(pools[0]["id"], everywhere.as_str());
    assert_eq!(pools.as_array().unwrap().len(), 1);

    let (_, scopes) = app
        .send("GET", &format!("/api/pools/{}/scopes", scoped), None, None)
        .await;
    assert_eq!(scopes[0]["kind"], "workspace");
    assert_eq!(scopes[0]["id"], other_workspace.as_str());
}

#[tokio::test]
async fn test_enqueue_unknown_workspace() {
    let app = setup_app();

    let (status, _) = app
        .send(
            "POST",
            "/api/runs",
            None,
            Some(json!({
                "run_id": Uuid::new_v4(),
                "workspace_id": Uuid::new_v4(),
                "operation": "apply"
            })),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
