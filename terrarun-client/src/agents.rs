//! Agent channel and agent queries

use chrono::Utc;
use std::time::Duration;
use terrarun_core::domain::agent::{Agent, AgentStatus};
use terrarun_core::domain::run::RunQueueEntry;
use terrarun_core::dto::agent::{ClaimResponse, FailRun, Heartbeat, RegisterAgent, RegisteredAgent};
use terrarun_core::dto::run::RunDescriptor;
use uuid::Uuid;

use crate::TerrarunClient;
use crate::error::Result;

/// Identity and credential of a registered agent
#[derive(Debug, Clone)]
pub struct AgentSession {
    pub agent_id: Uuid,
    pub token: String,
}

impl From<&RegisteredAgent> for AgentSession {
    fn from(registered: &RegisteredAgent) -> Self {
        Self {
            agent_id: registered.agent.id,
            token: registered.session_token.clone(),
        }
    }
}

impl TerrarunClient {
    // =============================================================================
    // Agent Channel
    // =============================================================================

    /// Register an agent with a pool token
    ///
    /// # Example
    /// ```no_run
    /// # use terrarun_client::{AgentSession, TerrarunClient};
    /// # async fn example() -> anyhow::Result<()> {
    /// let client = TerrarunClient::new("http://localhost:8080");
    /// let registered = client.register_agent("trp_...", "agent-01").await?;
    /// let session = AgentSession::from(&registered);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn register_agent(&self, pool_token: &str, name: &str) -> Result<RegisteredAgent> {
        let response = self
            .client
            .post(self.url("/api/agents/register"))
            .bearer_auth(pool_token)
            .json(&RegisterAgent {
                name: name.to_string(),
            })
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Report status and refresh liveness
    pub async fn heartbeat(&self, session: &AgentSession, status: AgentStatus) -> Result<()> {
        let response = self
            .client
            .post(self.url(&format!("/api/agents/{}/heartbeat", session.agent_id)))
            .bearer_auth(&session.token)
            .json(&Heartbeat {
                status,
                timestamp: Utc::now(),
            })
            .send()
            .await?;

        self.handle_empty_response(response).await
    }

    /// Ask for the next eligible run, letting the server hold the request
    /// for up to `wait` when the queue is empty
    pub async fn claim(
        &self,
        session: &AgentSession,
        wait: Duration,
    ) -> Result<Option<RunDescriptor>> {
        let response = self
            .client
            .post(self.url(&format!("/api/agents/{}/claim", session.agent_id)))
            .query(&[("wait", wait.as_secs())])
            .bearer_auth(&session.token)
            .send()
            .await?;

        let claim: ClaimResponse = self.handle_response(response).await?;
        Ok(claim.run)
    }

    pub async fn start_run(&self, session: &AgentSession, entry_id: Uuid) -> Result<RunQueueEntry> {
        self.report(session, entry_id, "start", None).await
    }

    pub async fn complete_run(
        &self,
        session: &AgentSession,
        entry_id: Uuid,
    ) -> Result<RunQueueEntry> {
        self.report(session, entry_id, "complete", None).await
    }

    pub async fn fail_run(
        &self,
        session: &AgentSession,
        entry_id: Uuid,
        message: impl Into<String>,
    ) -> Result<RunQueueEntry> {
        let body = FailRun {
            message: message.into(),
        };
        self.report(session, entry_id, "fail", Some(&body)).await
    }

    /// Hand a claimed run back to the queue
    pub async fn release_run(
        &self,
        session: &AgentSession,
        entry_id: Uuid,
    ) -> Result<RunQueueEntry> {
        self.report(session, entry_id, "release", None).await
    }

    async fn report(
        &self,
        session: &AgentSession,
        entry_id: Uuid,
        action: &str,
        body: Option<&FailRun>,
    ) -> Result<RunQueueEntry> {
        let url = self.url(&format!(
            "/api/agents/{}/runs/{}/{}",
            session.agent_id, entry_id, action
        ));
        let mut request = self.client.post(url).bearer_auth(&session.token);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        self.handle_response(response).await
    }

    // =============================================================================
    // Agent Queries
    // =============================================================================

    /// List agents, optionally only those of one pool
    pub async fn list_agents(&self, pool_id: Option<Uuid>) -> Result<Vec<Agent>> {
        let mut request = self.client.get(self.url("/api/agents"));
        if let Some(pool_id) = pool_id {
            request = request.query(&[("pool_id", pool_id)]);
        }

        let response = request.send().await?;
        self.handle_response(response).await
    }

    pub async fn get_agent(&self, id: Uuid) -> Result<Agent> {
        let response = self
            .client
            .get(self.url(&format!("/api/agents/{}", id)))
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Deregister an agent. Runs it held go back to the queue.
    pub async fn delete_agent(&self, id: Uuid) -> Result<()> {
        let response = self
            .client
            .delete(self.url(&format!("/api/agents/{}", id)))
            .send()
            .await?;

        self.handle_empty_response(response).await
    }
}
