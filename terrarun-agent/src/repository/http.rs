//! HTTP control plane
//!
//! Binds a [`TerrarunClient`] to the session obtained at registration.

use async_trait::async_trait;
use std::time::Duration;
use terrarun_client::{AgentSession, Result, TerrarunClient};
use terrarun_core::domain::agent::AgentStatus;
use terrarun_core::dto::run::RunDescriptor;
use uuid::Uuid;

use super::ControlPlane;

pub struct HttpControlPlane {
    client: TerrarunClient,
    session: AgentSession,
}

impl HttpControlPlane {
    pub fn new(client: TerrarunClient, session: AgentSession) -> Self {
        Self { client, session }
    }
}

#[async_trait]
impl ControlPlane for HttpControlPlane {
    fn agent_id(&self) -> Uuid {
        self.session.agent_id
    }

    async fn heartbeat(&self, status: AgentStatus) -> Result<()> {
        self.client.heartbeat(&self.session, status).await
    }

    async fn claim(&self, wait: Duration) -> Result<Option<RunDescriptor>> {
        self.client.claim(&self.session, wait).await
    }

    async fn start(&self, entry_id: Uuid) -> Result<()> {
        self.client.start_run(&self.session, entry_id).await?;
        Ok(())
    }

    async fn complete(&self, entry_id: Uuid) -> Result<()> {
        self.client.complete_run(&self.session, entry_id).await?;
        Ok(())
    }

    async fn fail(&self, entry_id: Uuid, message: &str) -> Result<()> {
        self.client.fail_run(&self.session, entry_id, message).await?;
        Ok(())
    }

    async fn release(&self, entry_id: Uuid) -> Result<()> {
        self.client.release_run(&self.session, entry_id).await?;
        Ok(())
    }
}
