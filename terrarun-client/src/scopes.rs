//! Scope sync endpoints

use terrarun_core::domain::pool::AgentPool;
use terrarun_core::domain::scope::{Environment, Project, Workspace};
use terrarun_core::dto::scope::{SyncScopeEntity, SyncWorkspace};
use uuid::Uuid;

use crate::TerrarunClient;
use crate::error::Result;

impl TerrarunClient {
    /// Create or replace a workspace
    pub async fn sync_workspace(&self, id: Uuid, req: SyncWorkspace) -> Result<Workspace> {
        let response = self
            .client
            .put(self.url(&format!("/api/workspaces/{}", id)))
            .json(&req)
            .send()
            .await?;

        self.handle_response(response).await
    }

    pub async fn get_workspace(&self, id: Uuid) -> Result<Workspace> {
        let response = self
            .client
            .get(self.url(&format!("/api/workspaces/{}", id)))
            .send()
            .await?;

        self.handle_response(response).await
    }

    pub async fn list_workspaces(&self, organisation: Option<&str>) -> Result<Vec<Workspace>> {
        let mut request = self.client.get(self.url("/api/workspaces"));
        if let Some(organisation) = organisation {
            request = request.query(&[("organisation", organisation)]);
        }

        let response = request.send().await?;
        self.handle_response(response).await
    }

    /// Pools whose agents may run the workspace
    pub async fn eligible_pools(&self, workspace_id: Uuid) -> Result<Vec<AgentPool>> {
        let response = self
            .client
            .get(self.url(&format!("/api/workspaces/{}/pools", workspace_id)))
            .send()
            .await?;

        self.handle_response(response).await
    }

    pub async fn sync_project(&self, id: Uuid, req: SyncScopeEntity) -> Result<Project> {
        let response = self
            .client
            .put(self.url(&format!("/api/projects/{}", id)))
            .json(&req)
            .send()
            .await?;

        self.handle_response(response).await
    }

    pub async fn get_project(&self, id: Uuid) -> Result<Project> {
        let response = self
            .client
            .get(self.url(&format!("/api/projects/{}", id)))
            .send()
            .await?;

        self.handle_response(response).await
    }

    pub async fn sync_environment(&self, id: Uuid, req: SyncScopeEntity) -> Result<Environment> {
        let response = self
            .client
            .put(self.url(&format!("/api/environments/{}", id)))
            .json(&req)
            .send()
            .await?;

        self.handle_response(response).await
    }

    pub async fn get_environment(&self, id: Uuid) -> Result<Environment> {
        let response = self
            .client
            .get(self.url(&format!("/api/environments/{}", id)))
            .send()
            .await?;

        self.handle_response(response).await
    }
}
