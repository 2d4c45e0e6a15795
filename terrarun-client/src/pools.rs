//! Agent pool, scope association and token endpoints

use terrarun_core::domain::pool::{AgentPool, AgentToken, PoolScope};
use terrarun_core::dto::pool::{
    CreateAgentPool, CreateAgentToken, CreatedAgentToken, UpdateAgentPool,
};
use uuid::Uuid;

use crate::TerrarunClient;
use crate::error::Result;

impl TerrarunClient {
    // =============================================================================
    // Pools
    // =============================================================================

    pub async fn create_pool(&self, req: CreateAgentPool) -> Result<AgentPool> {
        let response = self
            .client
            .post(self.url("/api/pools"))
            .json(&req)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// List pools, optionally of a single organisation
    pub async fn list_pools(&self, organisation: Option<&str>) -> Result<Vec<AgentPool>> {
        let mut request = self.client.get(self.url("/api/pools"));
        if let Some(organisation) = organisation {
            request = request.query(&[("organisation", organisation)]);
        }

        let response = request.send().await?;
        self.handle_response(response).await
    }

    pub async fn get_pool(&self, id: Uuid) -> Result<AgentPool> {
        let response = self
            .client
            .get(self.url(&format!("/api/pools/{}", id)))
            .send()
            .await?;

        self.handle_response(response).await
    }

    pub async fn update_pool(&self, id: Uuid, update: UpdateAgentPool) -> Result<AgentPool> {
        let response = self
            .client
            .patch(self.url(&format!("/api/pools/{}", id)))
            .json(&update)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Delete a pool with its agents, tokens and associations
    pub async fn delete_pool(&self, id: Uuid) -> Result<()> {
        let response = self
            .client
            .delete(self.url(&format!("/api/pools/{}", id)))
            .send()
            .await?;

        self.handle_empty_response(response).await
    }

    // =============================================================================
    // Scope Associations
    // =============================================================================

    pub async fn list_pool_scopes(&self, pool_id: Uuid) -> Result<Vec<PoolScope>> {
        let response = self
            .client
            .get(self.url(&format!("/api/pools/{}/scopes", pool_id)))
            .send()
            .await?;

        self.handle_response(response).await
    }

    pub async fn add_pool_scope(&self, pool_id: Uuid, scope: PoolScope) -> Result<()> {
        let response = self
            .client
            .post(self.url(&format!("/api/pools/{}/scopes", pool_id)))
            .json(&scope)
            .send()
            .await?;

        self.handle_empty_response(response).await
    }

    pub async fn remove_pool_scope(&self, pool_id: Uuid, scope: PoolScope) -> Result<()> {
        let response = self
            .client
            .delete(self.url(&format!("/api/pools/{}/scopes", pool_id)))
            .json(&scope)
            .send()
            .await?;

        self.handle_empty_response(response).await
    }

    // =============================================================================
    // Tokens
    // =============================================================================

    /// Mint a registration token. Store the returned secret; it is not
    /// retrievable later.
    pub async fn create_token(
        &self,
        pool_id: Uuid,
        description: impl Into<String>,
    ) -> Result<CreatedAgentToken> {
        let response = self
            .client
            .post(self.url(&format!("/api/pools/{}/tokens", pool_id)))
            .json(&CreateAgentToken {
                description: description.into(),
            })
            .send()
            .await?;

        self.handle_response(response).await
    }

    pub async fn list_tokens(&self, pool_id: Uuid) -> Result<Vec<AgentToken>> {
        let response = self
            .client
            .get(self.url(&format!("/api/pools/{}/tokens", pool_id)))
            .send()
            .await?;

        self.handle_response(response).await
    }

    pub async fn revoke_token(&self, token_id: Uuid) -> Result<AgentToken> {
        let response = self
            .client
            .delete(self.url(&format!("/api/tokens/{}", token_id)))
            .send()
            .await?;

        self.handle_response(response).await
    }
}
