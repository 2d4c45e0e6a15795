//! Run queue endpoints

use terrarun_core::domain::run::RunQueueEntry;
use terrarun_core::dto::run::{EnqueueRun, RunQuery};
use uuid::Uuid;

use crate::TerrarunClient;
use crate::error::Result;

impl TerrarunClient {
    /// Queue a plan or apply for agent execution
    pub async fn enqueue_run(&self, req: EnqueueRun) -> Result<RunQueueEntry> {
        let response = self
            .client
            .post(self.url("/api/runs"))
            .json(&req)
            .send()
            .await?;

        self.handle_response(response).await
    }

    pub async fn list_runs(&self, query: &RunQuery) -> Result<Vec<RunQueueEntry>> {
        let response = self
            .client
            .get(self.url("/api/runs"))
            .query(query)
            .send()
            .await?;

        self.handle_response(response).await
    }

    pub async fn get_run(&self, id: Uuid) -> Result<RunQueueEntry> {
        let response = self
            .client
            .get(self.url(&format!("/api/runs/{}", id)))
            .send()
            .await?;

        self.handle_response(response).await
    }
}
