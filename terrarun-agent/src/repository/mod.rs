//! Repository layer
//!
//! The agent's view of the control plane: every call is made on behalf of
//! the registered agent session. Trait-based so the scheduler can be tested
//! without a server.

mod http;

pub use http::HttpControlPlane;

use async_trait::async_trait;
use std::time::Duration;
use terrarun_client::Result;
use terrarun_core::domain::agent::AgentStatus;
use terrarun_core::dto::run::RunDescriptor;
use uuid::Uuid;

/// Session-bound control plane operations
#[async_trait]
pub trait ControlPlane: Send + Sync {
    fn agent_id(&self) -> Uuid;

    async fn heartbeat(&self, status: AgentStatus) -> Result<()>;

    /// Next eligible run, waiting server-side for up to `wait`
    async fn claim(&self, wait: Duration) -> Result<Option<RunDescriptor>>;

    async fn start(&self, entry_id: Uuid) -> Result<()>;
    async fn complete(&self, entry_id: Uuid) -> Result<()>;
    async fn fail(&self, entry_id: Uuid, message: &str) -> Result<()>;
    async fn release(&self, entry_id: Uuid) -> Result<()>;
}
