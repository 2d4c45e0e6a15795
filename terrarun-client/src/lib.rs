//! Terrarun HTTP Client
//!
//! A type-safe HTTP client for the Terrarun control plane API.
//!
//! Shared by the agent process (registration, heartbeats, claims and run
//! reports) and the operator CLI (pools, tokens, scope sync and the run
//! queue).
//!
//! # Example
//!
//! ```no_run
//! use terrarun_client::TerrarunClient;
//! use terrarun_core::dto::pool::CreateAgentPool;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = TerrarunClient::new("http://localhost:8080");
//!
//!     let pool = client.create_pool(CreateAgentPool {
//!         organisation: "acme".to_string(),
//!         name: "default".to_string(),
//!         allow_all_workspaces: true,
//!     }).await?;
//!
//!     println!("Created pool: {}", pool.id);
//!     Ok(())
//! }
//! ```

mod agents;
pub mod error;
mod pools;
mod runs;
mod scopes;

// Re-export commonly used types
pub use agents::AgentSession;
pub use error::{ClientError, Result};
pub use terrarun_core::dto::run::RunDescriptor;

use reqwest::Client;
use serde::de::DeserializeOwned;

/// HTTP client for the Terrarun control plane
///
/// Methods are grouped by area:
/// - Agent channel (register, heartbeat, claim, run reports)
/// - Agent pools, scopes and tokens
/// - Scope sync for workspaces, projects and environments
/// - Run queue
#[derive(Debug, Clone)]
pub struct TerrarunClient {
    /// Base URL of the server (e.g., "http://localhost:8080")
    base_url: String,
    /// HTTP client instance
    client: Client,
}

impl TerrarunClient {
    /// Create a new client
    ///
    /// # Example
    /// ```
    /// use terrarun_client::TerrarunClient;
    ///
    /// let client = TerrarunClient::new("http://localhost:8080");
    /// ```
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    /// Create a new client with a custom HTTP client
    ///
    /// This allows you to configure timeouts, proxies, TLS settings, etc.
    /// Long-polling claims need a timeout above the requested wait.
    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    /// Get the base URL of the server
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    // =============================================================================
    // Response Handlers
    // =============================================================================

    /// Check the status code and deserialize a JSON body
    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ClientError::api_error(status.as_u16(), error_text));
        }

        response
            .json()
            .await
            .map_err(|e| ClientError::ParseError(format!("Failed to parse JSON response: {}", e)))
    }

    /// Handle a response that returns no content
    async fn handle_empty_response(&self, response: reqwest::Response) -> Result<()> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ClientError::api_error(status.as_u16(), error_text));
        }

        Ok(())
    }
}
