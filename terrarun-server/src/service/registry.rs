//! Agent Registry Service
//!
//! Registration against pool tokens, session authentication, heartbeats and
//! the staleness sweep. Also owns pool token management.

use chrono::{DateTime, Utc};
use std::time::Duration;
use terrarun_core::domain::agent::{Agent, AgentStatus};
use terrarun_core::domain::pool::AgentToken;
use terrarun_core::dto::agent::RegisteredAgent;
use terrarun_core::dto::pool::{CreateAgentToken, CreatedAgentToken};
use thiserror::Error;
use uuid::Uuid;

use crate::repository::{Repository, RepositoryError, SweepReport};
use crate::service::credentials::{
    POOL_TOKEN_PREFIX, SESSION_TOKEN_PREFIX, generate_secret, hash_secret,
};

/// Service error type
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Invalid or revoked agent token")]
    InvalidToken,

    #[error("Agent {0} is not registered")]
    UnknownAgent(Uuid),

    #[error("Pool {0} not found")]
    PoolNotFound(Uuid),

    #[error("Token {0} not found")]
    TokenNotFound(Uuid),

    #[error("{0}")]
    ValidationError(String),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

pub type Result<T> = std::result::Result<T, RegistryError>;

/// Register an agent with a pool token
///
/// The agent joins the token's pool with status `idle`. The returned session
/// token authenticates every later call the agent makes.
pub async fn register(
    repo: &dyn Repository,
    pool_token: &str,
    name: &str,
    at: DateTime<Utc>,
) -> Result<RegisteredAgent> {
    validate_agent_name(name)?;

    let session_token = generate_secret(SESSION_TOKEN_PREFIX);
    let agent = repo
        .register_agent(
            &hash_secret(pool_token),
            name.trim(),
            &hash_secret(&session_token),
            at,
        )
        .await?
        .ok_or(RegistryError::InvalidToken)?;

    tracing::info!(
        "Agent registered: {} ({}) in pool {}",
        agent.name,
        agent.id,
        agent.pool_id
    );

    Ok(RegisteredAgent {
        agent,
        session_token,
    })
}

/// Resolve an agent from its session credential
pub async fn authenticate(
    repo: &dyn Repository,
    agent_id: Uuid,
    session_token: &str,
) -> Result<Agent> {
    repo.authenticate_agent(agent_id, &hash_secret(session_token))
        .await?
        .ok_or(RegistryError::UnknownAgent(agent_id))
}

/// Record a heartbeat for an agent
///
/// Idle and busy reports only refresh `last_ping_at`; which of the two the
/// agent is in follows the runs it owns. `exited` and `errored` release
/// whatever the agent still holds.
pub async fn heartbeat(
    repo: &dyn Repository,
    agent_id: Uuid,
    status: AgentStatus,
    at: DateTime<Utc>,
) -> Result<Agent> {
    if status == AgentStatus::Unknown {
        return Err(RegistryError::ValidationError(
            "Agents cannot report themselves as unknown".to_string(),
        ));
    }

    let agent = repo
        .record_heartbeat(agent_id, status, at)
        .await?
        .ok_or(RegistryError::UnknownAgent(agent_id))?;

    tracing::debug!("Heartbeat received from agent {}: {}", agent_id, agent.status);

    Ok(agent)
}

pub async fn get_agent(repo: &dyn Repository, agent_id: Uuid) -> Result<Agent> {
    repo.find_agent(agent_id)
        .await?
        .ok_or(RegistryError::UnknownAgent(agent_id))
}

/// List agents, optionally only those of one pool
pub async fn list_agents(repo: &dyn Repository, pool_id: Option<Uuid>) -> Result<Vec<Agent>> {
    if let Some(pool_id) = pool_id {
        repo.find_pool(pool_id)
            .await?
            .ok_or(RegistryError::PoolNotFound(pool_id))?;
    }

    Ok(repo.list_agents(pool_id).await?)
}

/// Deregister an agent, releasing anything it held
pub async fn delete_agent(repo: &dyn Repository, agent_id: Uuid) -> Result<()> {
    if !repo.delete_agent(agent_id).await? {
        return Err(RegistryError::UnknownAgent(agent_id));
    }

    tracing::info!("Agent deleted: {}", agent_id);

    Ok(())
}

/// Mark agents that have not pinged within `timeout` as unknown
///
/// Entries they held go back to the queue. Run periodically by the sweeper.
pub async fn mark_stale(
    repo: &dyn Repository,
    timeout: Duration,
    now: DateTime<Utc>,
) -> Result<SweepReport> {
    let timeout = chrono::Duration::from_std(timeout)
        .map_err(|_| RegistryError::ValidationError("Heartbeat timeout out of range".into()))?;

    let report = repo.mark_stale(now - timeout).await?;

    for agent in &report.agents {
        tracing::warn!(
            "Agent {} ({}) missed heartbeats since {}, marked unknown",
            agent.name,
            agent.id,
            agent.last_ping_at
        );
    }
    for entry in &report.released {
        tracing::info!("Released run queue entry {} back to the queue", entry.id);
    }

    Ok(report)
}

// =============================================================================
// Pool Tokens
// =============================================================================

/// Mint a registration token for a pool. The secret is returned only here.
pub async fn create_token(
    repo: &dyn Repository,
    pool_id: Uuid,
    req: CreateAgentToken,
) -> Result<CreatedAgentToken> {
    repo.find_pool(pool_id)
        .await?
        .ok_or(RegistryError::PoolNotFound(pool_id))?;

    if req.description.len() > 1024 {
        return Err(RegistryError::ValidationError(
            "Token description is too long (max 1024 characters)".to_string(),
        ));
    }

    let secret = generate_secret(POOL_TOKEN_PREFIX);
    let token = AgentToken {
        id: Uuid::new_v4(),
        pool_id,
        description: req.description,
        created_at: Utc::now(),
        last_used_at: None,
        revoked_at: None,
    };

    repo.insert_token(&token, &hash_secret(&secret)).await?;

    tracing::info!("Token {} created for pool {}", token.id, pool_id);

    Ok(CreatedAgentToken { token, secret })
}

pub async fn list_tokens(repo: &dyn Repository, pool_id: Uuid) -> Result<Vec<AgentToken>> {
    repo.find_pool(pool_id)
        .await?
        .ok_or(RegistryError::PoolNotFound(pool_id))?;

    Ok(repo.list_tokens(pool_id).await?)
}

/// Revoke a token. Agents already registered with it keep their sessions.
pub async fn revoke_token(
    repo: &dyn Repository,
    token_id: Uuid,
    at: DateTime<Utc>,
) -> Result<AgentToken> {
    let token = repo
        .revoke_token(token_id, at)
        .await?
        .ok_or(RegistryError::TokenNotFound(token_id))?;

    tracing::info!("Token {} revoked", token_id);

    Ok(token)
}

// =============================================================================
// Validation
// =============================================================================

fn validate_agent_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(RegistryError::ValidationError(
            "Agent name cannot be empty".to_string(),
        ));
    }

    if name.len() > 255 {
        return Err(RegistryError::ValidationError(
            "Agent name is too long (max 255 characters)".to_string(),
        ));
    }

    Ok(())
}
