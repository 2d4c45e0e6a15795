//! ID resolver module
//!
//! Handles resolution of UUID prefixes to full UUIDs by querying the API.
//! This allows users to specify short, unambiguous prefixes instead of full UUIDs.

use anyhow::{Context, Result, anyhow};
use terrarun_client::TerrarunClient;
use terrarun_core::dto::run::RunQuery;
use uuid::Uuid;

use crate::types::IdOrPrefix;

/// Pick the single candidate identified by `id`
///
/// # Errors
/// Returns an error if no candidate matches or the prefix is ambiguous.
pub fn pick(kind: &str, id: &IdOrPrefix, candidates: impl IntoIterator<Item = Uuid>) -> Result<Uuid> {
    let matches: Vec<Uuid> = candidates.into_iter().filter(|c| id.matches(c)).collect();

    match matches.as_slice() {
        [] => Err(anyhow!("No {} found with ID starting with '{}'", kind, id)),
        [only] => Ok(*only),
        _ => {
            let ids: Vec<String> = matches.iter().map(Uuid::to_string).collect();
            Err(anyhow!(
                "Ambiguous prefix '{}' matches multiple {}s: {}",
                id,
                kind,
                ids.join(", ")
            ))
        }
    }
}

/// Resolve a pool ID or prefix to a full UUID
pub async fn resolve_pool_id(client: &TerrarunClient, input: &str) -> Result<Uuid> {
    let id = IdOrPrefix::parse(input);
    if let Some(uuid) = id.as_uuid() {
        return Ok(uuid);
    }

    let pools = client
        .list_pools(None)
        .await
        .context("Failed to fetch pools for ID resolution")?;
    pick("pool", &id, pools.iter().map(|p| p.id))
}

/// Resolve an agent ID or prefix to a full UUID
pub async fn resolve_agent_id(client: &TerrarunClient, input: &str) -> Result<Uuid> {
    let id = IdOrPrefix::parse(input);
    if let Some(uuid) = id.as_uuid() {
        return Ok(uuid);
    }

    let agents = client
        .list_agents(None)
        .await
        .context("Failed to fetch agents for ID resolution")?;
    pick("agent", &id, agents.iter().map(|a| a.id))
}

/// Resolve a queue entry ID or prefix to a full UUID
pub async fn resolve_run_id(client: &TerrarunClient, input: &str) -> Result<Uuid> {
    let id = IdOrPrefix::parse(input);
    if let Some(uuid) = id.as_uuid() {
        return Ok(uuid);
    }

    let entries = client
        .list_runs(&RunQuery::default())
        .await
        .context("Failed to fetch runs for ID resolution")?;
    pick("run", &id, entries.iter().map(|e| e.id))
}

/// Resolve a workspace ID or prefix to a full UUID
pub async fn resolve_workspace_id(client: &TerrarunClient, input: &str) -> Result<Uuid> {
    let id = IdOrPrefix::parse(input);
    if let Some(uuid) = id.as_uuid() {
        return Ok(uuid);
    }

    let workspaces = client
        .list_workspaces(None)
        .await
        .context("Failed to fetch workspaces for ID resolution")?;
    pick("workspace", &id, workspaces.iter().map(|w| w.id))
}
