//! Pool command handlers
//!
//! Creating and editing agent pools and their workspace, project and
//! environment associations.

use anyhow::{Result, bail};
use clap::{Subcommand, ValueEnum};
use colored::*;
use terrarun_client::TerrarunClient;
use terrarun_core::domain::pool::{AgentPool, PoolScope};
use terrarun_core::dto::pool::{CreateAgentPool, UpdateAgentPool};
use uuid::Uuid;

use super::format_time;
use crate::config::Config;
use crate::id_resolver::resolve_pool_id;

/// Pool subcommands
#[derive(Subcommand)]
pub enum PoolCommands {
    /// Create a pool
    Create {
        /// Owning organisation
        organisation: String,
        /// Pool name, unique within the organisation
        name: String,
        /// Serve every workspace in the organisation
        #[arg(long)]
        allow_all: bool,
    },
    /// List pools
    List {
        #[arg(long)]
        organisation: Option<String>,
    },
    /// Get pool details, including scopes
    Get {
        /// Pool ID or unambiguous prefix
        id: String,
    },
    /// Rename a pool or change its allow-all setting
    Update {
        /// Pool ID or unambiguous prefix
        id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        allow_all: Option<bool>,
    },
    /// Delete a pool with its tokens, agents and scopes
    Delete {
        /// Pool ID or unambiguous prefix
        id: String,
    },
    /// Manage the pool's explicit associations
    Scope {
        #[command(subcommand)]
        command: ScopeCommands,
    },
}

#[derive(Subcommand)]
pub enum ScopeCommands {
    /// List associations
    List {
        /// Pool ID or unambiguous prefix
        pool: String,
    },
    /// Associate a workspace, project or environment
    Add {
        /// Pool ID or unambiguous prefix
        pool: String,
        kind: ScopeKind,
        id: Uuid,
    },
    /// Remove an association
    Remove {
        /// Pool ID or unambiguous prefix
        pool: String,
        kind: ScopeKind,
        id: Uuid,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ScopeKind {
    Workspace,
    Project,
    Environment,
}

impl ScopeKind {
    fn scope(self, id: Uuid) -> PoolScope {
        match self {
            ScopeKind::Workspace => PoolScope::Workspace(id),
            ScopeKind::Project => PoolScope::Project(id),
            ScopeKind::Environment => PoolScope::Environment(id),
        }
    }
}

/// Handle pool commands
pub async fn handle_pool_command(command: PoolCommands, config: &Config) -> Result<()> {
    let client = config.client();

    match command {
        PoolCommands::Create {
            organisation,
            name,
            allow_all,
        } => {
            let pool = client
                .create_pool(CreateAgentPool {
                    organisation,
                    name,
                    allow_all_workspaces: allow_all,
                })
                .await?;
            println!("{} Created pool {}", "✓".green(), pool.id.to_string().bold());
            print_pool_summary(&pool);
            Ok(())
        }
        PoolCommands::List { organisation } => list_pools(&client, organisation.as_deref()).await,
        PoolCommands::Get { id } => get_pool(&client, &id).await,
        PoolCommands::Update {
            id,
            name,
            allow_all,
        } => {
            let update = UpdateAgentPool {
                name,
                allow_all_workspaces: allow_all,
            };
            if update.is_empty() {
                bail!("Nothing to update: pass --name and/or --allow-all");
            }

            let id = resolve_pool_id(&client, &id).await?;
            let pool = client.update_pool(id, update).await?;
            println!("{} Updated pool {}", "✓".green(), pool.id.to_string().bold());
            print_pool_summary(&pool);
            Ok(())
        }
        PoolCommands::Delete { id } => {
            let id = resolve_pool_id(&client, &id).await?;
            client.delete_pool(id).await?;
            println!("{} Deleted pool {}", "✓".green(), id);
            Ok(())
        }
        PoolCommands::Scope { command } => handle_scope_command(&client, command).await,
    }
}

async fn handle_scope_command(client: &TerrarunClient, command: ScopeCommands) -> Result<()> {
    match command {
        ScopeCommands::List { pool } => {
            let pool_id = resolve_pool_id(client, &pool).await?;
            let scopes = client.list_pool_scopes(pool_id).await?;
            if scopes.is_empty() {
                println!("{}", "No explicit associations.".yellow());
            }
            for scope in scopes {
                print_scope(&scope);
            }
            Ok(())
        }
        ScopeCommands::Add { pool, kind, id } => {
            let pool_id = resolve_pool_id(client, &pool).await?;
            let scope = kind.scope(id);
            client.add_pool_scope(pool_id, scope).await?;
            println!("{} Associated {} {}", "✓".green(), scope.kind(), id);
            Ok(())
        }
        ScopeCommands::Remove { pool, kind, id } => {
            let pool_id = resolve_pool_id(client, &pool).await?;
            let scope = kind.scope(id);
            client.remove_pool_scope(pool_id, scope).await?;
            println!("{} Removed {} {}", "✓".green(), scope.kind(), id);
            Ok(())
        }
    }
}

async fn list_pools(client: &TerrarunClient, organisation: Option<&str>) -> Result<()> {
    let pools = client.list_pools(organisation).await?;

    if pools.is_empty() {
        println!("{}", "No pools found.".yellow());
    } else {
        println!("{}", format!("Found {} pool(s):", pools.len()).bold());
        println!();
        for pool in pools {
            print_pool_summary(&pool);
        }
    }

    Ok(())
}

async fn get_pool(client: &TerrarunClient, id: &str) -> Result<()> {
    let id = resolve_pool_id(client, id).await?;
    let pool = client.get_pool(id).await?;
    let scopes = client.list_pool_scopes(id).await?;
    let agents = client.list_agents(Some(id)).await?;

    print_pool_summary(&pool);
    println!("    Scopes:");
    if scopes.is_empty() {
        println!("      {}", "(none)".dimmed());
    }
    for scope in &scopes {
        print_scope(scope);
    }
    println!("    Agents:       {}", agents.len());
    println!();

    Ok(())
}

fn print_pool_summary(pool: &AgentPool) {
    println!("  {} Pool {}", "▸".cyan(), pool.id.to_string().bold());
    println!("    Name:         {}/{}", pool.organisation, pool.name);
    println!(
        "    Allow all:    {}",
        if pool.allow_all_workspaces {
            "yes".green()
        } else {
            "no".normal()
        }
    );
    println!("    Created:      {}", format_time(&pool.created_at).dimmed());
    println!();
}

fn print_scope(scope: &PoolScope) {
    println!("      {:<12} {}", scope.kind(), scope.target_id());
}
