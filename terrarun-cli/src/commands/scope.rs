//! Workspace, project and environment handlers
//!
//! These records mirror the outer system. Syncing one creates it or
//! replaces its fields.

use anyhow::Result;
use clap::Subcommand;
use colored::*;
use terrarun_core::domain::scope::Workspace;
use terrarun_core::dto::scope::{SyncScopeEntity, SyncWorkspace};
use uuid::Uuid;

use crate::config::Config;
use crate::id_resolver::resolve_workspace_id;

/// Workspace subcommands
#[derive(Subcommand)]
pub enum WorkspaceCommands {
    /// Create or update a workspace record
    Sync {
        id: Uuid,
        organisation: String,
        name: String,
        #[arg(long)]
        project: Option<Uuid>,
        #[arg(long)]
        environment: Option<Uuid>,
    },
    /// Get a workspace
    Get {
        /// Workspace ID or unambiguous prefix
        id: String,
    },
    /// List workspaces
    List {
        #[arg(long)]
        organisation: Option<String>,
    },
    /// Show the pools whose agents may run this workspace
    Pools {
        /// Workspace ID or unambiguous prefix
        id: String,
    },
}

/// Project subcommands
#[derive(Subcommand)]
pub enum ProjectCommands {
    /// Create or update a project record
    Sync {
        id: Uuid,
        organisation: String,
        name: String,
    },
    Get { id: Uuid },
}

/// Environment subcommands
#[derive(Subcommand)]
pub enum EnvironmentCommands {
    /// Create or update an environment record
    Sync {
        id: Uuid,
        organisation: String,
        name: String,
    },
    Get { id: Uuid },
}

/// Handle workspace commands
pub async fn handle_workspace_command(command: WorkspaceCommands, config: &Config) -> Result<()> {
    let client = config.client();

    match command {
        WorkspaceCommands::Sync {
            id,
            organisation,
            name,
            project,
            environment,
        } => {
            let workspace = client
                .sync_workspace(
                    id,
                    SyncWorkspace {
                        organisation,
                        name,
                        project_id: project,
                        environment_id: environment,
                    },
                )
                .await?;
            println!("{} Synced workspace", "✓".green());
            print_workspace(&workspace);
        }
        WorkspaceCommands::Get { id } => {
            let id = resolve_workspace_id(&client, &id).await?;
            print_workspace(&client.get_workspace(id).await?);
        }
        WorkspaceCommands::List { organisation } => {
            let workspaces = client.list_workspaces(organisation.as_deref()).await?;
            if workspaces.is_empty() {
                println!("{}", "No workspaces found.".yellow());
            }
            for workspace in workspaces {
                print_workspace(&workspace);
            }
        }
        WorkspaceCommands::Pools { id } => {
            let id = resolve_workspace_id(&client, &id).await?;
            let pools = client.eligible_pools(id).await?;
            if pools.is_empty() {
                println!("{}", "No pool serves this workspace.".yellow());
            }
            for pool in pools {
                let via = if pool.allow_all_workspaces {
                    "allow-all"
                } else {
                    "scoped"
                };
                println!(
                    "  {} {} {}/{} ({})",
                    "▸".cyan(),
                    pool.id.to_string().bold(),
                    pool.organisation,
                    pool.name,
                    via.dimmed()
                );
            }
        }
    }

    Ok(())
}

/// Handle project commands
pub async fn handle_project_command(command: ProjectCommands, config: &Config) -> Result<()> {
    let client = config.client();

    let project = match command {
        ProjectCommands::Sync {
            id,
            organisation,
            name,
        } => {
            client
                .sync_project(id, SyncScopeEntity { organisation, name })
                .await?
        }
        ProjectCommands::Get { id } => client.get_project(id).await?,
    };

    print_entity("Project", project.id, &project.organisation, &project.name);
    Ok(())
}

/// Handle environment commands
pub async fn handle_environment_command(
    command: EnvironmentCommands,
    config: &Config,
) -> Result<()> {
    let client = config.client();

    let environment = match command {
        EnvironmentCommands::Sync {
            id,
            organisation,
            name,
        } => {
            client
                .sync_environment(id, SyncScopeEntity { organisation, name })
                .await?
        }
        EnvironmentCommands::Get { id } => client.get_environment(id).await?,
    };

    print_entity(
        "Environment",
        environment.id,
        &environment.organisation,
        &environment.name,
    );
    Ok(())
}

fn print_workspace(workspace: &Workspace) {
    print_entity(
        "Workspace",
        workspace.id,
        &workspace.organisation,
        &workspace.name,
    );
    if let Some(project_id) = workspace.project_id {
        println!("    Project:      {}", project_id);
    }
    if let Some(environment_id) = workspace.environment_id {
        println!("    Environment:  {}", environment_id);
    }
}

fn print_entity(kind: &str, id: Uuid, organisation: &str, name: &str) {
    println!("  {} {} {}", "▸".cyan(), kind, id.to_string().bold());
    println!("    Name:         {}/{}", organisation, name);
}
