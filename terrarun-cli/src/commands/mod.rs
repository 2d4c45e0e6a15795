//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod agent;
mod pool;
mod run;
mod scope;
mod token;

pub use agent::AgentCommands;
pub use pool::PoolCommands;
pub use run::RunCommands;
pub use scope::{EnvironmentCommands, ProjectCommands, WorkspaceCommands};
pub use token::TokenCommands;

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::Subcommand;

use crate::config::Config;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Agent pool management
    Pool {
        #[command(subcommand)]
        command: PoolCommands,
    },
    /// Agent registration tokens
    Token {
        #[command(subcommand)]
        command: TokenCommands,
    },
    /// Registered agents
    Agent {
        #[command(subcommand)]
        command: AgentCommands,
    },
    /// Run queue
    Run {
        #[command(subcommand)]
        command: RunCommands,
    },
    /// Workspace records
    Workspace {
        #[command(subcommand)]
        command: WorkspaceCommands,
    },
    /// Project records
    Project {
        #[command(subcommand)]
        command: ProjectCommands,
    },
    /// Environment records
    Environment {
        #[command(subcommand)]
        command: EnvironmentCommands,
    },
}

/// Routes the command to the appropriate handler module.
pub async fn handle_command(command: Commands, config: &Config) -> Result<()> {
    match command {
        Commands::Pool { command } => pool::handle_pool_command(command, config).await,
        Commands::Token { command } => token::handle_token_command(command, config).await,
        Commands::Agent { command } => agent::handle_agent_command(command, config).await,
        Commands::Run { command } => run::handle_run_command(command, config).await,
        Commands::Workspace { command } => scope::handle_workspace_command(command, config).await,
        Commands::Project { command } => scope::handle_project_command(command, config).await,
        Commands::Environment { command } => {
            scope::handle_environment_command(command, config).await
        }
    }
}

/// Timestamp as shown in listings
pub(crate) fn format_time(at: &DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S").to_string()
}
