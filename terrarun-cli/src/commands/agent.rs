//! Agent command handlers
//!
//! Listing and removing registered agents.

use anyhow::Result;
use clap::Subcommand;
use colored::*;
use terrarun_client::TerrarunClient;
use terrarun_core::domain::agent::{Agent, AgentStatus};

use super::format_time;
use crate::config::Config;
use crate::id_resolver::{resolve_agent_id, resolve_pool_id};

/// Agent subcommands
#[derive(Subcommand)]
pub enum AgentCommands {
    /// List registered agents
    List {
        /// Only agents of this pool (ID or unambiguous prefix)
        #[arg(long)]
        pool: Option<String>,
    },
    /// Get agent details
    Get {
        /// Agent ID or unambiguous prefix
        id: String,
    },
    /// Deregister an agent, releasing any run it holds
    Delete {
        /// Agent ID or unambiguous prefix
        id: String,
    },
}

/// Handle agent commands
pub async fn handle_agent_command(command: AgentCommands, config: &Config) -> Result<()> {
    let client = config.client();

    match command {
        AgentCommands::List { pool } => list_agents(&client, pool.as_deref()).await,
        AgentCommands::Get { id } => {
            let id = resolve_agent_id(&client, &id).await?;
            let agent = client.get_agent(id).await?;
            print_agent_summary(&agent);
            Ok(())
        }
        AgentCommands::Delete { id } => {
            let id = resolve_agent_id(&client, &id).await?;
            client.delete_agent(id).await?;
            println!("{} Deleted agent {}", "✓".green(), id);
            Ok(())
        }
    }
}

async fn list_agents(client: &TerrarunClient, pool: Option<&str>) -> Result<()> {
    let pool_id = match pool {
        Some(pool) => Some(resolve_pool_id(client, pool).await?),
        None => None,
    };
    let agents = client.list_agents(pool_id).await?;

    if agents.is_empty() {
        println!("{}", "No agents registered.".yellow());
    } else {
        println!(
            "{}",
            format!("Found {} registered agent(s):", agents.len()).bold()
        );
        println!();
        for agent in agents {
            print_agent_summary(&agent);
        }
    }

    Ok(())
}

fn print_agent_summary(agent: &Agent) {
    println!(
        "  {} Agent {} ({})",
        "▸".cyan(),
        agent.id.to_string().bold(),
        agent.name
    );
    println!("    Status:       {}", colorize_status(agent.status));
    println!("    Pool:         {}", agent.pool_id);
    println!(
        "    Registered:   {}",
        format_time(&agent.created_at).dimmed()
    );
    println!(
        "    Last Seen:    {}",
        format_time(&agent.last_ping_at).dimmed()
    );
    println!();
}

fn colorize_status(status: AgentStatus) -> ColoredString {
    let label = status.as_str();
    match status {
        AgentStatus::Idle => label.green(),
        AgentStatus::Busy => label.yellow(),
        AgentStatus::Exited => label.dimmed(),
        AgentStatus::Errored => label.red(),
        AgentStatus::Unknown => label.red().bold(),
    }
}
