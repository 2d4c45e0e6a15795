//! Run command handlers
//!
//! Enqueueing runs and inspecting the queue.

use anyhow::Result;
use clap::Subcommand;
use colored::*;
use terrarun_client::TerrarunClient;
use terrarun_core::domain::run::{RunOperation, RunQueueEntry, RunState};
use terrarun_core::dto::run::{EnqueueRun, RunQuery};
use uuid::Uuid;

use super::format_time;
use crate::config::Config;
use crate::id_resolver::{resolve_run_id, resolve_workspace_id};

/// Run subcommands
#[derive(Subcommand)]
pub enum RunCommands {
    /// Queue a run for agent execution
    Enqueue {
        /// Workspace ID or unambiguous prefix
        workspace: String,
        #[arg(value_parser = parse_operation, default_value = "plan")]
        operation: RunOperation,
        /// Run identifier; generated when omitted
        #[arg(long)]
        run_id: Option<Uuid>,
    },
    /// List queue entries
    List {
        #[arg(long, value_parser = parse_state)]
        state: Option<RunState>,
        /// Workspace ID or unambiguous prefix
        #[arg(long)]
        workspace: Option<String>,
    },
    /// Get queue entry details
    Get {
        /// Entry ID or unambiguous prefix
        id: String,
    },
}

fn parse_operation(s: &str) -> Result<RunOperation, String> {
    RunOperation::parse(s).ok_or_else(|| format!("unknown operation '{}'", s))
}

fn parse_state(s: &str) -> Result<RunState, String> {
    RunState::parse(s).ok_or_else(|| format!("unknown state '{}'", s))
}

/// Handle run commands
pub async fn handle_run_command(command: RunCommands, config: &Config) -> Result<()> {
    let client = config.client();

    match command {
        RunCommands::Enqueue {
            workspace,
            operation,
            run_id,
        } => {
            let workspace_id = resolve_workspace_id(&client, &workspace).await?;
            let entry = client
                .enqueue_run(EnqueueRun {
                    run_id: run_id.unwrap_or_else(Uuid::new_v4),
                    workspace_id,
                    operation,
                })
                .await?;

            println!("{} Queued entry {}", "✓".green(), entry.id.to_string().bold());
            let eligible = client.eligible_pools(workspace_id).await?;
            if eligible.is_empty() {
                println!(
                    "{}",
                    "No pool serves this workspace; the entry waits until one is associated."
                        .yellow()
                );
            }
            Ok(())
        }
        RunCommands::List { state, workspace } => list_runs(&client, state, workspace).await,
        RunCommands::Get { id } => {
            let id = resolve_run_id(&client, &id).await?;
            let entry = client.get_run(id).await?;
            print_entry_details(&entry);
            Ok(())
        }
    }
}

async fn list_runs(
    client: &TerrarunClient,
    state: Option<RunState>,
    workspace: Option<String>,
) -> Result<()> {
    let workspace_id = match workspace {
        Some(workspace) => Some(resolve_workspace_id(client, &workspace).await?),
        None => None,
    };
    let entries = client
        .list_runs(&RunQuery {
            state,
            workspace_id,
        })
        .await?;

    if entries.is_empty() {
        println!("{}", "No runs found.".yellow());
    } else {
        println!("{}", format!("Found {} run(s):", entries.len()).bold());
        println!();
        for entry in entries {
            print_entry_summary(&entry);
        }
    }

    Ok(())
}

fn print_entry_summary(entry: &RunQueueEntry) {
    println!(
        "  {} {} {} [{}]",
        "▸".cyan(),
        entry.id.to_string().bold(),
        entry.operation,
        colorize_state(entry.state)
    );
    println!("    Workspace:    {}", entry.workspace_id);
    println!("    Queued:       {}", format_time(&entry.queued_at).dimmed());
    println!();
}

fn print_entry_details(entry: &RunQueueEntry) {
    println!("{}", format!("Entry {}", entry.id).bold());
    println!("  Run:          {}", entry.run_id);
    println!("  Workspace:    {}", entry.workspace_id);
    println!("  Operation:    {}", entry.operation);
    println!("  State:        {}", colorize_state(entry.state));
    println!("  Attempt:      {}", entry.attempt);
    if let Some(agent_id) = entry.agent_id {
        println!("  Agent:        {}", agent_id);
    }
    println!("  Queued:       {}", format_time(&entry.queued_at));
    let stamps = [
        ("Claimed", entry.claimed_at),
        ("Started", entry.started_at),
        ("Finished", entry.finished_at),
    ];
    for (label, at) in stamps {
        if let Some(at) = at {
            println!("  {:<14}{}", format!("{}:", label), format_time(&at));
        }
    }
    if let Some(message) = &entry.failure_message {
        println!("  {}", "Failure:".red());
        for line in message.lines() {
            println!("    {}", line);
        }
    }
}

fn colorize_state(state: RunState) -> ColoredString {
    let label = state.as_str();
    match state {
        RunState::Unclaimed => label.normal(),
        RunState::Claimed => label.cyan(),
        RunState::Executing => label.yellow(),
        RunState::Completed => label.green(),
        RunState::Failed => label.red(),
    }
}
