//! Token command handlers

use anyhow::Result;
use clap::Subcommand;
use colored::*;
use terrarun_core::domain::pool::AgentToken;
use uuid::Uuid;

use super::format_time;
use crate::config::Config;
use crate::id_resolver::resolve_pool_id;

/// Token subcommands
#[derive(Subcommand)]
pub enum TokenCommands {
    /// Issue a registration token for a pool
    Create {
        /// Pool ID or unambiguous prefix
        pool: String,
        #[arg(long, default_value = "")]
        description: String,
    },
    /// List a pool's tokens
    List {
        /// Pool ID or unambiguous prefix
        pool: String,
    },
    /// Revoke a token. Agents already registered keep their sessions.
    Revoke { id: Uuid },
}

/// Handle token commands
pub async fn handle_token_command(command: TokenCommands, config: &Config) -> Result<()> {
    let client = config.client();

    match command {
        TokenCommands::Create { pool, description } => {
            let pool_id = resolve_pool_id(&client, &pool).await?;
            let created = client.create_token(pool_id, description).await?;

            println!("{} Created token {}", "✓".green(), created.token.id);
            println!();
            println!("  {}", created.secret.bold());
            println!();
            println!(
                "{}",
                "This secret is shown once. Pass it to agents as TERRARUN_AGENT_TOKEN.".yellow()
            );
            Ok(())
        }
        TokenCommands::List { pool } => {
            let pool_id = resolve_pool_id(&client, &pool).await?;
            let tokens = client.list_tokens(pool_id).await?;

            if tokens.is_empty() {
                println!("{}", "No tokens issued.".yellow());
            }
            for token in tokens {
                print_token(&token);
            }
            Ok(())
        }
        TokenCommands::Revoke { id } => {
            let token = client.revoke_token(id).await?;
            println!("{} Revoked token {}", "✓".green(), token.id);
            Ok(())
        }
    }
}

fn print_token(token: &AgentToken) {
    let state = if token.is_revoked() {
        "revoked".red()
    } else {
        "active".green()
    };

    println!("  {} Token {} ({})", "▸".cyan(), token.id.to_string().bold(), state);
    if !token.description.is_empty() {
        println!("    Description:  {}", token.description);
    }
    println!("    Created:      {}", format_time(&token.created_at).dimmed());
    println!(
        "    Last used:    {}",
        token
            .last_used_at
            .as_ref()
            .map(format_time)
            .unwrap_or_else(|| "never".to_string())
            .dimmed()
    );
    println!();
}
