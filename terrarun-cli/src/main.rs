//! Terrarun CLI
//!
//! Command-line interface for managing agent pools, tokens, agents and the
//! run queue on a Terrarun server.

mod commands;
mod config;
mod id_resolver;
mod types;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, handle_command};
use config::Config;

#[derive(Parser)]
#[command(name = "terrarun")]
#[command(about = "Terrarun agent pool CLI", long_about = None)]
struct Cli {
    /// Server URL
    #[arg(long, env = "TERRARUN_URL", default_value = "http://localhost:8080")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config {
        server_url: cli.url,
    };

    handle_command(cli.command, &config).await
}
