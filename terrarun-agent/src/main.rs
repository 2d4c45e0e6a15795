//! Terrarun Agent
//!
//! A worker process that joins an agent pool and executes Terraform runs
//! dispatched by the server.
//!
//! Architecture:
//! - Configuration: Load settings from environment or defaults
//! - Repository: Session-bound calls to the control plane
//! - Executor: Runs the configured command for each claimed run
//! - Scheduler: Claim loop, heartbeats and outcome reporting
//!
//! The agent registers with a pool token, then claims runs one at a time
//! and reports their outcome. Ctrl-C finishes the run in progress and
//! reports the agent as exited.

mod config;
mod executor;
mod repository;
mod scheduler;

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::executor::{Executor, ProcessExecutor};
use crate::repository::{ControlPlane, HttpControlPlane};
use crate::scheduler::{Backoff, RunPoller};
use terrarun_client::{AgentSession, TerrarunClient};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "terrarun_agent=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Terrarun Agent");

    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate()?;
    info!(
        "Loaded configuration: name={}, server_url={}",
        config.agent_name, config.server_url
    );

    let http = reqwest::Client::builder()
        .timeout(config.request_timeout())
        .build()
        .context("Failed to build HTTP client")?;
    let client = TerrarunClient::with_client(config.server_url.clone(), http);

    info!("Registering with server");
    let session = register_with_retry(&client, &config).await?;
    info!("Registered as agent {}", session.agent_id);

    let control: Arc<dyn ControlPlane> = Arc::new(HttpControlPlane::new(client, session));
    let executor: Arc<dyn Executor> = Arc::new(ProcessExecutor::new(
        config.exec.clone(),
        config.work_dir.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested, finishing current run");
            let _ = shutdown_tx.send(true);
        }
    });

    info!(
        "Poll interval: {:?}, heartbeat interval: {:?}",
        config.poll_interval, config.heartbeat_interval
    );

    let poller = RunPoller::new(config, control, executor);
    if let Err(e) = poller.run(shutdown_rx).await {
        error!("Poller error: {:#}", e);
        return Err(e);
    }

    info!("Agent stopped");
    Ok(())
}

/// Register with the server, retrying while it is unreachable
///
/// Rejections such as an invalid pool token are returned immediately.
async fn register_with_retry(client: &TerrarunClient, config: &Config) -> Result<AgentSession> {
    const MAX_RETRIES: u32 = 10;

    let mut backoff = Backoff::new(Duration::from_millis(500), Duration::from_secs(30));
    let mut attempt = 0;

    loop {
        attempt += 1;

        match client
            .register_agent(&config.agent_token, &config.agent_name)
            .await
        {
            Ok(registered) => {
                if attempt > 1 {
                    info!("Registered after {} attempt(s)", attempt);
                }
                return Ok(AgentSession::from(&registered));
            }
            Err(e) if !e.is_transient() => {
                return Err(e).context("Server rejected registration");
            }
            Err(e) if attempt >= MAX_RETRIES => {
                return Err(e).with_context(|| {
                    format!("Failed to register after {} attempts", MAX_RETRIES)
                });
            }
            Err(e) => {
                let delay = backoff.next_delay();
                warn!(
                    "Registration attempt {}/{} failed: {}. Retrying in {:?}",
                    attempt, MAX_RETRIES, e, delay
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
