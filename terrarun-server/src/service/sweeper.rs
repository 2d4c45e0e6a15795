//! Staleness sweeper
//!
//! The single background task that marks silent agents unknown and puts
//! their work back on the queue.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::repository::Repository;
use crate::service::registry;

/// Run [`registry::mark_stale`] every `interval` until the task is aborted
pub fn spawn_sweeper(
    repo: Arc<dyn Repository>,
    interval: Duration,
    timeout: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!(
            "Staleness sweeper started (interval {:?}, timeout {:?})",
            interval,
            timeout
        );

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            match registry::mark_stale(repo.as_ref(), timeout, Utc::now()).await {
                Ok(report) if !report.agents.is_empty() => {
                    tracing::info!(
                        "Sweep marked {} agent(s) unknown, released {} entr(ies)",
                        report.agents.len(),
                        report.released.len()
                    );
                }
                Ok(_) => {}
                Err(e) => tracing::error!("Staleness sweep failed: {}", e),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::MemoryRepository;
    use crate::service::fixtures;
    use chrono::Duration as TimeDelta;
    use terrarun_core::domain::agent::AgentStatus;
    use terrarun_core::domain::run::RunState;

    #[tokio::test]
    async fn test_sweeper_releases_silent_agent() {
        let repo: Arc<dyn Repository> = Arc::new(MemoryRepository::new());
        let long_ago = Utc::now() - TimeDelta::minutes(10);
        let agent = fixtures::agent(repo.as_ref(), "acme", long_ago).await;
        let workspace = fixtures::workspace(repo.as_ref(), "acme").await;
        let entry = fixtures::run(repo.as_ref(), workspace.id).await;
        repo.claim_next(agent.id, long_ago).await.unwrap().unwrap();

        let handle = spawn_sweeper(
            Arc::clone(&repo),
            Duration::from_millis(10),
            Duration::from_secs(90),
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.abort();

        let agent = repo.find_agent(agent.id).await.unwrap().unwrap();
        assert_eq!(agent.status, AgentStatus::Unknown);
        let entry = repo.find_run(entry.id).await.unwrap().unwrap();
        assert_eq!(entry.state, RunState::Unclaimed);
    }
}
