//! Run poller
//!
//! Claims runs from the control plane and executes them one at a time,
//! while a background task keeps sending heartbeats with the agent's
//! current status. Shutdown is cooperative: a run in progress is finished
//! and reported before the loop exits, then a final `exited` heartbeat is
//! sent.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use terrarun_client::ClientError;
use terrarun_core::domain::agent::AgentStatus;
use terrarun_core::dto::run::RunDescriptor;
use tokio::sync::watch;
use tokio::time;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::executor::{ExecutionOutcome, Executor};
use crate::repository::ControlPlane;
use crate::scheduler::Backoff;

/// Upper bound for the poll backoff after transport errors
const MAX_POLL_BACKOFF: Duration = Duration::from_secs(60);

/// Attempts for each run report before giving up on it
const REPORT_ATTEMPTS: u32 = 5;

/// Claims and executes runs until shut down
pub struct RunPoller {
    config: Config,
    control: Arc<dyn ControlPlane>,
    executor: Arc<dyn Executor>,
    status: watch::Sender<AgentStatus>,
}

impl RunPoller {
    pub fn new(config: Config, control: Arc<dyn ControlPlane>, executor: Arc<dyn Executor>) -> Self {
        let (status, _) = watch::channel(AgentStatus::Idle);
        Self {
            config,
            control,
            executor,
            status,
        }
    }

    /// Runs the polling loop until `shutdown` flips to true
    ///
    /// Returns an error only if the server stops accepting the agent's
    /// session, in which case no amount of retrying helps.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(
            "Starting run poller for agent {} (interval: {:?}, claim wait: {:?})",
            self.control.agent_id(),
            self.config.poll_interval,
            self.config.claim_wait
        );

        let heartbeat = self.start_heartbeat_loop();
        let mut backoff = Backoff::new(self.config.poll_interval, MAX_POLL_BACKOFF);

        let result = loop {
            if *shutdown.borrow() {
                break Ok(());
            }

            let claimed = tokio::select! {
                claimed = self.control.claim(self.config.claim_wait) => claimed,
                _ = shutdown.changed() => break Ok(()),
            };

            let delay = match claimed {
                Ok(Some(run)) => {
                    backoff.reset();
                    self.execute_run(run).await;
                    continue;
                }
                Ok(None) => {
                    debug!("No runs available");
                    backoff.reset();
                    self.config.poll_interval
                }
                Err(e) if e.is_unauthorized() || e.is_not_found() => {
                    break Err(anyhow::anyhow!("Server rejected agent session: {}", e));
                }
                Err(e) => {
                    let delay = backoff.next_delay();
                    warn!("Claim failed, retrying in {:?}: {}", delay, e);
                    delay
                }
            };

            tokio::select! {
                _ = time::sleep(delay) => {}
                _ = shutdown.changed() => break Ok(()),
            }
        };

        heartbeat.abort();

        info!("Run poller stopped, reporting exit");
        if let Err(e) = self.control.heartbeat(AgentStatus::Exited).await {
            warn!("Failed to send exit heartbeat: {}", e);
        }

        result
    }

    /// Drives one claimed run to a reported outcome
    async fn execute_run(&self, run: RunDescriptor) {
        info!(
            "Claimed run {} ({} of {}/{}, attempt {})",
            run.run_id, run.operation, run.organisation, run.workspace_name, run.attempt
        );
        self.status.send_replace(AgentStatus::Busy);

        if let Err(e) = self.report("start", run.entry_id, || self.control.start(run.entry_id)).await {
            if !e.is_conflict() {
                // Best effort so the entry does not wait for the sweep
                if let Err(e) = self.control.release(run.entry_id).await {
                    warn!("Failed to release entry {}: {}", run.entry_id, e);
                }
            }
            self.status.send_replace(AgentStatus::Idle);
            return;
        }

        let outcome = match self.executor.execute(&run).await {
            Ok(outcome) => outcome,
            Err(e) => ExecutionOutcome::Failed(format!("{:#}", e)),
        };

        let reported = match &outcome {
            ExecutionOutcome::Succeeded => {
                info!("Run {} succeeded", run.run_id);
                self.report("complete", run.entry_id, || self.control.complete(run.entry_id))
                    .await
            }
            ExecutionOutcome::Failed(message) => {
                warn!("Run {} failed: {}", run.run_id, message);
                self.report("fail", run.entry_id, || {
                    self.control.fail(run.entry_id, message)
                })
                .await
            }
        };

        if reported.is_ok() {
            debug!("Reported outcome of entry {}", run.entry_id);
        }

        self.status.send_replace(AgentStatus::Idle);
    }

    /// Sends a run report, retrying transient failures
    async fn report<F, Fut>(
        &self,
        action: &str,
        entry_id: Uuid,
        send: F,
    ) -> std::result::Result<(), ClientError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = terrarun_client::Result<()>>,
    {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(10));
        let mut attempt = 0;

        loop {
            attempt += 1;

            match send().await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_conflict() => {
                    warn!(
                        "Entry {} is no longer held by this agent, dropping {} report: {}",
                        entry_id, action, e
                    );
                    return Err(e);
                }
                Err(e) if e.is_transient() && attempt < REPORT_ATTEMPTS => {
                    let delay = backoff.next_delay();
                    warn!(
                        "Failed to {} entry {} (attempt {}/{}), retrying in {:?}: {}",
                        action, entry_id, attempt, REPORT_ATTEMPTS, delay, e
                    );
                    time::sleep(delay).await;
                }
                Err(e) => {
                    error!("Failed to {} entry {}: {}", action, entry_id, e);
                    return Err(e);
                }
            }
        }
    }

    /// Starts a background task to send heartbeats
    ///
    /// The task ignores shutdown and keeps running until `run` aborts it,
    /// so a run being finished after Ctrl-C stays owned.
    fn start_heartbeat_loop(&self) -> tokio::task::JoinHandle<()> {
        let control = Arc::clone(&self.control);
        let status = self.status.subscribe();
        let interval = self.config.heartbeat_interval;

        tokio::spawn(async move {
            let mut ticker = time::interval(interval);

            loop {
                ticker.tick().await;

                let current = *status.borrow();
                debug!("Sending heartbeat ({})", current);

                if let Err(e) = control.heartbeat(current).await {
                    warn!("Failed to send heartbeat: {}", e);
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use terrarun_core::domain::run::RunOperation;

    #[derive(Default)]
    struct FakeControlPlane {
        queue: Mutex<VecDeque<RunDescriptor>>,
        calls: Mutex<Vec<String>>,
        /// HTTP status returned for `start`, if it should fail
        start_error: Option<u16>,
    }

    impl FakeControlPlane {
        fn with_run(run: RunDescriptor) -> Self {
            let fake = Self::default();
            fake.queue.lock().unwrap().push_back(run);
            fake
        }

        fn record(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ControlPlane for FakeControlPlane {
        fn agent_id(&self) -> Uuid {
            Uuid::nil()
        }

        async fn heartbeat(&self, status: AgentStatus) -> terrarun_client::Result<()> {
            self.record(format!("heartbeat:{}", status));
            Ok(())
        }

        async fn claim(&self, _wait: Duration) -> terrarun_client::Result<Option<RunDescriptor>> {
            Ok(self.queue.lock().unwrap().pop_front())
        }

        async fn start(&self, _entry_id: Uuid) -> terrarun_client::Result<()> {
            if let Some(status) = self.start_error {
                return Err(ClientError::api_error(status, r#"{"error":"rejected"}"#));
            }
            self.record("start".into());
            Ok(())
        }

        async fn complete(&self, _entry_id: Uuid) -> terrarun_client::Result<()> {
            self.record("complete".into());
            Ok(())
        }

        async fn fail(&self, _entry_id: Uuid, message: &str) -> terrarun_client::Result<()> {
            self.record(format!("fail:{}", message));
            Ok(())
        }

        async fn release(&self, _entry_id: Uuid) -> terrarun_client::Result<()> {
            self.record("release".into());
            Err(ClientError::api_error(404, r#"{"error":"gone"}"#))
        }
    }

    struct FixedExecutor {
        outcome: ExecutionOutcome,
        duration: Duration,
        runs: Mutex<usize>,
    }

    impl FixedExecutor {
        fn new(outcome: ExecutionOutcome) -> Self {
            Self {
                outcome,
                duration: Duration::ZERO,
                runs: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl Executor for FixedExecutor {
        async fn execute(&self, _run: &RunDescriptor) -> anyhow::Result<ExecutionOutcome> {
            *self.runs.lock().unwrap() += 1;
            time::sleep(self.duration).await;
            Ok(self.outcome.clone())
        }
    }

    fn descriptor() -> RunDescriptor {
        RunDescriptor {
            entry_id: Uuid::new_v4(),
            run_id: Uuid::new_v4(),
            workspace_id: Uuid::new_v4(),
            workspace_name: "network".into(),
            organisation: "acme".into(),
            operation: RunOperation::Plan,
            attempt: 1,
        }
    }

    fn test_config() -> Config {
        Config {
            agent_token: "trp_test".into(),
            poll_interval: Duration::from_millis(10),
            heartbeat_interval: Duration::from_secs(60),
            claim_wait: Duration::ZERO,
            ..Config::default()
        }
    }

    /// Runs the poller until `done` holds for the recorded calls, then shuts it down
    async fn drive(
        control: Arc<FakeControlPlane>,
        executor: Arc<dyn Executor>,
        done: impl Fn(&[String]) -> bool,
    ) -> Vec<String> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let poller = RunPoller::new(test_config(), control.clone(), executor);
        let handle = tokio::spawn(async move { poller.run(shutdown_rx).await });

        for _ in 0..200 {
            if done(&control.calls()) {
                break;
            }
            time::sleep(Duration::from_millis(10)).await;
        }

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap().unwrap();
        control.calls()
    }

    #[tokio::test]
    async fn test_successful_run_is_completed() {
        let control = Arc::new(FakeControlPlane::with_run(descriptor()));
        let executor = Arc::new(FixedExecutor::new(ExecutionOutcome::Succeeded));

        let calls = drive(control, executor.clone(), |calls| {
            calls.iter().any(|c| c == "complete")
        })
        .await;

        let reports: Vec<&String> = calls.iter().filter(|c| !c.starts_with("heartbeat")).collect();
        assert_eq!(reports, vec!["start", "complete"]);
        assert_eq!(*executor.runs.lock().unwrap(), 1);
        assert_eq!(calls.last().map(String::as_str), Some("heartbeat:exited"));
    }

    #[tokio::test]
    async fn test_failed_run_reports_message() {
        let control = Arc::new(FakeControlPlane::with_run(descriptor()));
        let executor = Arc::new(FixedExecutor::new(ExecutionOutcome::Failed(
            "exit 1".into(),
        )));

        let calls = drive(control, executor, |calls| {
            calls.iter().any(|c| c.starts_with("fail"))
        })
        .await;

        assert!(calls.contains(&"fail:exit 1".to_string()));
        assert!(!calls.contains(&"complete".to_string()));
    }

    #[tokio::test]
    async fn test_lost_run_is_not_executed() {
        let control = Arc::new(FakeControlPlane {
            start_error: Some(409),
            ..FakeControlPlane::with_run(descriptor())
        });
        let executor = Arc::new(FixedExecutor::new(ExecutionOutcome::Succeeded));

        let calls = drive(control.clone(), executor.clone(), |_| {
            control.queue.lock().unwrap().is_empty()
        })
        .await;

        assert_eq!(*executor.runs.lock().unwrap(), 0);
        assert!(!calls.contains(&"release".to_string()));
        assert!(!calls.contains(&"complete".to_string()));
    }

    #[tokio::test]
    async fn test_heartbeats_follow_status() {
        let control = Arc::new(FakeControlPlane::default());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let config = Config {
            heartbeat_interval: Duration::from_millis(10),
            ..test_config()
        };
        let poller = RunPoller::new(
            config,
            control.clone(),
            Arc::new(FixedExecutor::new(ExecutionOutcome::Succeeded)),
        );
        let handle = tokio::spawn(async move { poller.run(shutdown_rx).await });

        time::sleep(Duration::from_millis(50)).await;
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap().unwrap();

        let calls = control.calls();
        assert!(calls.iter().any(|c| c == "heartbeat:idle"));
        assert_eq!(calls.last().map(String::as_str), Some("heartbeat:exited"));
    }

    #[tokio::test]
    async fn test_rejected_start_releases_entry() {
        let control = Arc::new(FakeControlPlane {
            start_error: Some(400),
            ..FakeControlPlane::with_run(descriptor())
        });
        let executor = Arc::new(FixedExecutor::new(ExecutionOutcome::Succeeded));

        let calls = drive(control, executor.clone(), |calls| {
            calls.iter().any(|c| c == "release")
        })
        .await;

        // The failed release is logged and the poller carries on to shut down
        assert!(calls.contains(&"release".to_string()));
        assert_eq!(*executor.runs.lock().unwrap(), 0);
        assert_eq!(calls.last().map(String::as_str), Some("heartbeat:exited"));
    }

    #[tokio::test]
    async fn test_heartbeats_continue_while_finishing_after_shutdown() {
        let control = Arc::new(FakeControlPlane::with_run(descriptor()));
        let executor = Arc::new(FixedExecutor {
            duration: Duration::from_millis(400),
            ..FixedExecutor::new(ExecutionOutcome::Succeeded)
        });
        let config = Config {
            heartbeat_interval: Duration::from_millis(10),
            ..test_config()
        };
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let poller = RunPoller::new(config, control.clone(), executor);
        let handle = tokio::spawn(async move { poller.run(shutdown_rx).await });

        for _ in 0..100 {
            if control.calls().iter().any(|c| c == "start") {
                break;
            }
            time::sleep(Duration::from_millis(5)).await;
        }
        shutdown_tx.send(true).unwrap();
        let busy = |calls: &[String]| calls.iter().filter(|c| *c == "heartbeat:busy").count();
        let at_shutdown = busy(&control.calls());

        handle.await.unwrap().unwrap();
        let calls = control.calls();

        assert!(calls.contains(&"complete".to_string()));
        assert!(
            busy(&calls) >= at_shutdown + 10,
            "busy heartbeats at shutdown={} after run={}",
            at_shutdown,
            busy(&calls)
        );
        assert_eq!(calls.last().map(String::as_str), Some("heartbeat:exited"));
    }
}
