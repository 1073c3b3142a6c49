//! Worker loop driving claimed jobs through the executor.

use crate::{BackplaneError, ExecutionBackplane};
use async_trait::async_trait;
use oars_types::{ActionState, ExecutionJob};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

/// What the worker drives for each claimed job. Implemented by the
/// Action Service; the trait inverts the dependency so the backplane
/// stays a leaf crate.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    /// Execute the approved action behind the job and return its
    /// resulting state.
    async fn execute_job(&self, job: &ExecutionJob) -> Result<ActionState, String>;
}

#[derive(Clone, Debug)]
pub struct WorkerSettings {
    pub worker_id: String,
    pub poll_interval_ms: u64,
    pub claim_limit: usize,
    pub retry_delay_seconds: u64,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            worker_id: oars_types::prefixed_id("wrk"),
            poll_interval_ms: 500,
            claim_limit: 5,
            retry_delay_seconds: 30,
        }
    }
}

pub struct Worker {
    backplane: Arc<dyn ExecutionBackplane>,
    executor: Arc<dyn JobExecutor>,
    settings: WorkerSettings,
}

impl Worker {
    pub fn new(
        backplane: Arc<dyn ExecutionBackplane>,
        executor: Arc<dyn JobExecutor>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            backplane,
            executor,
            settings,
        }
    }

    /// Poll until `shutdown` flips true. Empty polls sleep the configured
    /// interval; busy polls loop immediately.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), BackplaneError> {
        info!(worker = %self.settings.worker_id, "backplane worker started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            let claimed = self
                .backplane
                .claim(&self.settings.worker_id, self.settings.claim_limit)
                .await?;
            if claimed.is_empty() {
                let sleep =
                    tokio::time::sleep(std::time::Duration::from_millis(self.settings.poll_interval_ms));
                tokio::select! {
                    _ = sleep => {}
                    _ = shutdown.changed() => {}
                }
                continue;
            }
            for job in claimed {
                self.drive(&job).await?;
            }
        }
        info!(worker = %self.settings.worker_id, "backplane worker stopped");
        Ok(())
    }

    /// Run one claimed job to completion or failure.
    pub async fn drive(&self, job: &ExecutionJob) -> Result<(), BackplaneError> {
        match self.executor.execute_job(job).await {
            Ok(ActionState::Executed) => {
                self.backplane
                    .complete(&job.id, &self.settings.worker_id)
                    .await
            }
            Ok(other) => {
                warn!(job = %job.id, state = %other, "job finished in non-executed state");
                self.backplane
                    .fail(
                        &job.id,
                        &self.settings.worker_id,
                        &format!("action finished in state {other}"),
                        self.settings.retry_delay_seconds,
                    )
                    .await
            }
            Err(error) => {
                warn!(job = %job.id, %error, "job execution failed");
                self.backplane
                    .fail(
                        &job.id,
                        &self.settings.worker_id,
                        &error,
                        self.settings.retry_delay_seconds,
                    )
                    .await
            }
        }
    }
}
