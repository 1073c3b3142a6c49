//! OARS execution backplane.
//!
//! A durable leased job queue decoupling action submission from connector
//! execution. One in-flight job per action; workers claim with a lease and
//! either complete or fail with retry/dead-letter semantics. The file
//! variant is single-process; multi-worker deployments use the Postgres
//! variant, whose claim runs under `FOR UPDATE SKIP LOCKED`.

#![deny(unsafe_code)]

pub mod file;
#[cfg(feature = "postgres")]
pub mod postgres;
mod worker;

pub use worker::{JobExecutor, Worker, WorkerSettings};

use async_trait::async_trait;
use oars_types::ExecutionJob;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackplaneError {
    #[error("job not found: {0}")]
    NotFound(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("backend error: {0}")]
    Backend(String),
}

impl From<BackplaneError> for oars_types::OarsError {
    fn from(value: BackplaneError) -> Self {
        match value {
            BackplaneError::NotFound(msg) => oars_types::OarsError::NotFound(msg),
            other => oars_types::OarsError::Internal(other.to_string()),
        }
    }
}

/// Enqueue request for one approved action.
#[derive(Clone, Debug)]
pub struct EnqueueJob {
    pub tenant_id: String,
    pub action_id: String,
    pub request_id: String,
}

/// Queue tuning shared by both variants.
#[derive(Clone, Debug)]
pub struct BackplaneSettings {
    pub max_attempts: u32,
    pub lock_timeout_seconds: u64,
    pub retry_delay_seconds: u64,
}

impl Default for BackplaneSettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            lock_timeout_seconds: 300,
            retry_delay_seconds: 30,
        }
    }
}

/// Durable leased job queue contract.
#[async_trait]
pub trait ExecutionBackplane: Send + Sync {
    /// Enqueue a job for the action. Idempotent: an existing in-flight
    /// (pending or running) job for the same action is returned instead.
    async fn enqueue(&self, request: EnqueueJob) -> Result<ExecutionJob, BackplaneError>;

    /// Claim up to `limit` due jobs for `worker_id`: pending jobs whose
    /// `available_at` has passed, plus running jobs whose lease expired.
    /// The transition to running, attempt increment, and lock stamping
    /// happen atomically.
    async fn claim(
        &self,
        worker_id: &str,
        limit: usize,
    ) -> Result<Vec<ExecutionJob>, BackplaneError>;

    /// Mark a claimed job succeeded. A stale worker (lease stolen) is a
    /// no-op, not an error.
    async fn complete(&self, job_id: &str, worker_id: &str) -> Result<(), BackplaneError>;

    /// Record a failure: retry with delay, or dead once attempts are
    /// exhausted. Stale workers are a no-op.
    async fn fail(
        &self,
        job_id: &str,
        worker_id: &str,
        error: &str,
        retry_delay_seconds: u64,
    ) -> Result<(), BackplaneError>;

    /// Queue depth by status, for the operations surface.
    async fn depth(&self) -> Result<BackplaneDepth, BackplaneError>;
}

/// Queue depth snapshot.
#[derive(Clone, Debug, Default, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackplaneDepth {
    pub pending: u64,
    pub running: u64,
    pub dead: u64,
}
