//! File-backed backplane variant.
//!
//! Jobs live in one JSON document rewritten whole under a mutex. The
//! in-process lock makes claims safe for any number of tasks in this
//! process only; multi-process deployments must use the Postgres variant.

use crate::{BackplaneDepth, BackplaneError, BackplaneSettings, EnqueueJob, ExecutionBackplane};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use oars_types::{prefixed_id, ExecutionJob, JobStatus};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

#[derive(Debug, Default, Serialize, Deserialize)]
struct JobDocument {
    #[serde(default)]
    jobs: Vec<ExecutionJob>,
}

pub struct FileBackplane {
    path: Option<PathBuf>,
    settings: BackplaneSettings,
    state: Mutex<JobDocument>,
}

impl FileBackplane {
    pub async fn open(
        path: impl AsRef<Path>,
        settings: BackplaneSettings,
    ) -> Result<Self, BackplaneError> {
        let path = path.as_ref().to_path_buf();
        let document = if tokio::fs::try_exists(&path)
            .await
            .map_err(|e| BackplaneError::Backend(e.to_string()))?
        {
            let raw = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| BackplaneError::Backend(e.to_string()))?;
            serde_json::from_str(&raw).map_err(|e| BackplaneError::Serialization(e.to_string()))?
        } else {
            JobDocument::default()
        };
        Ok(Self {
            path: Some(path),
            settings,
            state: Mutex::new(document),
        })
    }

    /// Queue with no backing file, for tests and inline-mode fallbacks.
    pub fn in_memory(settings: BackplaneSettings) -> Self {
        Self {
            path: None,
            settings,
            state: Mutex::new(JobDocument::default()),
        }
    }

    async fn persist(&self, document: &JobDocument) -> Result<(), BackplaneError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let serialized = serde_json::to_string(document)
            .map_err(|e| BackplaneError::Serialization(e.to_string()))?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| BackplaneError::Backend(e.to_string()))?;
        }
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, serialized.as_bytes())
            .await
            .map_err(|e| BackplaneError::Backend(e.to_string()))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| BackplaneError::Backend(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl ExecutionBackplane for FileBackplane {
    async fn enqueue(&self, request: EnqueueJob) -> Result<ExecutionJob, BackplaneError> {
        let mut doc = self.state.lock().await;
        if let Some(existing) = doc
            .jobs
            .iter()
            .find(|j| j.action_id == request.action_id && j.status.is_in_flight())
        {
            return Ok(existing.clone());
        }

        let now = Utc::now();
        let job = ExecutionJob {
            id: prefixed_id("job"),
            tenant_id: request.tenant_id,
            action_id: request.action_id,
            request_id: request.request_id,
            status: JobStatus::Pending,
            attempt_count: 0,
            max_attempts: self.settings.max_attempts,
            available_at: now,
            locked_at: None,
            locked_by: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        };
        doc.jobs.push(job.clone());
        self.persist(&doc).await?;
        Ok(job)
    }

    async fn claim(
        &self,
        worker_id: &str,
        limit: usize,
    ) -> Result<Vec<ExecutionJob>, BackplaneError> {
        let mut doc = self.state.lock().await;
        let now = Utc::now();
        let lease_cutoff = now - Duration::seconds(self.settings.lock_timeout_seconds as i64);

        let mut eligible: Vec<usize> = doc
            .jobs
            .iter()
            .enumerate()
            .filter(|(_, job)| match job.status {
                JobStatus::Pending => job.available_at <= now,
                JobStatus::Running => {
                    job.locked_at.map(|at| at <= lease_cutoff).unwrap_or(true)
                }
                _ => false,
            })
            .map(|(index, _)| index)
            .collect();
        eligible.sort_by(|&a, &b| {
            let (ja, jb) = (&doc.jobs[a], &doc.jobs[b]);
            ja.available_at
                .cmp(&jb.available_at)
                .then(ja.created_at.cmp(&jb.created_at))
        });
        eligible.truncate(limit);

        let mut claimed = Vec::with_capacity(eligible.len());
        for index in eligible {
            let job = &mut doc.jobs[index];
            job.status = JobStatus::Running;
            job.attempt_count += 1;
            job.locked_at = Some(now);
            job.locked_by = Some(worker_id.to_string());
            job.updated_at = now;
            claimed.push(job.clone());
        }
        if !claimed.is_empty() {
            self.persist(&doc).await?;
        }
        Ok(claimed)
    }

    async fn complete(&self, job_id: &str, worker_id: &str) -> Result<(), BackplaneError> {
        let mut doc = self.state.lock().await;
        let Some(job) = doc.jobs.iter_mut().find(|j| j.id == job_id) else {
            return Err(BackplaneError::NotFound(format!("job {job_id} not found")));
        };
        if job.locked_by.as_deref() != Some(worker_id) {
            return Ok(());
        }
        job.status = JobStatus::Succeeded;
        job.locked_at = None;
        job.locked_by = None;
        job.updated_at = Utc::now();
        self.persist(&doc).await
    }

    async fn fail(
        &self,
        job_id: &str,
        worker_id: &str,
        error: &str,
        retry_delay_seconds: u64,
    ) -> Result<(), BackplaneError> {
        let mut doc = self.state.lock().await;
        let Some(job) = doc.jobs.iter_mut().find(|j| j.id == job_id) else {
            return Err(BackplaneError::NotFound(format!("job {job_id} not found")));
        };
        if job.locked_by.as_deref() != Some(worker_id) {
            return Ok(());
        }
        let now = Utc::now();
        job.last_error = Some(error.to_string());
        job.locked_at = None;
        job.locked_by = None;
        job.updated_at = now;
        if job.attempt_count >= job.max_attempts {
            job.status = JobStatus::Dead;
        } else {
            job.status = JobStatus::Pending;
            job.available_at = now + Duration::seconds(retry_delay_seconds as i64);
        }
        self.persist(&doc).await
    }

    async fn depth(&self) -> Result<BackplaneDepth, BackplaneError> {
        let doc = self.state.lock().await;
        let mut depth = BackplaneDepth::default();
        for job in &doc.jobs {
            match job.status {
                JobStatus::Pending => depth.pending += 1,
                JobStatus::Running => depth.running += 1,
                JobStatus::Dead => depth.dead += 1,
                _ => {}
            }
        }
        Ok(depth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(action: &str) -> EnqueueJob {
        EnqueueJob {
            tenant_id: "tenant_alpha".into(),
            action_id: action.into(),
            request_id: "req_1".into(),
        }
    }

    #[tokio::test]
    async fn enqueue_is_idempotent_per_in_flight_action() {
        let queue = FileBackplane::in_memory(BackplaneSettings::default());
        let first = queue.enqueue(request("act_1")).await.unwrap();
        let second = queue.enqueue(request("act_1")).await.unwrap();
        assert_eq!(first.id, second.id);

        // A finished job no longer blocks a fresh enqueue.
        let claimed = queue.claim("w1", 10).await.unwrap();
        queue.complete(&claimed[0].id, "w1").await.unwrap();
        let third = queue.enqueue(request("act_1")).await.unwrap();
        assert_ne!(third.id, first.id);
    }

    #[tokio::test]
    async fn claim_orders_by_availability_then_age() {
        let queue = FileBackplane::in_memory(BackplaneSettings::default());
        queue.enqueue(request("act_1")).await.unwrap();
        queue.enqueue(request("act_2")).await.unwrap();
        queue.enqueue(request("act_3")).await.unwrap();

        let claimed = queue.claim("w1", 2).await.unwrap();
        assert_eq!(claimed.len(), 2);
        assert_eq!(claimed[0].action_id, "act_1");
        assert_eq!(claimed[1].action_id, "act_2");
        assert!(claimed.iter().all(|j| j.status == JobStatus::Running));
        assert!(claimed.iter().all(|j| j.attempt_count == 1));

        // Running jobs with a live lease are not re-claimable.
        let again = queue.claim("w2", 10).await.unwrap();
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].action_id, "act_3");
    }

    #[tokio::test]
    async fn expired_leases_are_reclaimed() {
        let queue = FileBackplane::in_memory(BackplaneSettings {
            lock_timeout_seconds: 0,
            ..Default::default()
        });
        queue.enqueue(request("act_1")).await.unwrap();
        let first = queue.claim("w1", 1).await.unwrap();
        assert_eq!(first.len(), 1);

        // Lease timeout of zero means the lock is immediately stale.
        let stolen = queue.claim("w2", 1).await.unwrap();
        assert_eq!(stolen.len(), 1);
        assert_eq!(stolen[0].attempt_count, 2);
        assert_eq!(stolen[0].locked_by.as_deref(), Some("w2"));

        // The original worker's completion is now a no-op.
        queue.complete(&first[0].id, "w1").await.unwrap();
        let depth = queue.depth().await.unwrap();
        assert_eq!(depth.running, 1);
    }

    #[tokio::test]
    async fn failures_retry_until_attempts_exhaust() {
        let queue = FileBackplane::in_memory(BackplaneSettings {
            max_attempts: 2,
            ..Default::default()
        });
        queue.enqueue(request("act_1")).await.unwrap();

        let first = queue.claim("w1", 1).await.unwrap();
        queue.fail(&first[0].id, "w1", "boom", 0).await.unwrap();
        let depth = queue.depth().await.unwrap();
        assert_eq!(depth.pending, 1);

        let second = queue.claim("w1", 1).await.unwrap();
        assert_eq!(second[0].attempt_count, 2);
        queue.fail(&second[0].id, "w1", "boom again", 0).await.unwrap();

        let depth = queue.depth().await.unwrap();
        assert_eq!(depth.pending, 0);
        assert_eq!(depth.dead, 1);
    }

    #[tokio::test]
    async fn queue_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.json");
        {
            let queue = FileBackplane::open(&path, BackplaneSettings::default()).await.unwrap();
            queue.enqueue(request("act_1")).await.unwrap();
        }
        let queue = FileBackplane::open(&path, BackplaneSettings::default()).await.unwrap();
        let claimed = queue.claim("w1", 10).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].action_id, "act_1");
    }
}
