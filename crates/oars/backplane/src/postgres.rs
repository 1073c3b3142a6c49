//! PostgreSQL backplane variant.
//!
//! Claims run inside a transaction with `FOR UPDATE SKIP LOCKED`, so any
//! number of worker processes can pull concurrently without handing the
//! same job out twice. A partial unique index on `action_id` enforces at
//! most one in-flight job per action.

use crate::{BackplaneDepth, BackplaneError, BackplaneSettings, EnqueueJob, ExecutionBackplane};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use oars_types::{prefixed_id, ExecutionJob, JobStatus};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;

pub struct PostgresBackplane {
    pool: PgPool,
    settings: BackplaneSettings,
}

impl PostgresBackplane {
    pub async fn connect(
        database_url: &str,
        settings: BackplaneSettings,
    ) -> Result<Self, BackplaneError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(std::time::Duration::from_secs(5))
            .connect(database_url)
            .await
            .map_err(|e| BackplaneError::Backend(format!("failed to connect postgres: {e}")))?;
        let backplane = Self { pool, settings };
        backplane.init_schema().await?;
        Ok(backplane)
    }

    pub async fn from_pool(
        pool: PgPool,
        settings: BackplaneSettings,
    ) -> Result<Self, BackplaneError> {
        let backplane = Self { pool, settings };
        backplane.init_schema().await?;
        Ok(backplane)
    }

    async fn init_schema(&self) -> Result<(), BackplaneError> {
        let ddl = [
            r#"
            CREATE TABLE IF NOT EXISTS oars_jobs (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                action_id TEXT NOT NULL,
                request_id TEXT NOT NULL,
                status TEXT NOT NULL,
                attempt_count INTEGER NOT NULL DEFAULT 0,
                max_attempts INTEGER NOT NULL,
                available_at TIMESTAMPTZ NOT NULL,
                locked_at TIMESTAMPTZ,
                locked_by TEXT,
                last_error TEXT,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_oars_jobs_due ON oars_jobs (status, available_at)",
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS uniq_oars_jobs_in_flight
                ON oars_jobs (action_id) WHERE status IN ('pending', 'running')
            "#,
        ];
        for stmt in ddl {
            sqlx::query(stmt)
                .execute(&self.pool)
                .await
                .map_err(|e| BackplaneError::Backend(format!("schema init failed: {e}")))?;
        }
        Ok(())
    }
}

fn row_to_job(row: &sqlx::postgres::PgRow) -> Result<ExecutionJob, BackplaneError> {
    let status: String = row.get("status");
    let status = match status.as_str() {
        "pending" => JobStatus::Pending,
        "running" => JobStatus::Running,
        "succeeded" => JobStatus::Succeeded,
        "failed" => JobStatus::Failed,
        "dead" => JobStatus::Dead,
        other => {
            return Err(BackplaneError::Serialization(format!(
                "unknown job status {other}"
            )))
        }
    };
    Ok(ExecutionJob {
        id: row.get("id"),
        tenant_id: row.get("tenant_id"),
        action_id: row.get("action_id"),
        request_id: row.get("request_id"),
        status,
        attempt_count: row.get::<i32, _>("attempt_count") as u32,
        max_attempts: row.get::<i32, _>("max_attempts") as u32,
        available_at: row.get::<DateTime<Utc>, _>("available_at"),
        locked_at: row.get::<Option<DateTime<Utc>>, _>("locked_at"),
        locked_by: row.get::<Option<String>, _>("locked_by"),
        last_error: row.get::<Option<String>, _>("last_error"),
        created_at: row.get::<DateTime<Utc>, _>("created_at"),
        updated_at: row.get::<DateTime<Utc>, _>("updated_at"),
    })
}

const JOB_COLUMNS: &str = "id, tenant_id, action_id, request_id, status, attempt_count, \
                           max_attempts, available_at, locked_at, locked_by, last_error, \
                           created_at, updated_at";

#[async_trait]
impl ExecutionBackplane for PostgresBackplane {
    async fn enqueue(&self, request: EnqueueJob) -> Result<ExecutionJob, BackplaneError> {
        let now = Utc::now();
        let id = prefixed_id("job");
        let inserted = sqlx::query(&format!(
            r#"
            INSERT INTO oars_jobs
                (id, tenant_id, action_id, request_id, status, attempt_count, max_attempts,
                 available_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, 'pending', 0, $5, $6, $6, $6)
            ON CONFLICT DO NOTHING
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(&id)
        .bind(&request.tenant_id)
        .bind(&request.action_id)
        .bind(&request.request_id)
        .bind(self.settings.max_attempts as i32)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| BackplaneError::Backend(e.to_string()))?;

        if let Some(row) = inserted {
            return row_to_job(&row);
        }

        // Lost the race to the partial unique index: hand back the job
        // already in flight for this action.
        let existing = sqlx::query(&format!(
            r#"
            SELECT {JOB_COLUMNS} FROM oars_jobs
             WHERE action_id = $1 AND status IN ('pending', 'running')
            "#
        ))
        .bind(&request.action_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| BackplaneError::Backend(e.to_string()))?;

        match existing {
            Some(row) => row_to_job(&row),
            None => Err(BackplaneError::Backend(format!(
                "enqueue for action {} conflicted but no in-flight job exists",
                request.action_id
            ))),
        }
    }

    async fn claim(
        &self,
        worker_id: &str,
        limit: usize,
    ) -> Result<Vec<ExecutionJob>, BackplaneError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| BackplaneError::Backend(e.to_string()))?;

        let ids: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT id FROM oars_jobs
             WHERE (status = 'pending' AND available_at <= NOW())
                OR (status = 'running' AND locked_at <= NOW() - make_interval(secs => $1))
             ORDER BY available_at ASC, created_at ASC
             LIMIT $2
             FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(self.settings.lock_timeout_seconds as f64)
        .bind(limit as i64)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| BackplaneError::Backend(e.to_string()))?;

        if ids.is_empty() {
            tx.commit()
                .await
                .map_err(|e| BackplaneError::Backend(e.to_string()))?;
            return Ok(Vec::new());
        }

        let rows = sqlx::query(&format!(
            r#"
            UPDATE oars_jobs
               SET status = 'running',
                   attempt_count = attempt_count + 1,
                   locked_at = NOW(),
                   locked_by = $1,
                   updated_at = NOW()
             WHERE id = ANY($2)
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(worker_id)
        .bind(&ids)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| BackplaneError::Backend(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| BackplaneError::Backend(e.to_string()))?;

        rows.iter().map(row_to_job).collect()
    }

    async fn complete(&self, job_id: &str, worker_id: &str) -> Result<(), BackplaneError> {
        sqlx::query(
            r#"
            UPDATE oars_jobs
               SET status = 'succeeded', locked_at = NULL, locked_by = NULL, updated_at = NOW()
             WHERE id = $1 AND locked_by = $2
            "#,
        )
        .bind(job_id)
        .bind(worker_id)
        .execute(&self.pool)
        .await
        .map_err(|e| BackplaneError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn fail(
        &self,
        job_id: &str,
        worker_id: &str,
        error: &str,
        retry_delay_seconds: u64,
    ) -> Result<(), BackplaneError> {
        sqlx::query(
            r#"
            UPDATE oars_jobs
               SET status = CASE WHEN attempt_count >= max_attempts THEN 'dead' ELSE 'pending' END,
                   available_at = CASE
                       WHEN attempt_count >= max_attempts THEN available_at
                       ELSE NOW() + make_interval(secs => $3)
                   END,
                   last_error = $4,
                   locked_at = NULL,
                   locked_by = NULL,
                   updated_at = NOW()
             WHERE id = $1 AND locked_by = $2
            "#,
        )
        .bind(job_id)
        .bind(worker_id)
        .bind(retry_delay_seconds as f64)
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(|e| BackplaneError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn depth(&self) -> Result<BackplaneDepth, BackplaneError> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS count FROM oars_jobs GROUP BY status")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| BackplaneError::Backend(e.to_string()))?;

        let mut depth = BackplaneDepth::default();
        for row in rows {
            let status: String = row.get("status");
            let count: i64 = row.get("count");
            match status.as_str() {
                "pending" => depth.pending = count as u64,
                "running" => depth.running = count as u64,
                "dead" => depth.dead = count as u64,
                _ => {}
            }
        }
        Ok(depth)
    }
}
