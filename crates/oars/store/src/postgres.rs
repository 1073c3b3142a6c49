//! PostgreSQL adapter for the platform store.
//!
//! The transactional source-of-truth backend for multi-worker deployments.
//! Hot record families get their own tables with explicit filter columns;
//! administrative records share a namespaced JSONB table. Schema
//! initialization runs in code at connect time and a failure there is
//! fatal to startup.

use crate::traits::*;
use crate::{StoreError, StoreResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use oars_crypto::FieldProtection;
use oars_types::{
    ActionRecord, Alert, AlertRoutingRule, Approval, ApprovalWorkflow, ControlMapping,
    EvidenceEdge, EvidenceNode, IdempotencyRecord, LedgerRetentionPolicy, Page, PolicySet,
    Receipt, ScimGroup, ScimGroupMapping, ScimUser, SecurityEvent, ServiceAccount, SiemDeadLetter,
    TenantMember, TenantRecord, VaultSecret,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;

/// PostgreSQL-backed store adapter.
#[derive(Clone)]
pub struct PostgresPlatformStore {
    pool: PgPool,
    protection: FieldProtection,
}

impl PostgresPlatformStore {
    /// Connect to PostgreSQL and initialize required schema.
    pub async fn connect(
        database_url: &str,
        protection: FieldProtection,
    ) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(std::time::Duration::from_secs(5))
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Backend(format!("failed to connect postgres: {e}")))?;
        let store = Self { pool, protection };
        store.init_schema().await?;
        Ok(store)
    }

    /// Create adapter from an existing pool.
    pub async fn from_pool(pool: PgPool, protection: FieldProtection) -> StoreResult<Self> {
        let store = Self { pool, protection };
        store.init_schema().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn init_schema(&self) -> StoreResult<()> {
        let ddl = [
            r#"
            CREATE TABLE IF NOT EXISTS oars_actions (
                action_id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                state TEXT NOT NULL,
                record JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_oars_actions_tenant ON oars_actions (tenant_id, created_at DESC)",
            r#"
            CREATE TABLE IF NOT EXISTS oars_receipts (
                receipt_id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                action_id TEXT NOT NULL,
                occurred_at TIMESTAMPTZ NOT NULL,
                record JSONB NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_oars_receipts_action ON oars_receipts (tenant_id, action_id, occurred_at)",
            r#"
            CREATE TABLE IF NOT EXISTS oars_approvals (
                approval_id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                action_id TEXT NOT NULL,
                status TEXT NOT NULL,
                record JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )
            "#,
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS uniq_oars_approvals_open
                ON oars_approvals (action_id) WHERE status IN ('pending', 'escalated')
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS oars_policies (
                policy_id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                status TEXT NOT NULL,
                record JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL
            )
            "#,
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS uniq_oars_policies_published
                ON oars_policies (tenant_id) WHERE status = 'published'
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS oars_idempotency (
                tenant_id TEXT NOT NULL,
                subject TEXT NOT NULL,
                endpoint TEXT NOT NULL,
                idem_key TEXT NOT NULL,
                record JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                PRIMARY KEY (tenant_id, subject, endpoint, idem_key)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS oars_dead_letters (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                record JSONB NOT NULL,
                failed_at TIMESTAMPTZ NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS oars_security_events (
                event_id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                occurred_at TIMESTAMPTZ NOT NULL,
                record JSONB NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_oars_events_tenant ON oars_security_events (tenant_id, occurred_at DESC)",
            r#"
            CREATE TABLE IF NOT EXISTS oars_admin_records (
                namespace TEXT NOT NULL,
                tenant_id TEXT NOT NULL,
                key TEXT NOT NULL,
                record JSONB NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL,
                PRIMARY KEY (namespace, tenant_id, key)
            )
            "#,
        ];

        for stmt in ddl {
            sqlx::query(stmt)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::Backend(format!("schema init failed: {e}")))?;
        }
        Ok(())
    }

    fn encode<T: Serialize>(value: &T) -> StoreResult<serde_json::Value> {
        serde_json::to_value(value).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn decode<T: DeserializeOwned>(value: serde_json::Value) -> StoreResult<T> {
        serde_json::from_value(value).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    async fn upsert_admin<T: Serialize>(
        &self,
        namespace: &str,
        tenant_id: &str,
        key: &str,
        record: &T,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO oars_admin_records (namespace, tenant_id, key, record, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (namespace, tenant_id, key)
            DO UPDATE SET record = EXCLUDED.record, updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(namespace)
        .bind(tenant_id)
        .bind(key)
        .bind(Self::encode(record)?)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn get_admin<T: DeserializeOwned>(
        &self,
        namespace: &str,
        tenant_id: &str,
        key: &str,
    ) -> StoreResult<Option<T>> {
        let row = sqlx::query(
            "SELECT record FROM oars_admin_records WHERE namespace = $1 AND tenant_id = $2 AND key = $3",
        )
        .bind(namespace)
        .bind(tenant_id)
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        row.map(|row| Self::decode(row.get::<serde_json::Value, _>("record")))
            .transpose()
    }

    async fn delete_admin(
        &self,
        namespace: &str,
        tenant_id: &str,
        key: &str,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            "DELETE FROM oars_admin_records WHERE namespace = $1 AND tenant_id = $2 AND key = $3",
        )
        .bind(namespace)
        .bind(tenant_id)
        .bind(key)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_admin<T: DeserializeOwned>(
        &self,
        namespace: &str,
        tenant_id: &str,
    ) -> StoreResult<Vec<T>> {
        let rows = sqlx::query(
            r#"
            SELECT record FROM oars_admin_records
             WHERE namespace = $1 AND tenant_id = $2
             ORDER BY updated_at DESC
            "#,
        )
        .bind(namespace)
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        rows.into_iter()
            .map(|row| Self::decode(row.get::<serde_json::Value, _>("record")))
            .collect()
    }

    fn protect_action(&self, mut action: ActionRecord) -> ActionRecord {
        action.input = self.protection.protect(&action.input);
        action
    }

    fn restore_action(&self, mut action: ActionRecord) -> ActionRecord {
        action.input = self.protection.restore(&action.input);
        action
    }

    fn protect_secret(&self, mut secret: VaultSecret) -> VaultSecret {
        let wrapped = serde_json::json!({ "secret": secret.value });
        secret.value = self.protection.protect(&wrapped);
        secret
    }

    fn restore_secret(&self, mut secret: VaultSecret) -> VaultSecret {
        let restored = self.protection.restore(&secret.value);
        if let Some(inner) = restored.get("secret") {
            secret.value = inner.clone();
        } else {
            secret.value = restored;
        }
        secret
    }
}

fn map_conflict(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(ref db) = err {
        if db.is_unique_violation() {
            return StoreError::Conflict(db.message().to_string());
        }
    }
    StoreError::Backend(err.to_string())
}

fn to_i64(value: usize) -> StoreResult<i64> {
    i64::try_from(value).map_err(|_| StoreError::InvalidInput("window out of range".into()))
}

#[async_trait]
impl ActionStore for PostgresPlatformStore {
    async fn create_action(&self, action: ActionRecord) -> StoreResult<()> {
        let action = self.protect_action(action);
        sqlx::query(
            r#"
            INSERT INTO oars_actions (action_id, tenant_id, state, record, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&action.action_id)
        .bind(&action.tenant_id)
        .bind(action.state.as_str())
        .bind(Self::encode(&action)?)
        .bind(action.created_at)
        .bind(action.updated_at)
        .execute(&self.pool)
        .await
        .map_err(map_conflict)?;
        Ok(())
    }

    async fn update_action(&self, action: ActionRecord) -> StoreResult<()> {
        let action = self.protect_action(action);
        let result = sqlx::query(
            r#"
            UPDATE oars_actions
               SET state = $1, record = $2, updated_at = $3
             WHERE action_id = $4 AND tenant_id = $5
            "#,
        )
        .bind(action.state.as_str())
        .bind(Self::encode(&action)?)
        .bind(action.updated_at)
        .bind(&action.action_id)
        .bind(&action.tenant_id)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!(
                "action {} not found",
                action.action_id
            )));
        }
        Ok(())
    }

    async fn get_action(
        &self,
        tenant_id: &str,
        action_id: &str,
    ) -> StoreResult<Option<ActionRecord>> {
        let row = sqlx::query(
            "SELECT record FROM oars_actions WHERE tenant_id = $1 AND action_id = $2",
        )
        .bind(tenant_id)
        .bind(action_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        row.map(|row| {
            Self::decode::<ActionRecord>(row.get::<serde_json::Value, _>("record"))
                .map(|a| self.restore_action(a))
        })
        .transpose()
    }

    async fn list_actions(
        &self,
        tenant_id: &str,
        window: QueryWindow,
    ) -> StoreResult<Page<ActionRecord>> {
        let total: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM oars_actions WHERE tenant_id = $1")
                .bind(tenant_id)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?;

        let limit = if window.limit == 0 {
            i64::MAX
        } else {
            to_i64(window.limit)?
        };
        let rows = sqlx::query(
            r#"
            SELECT record FROM oars_actions
             WHERE tenant_id = $1
             ORDER BY created_at DESC
             LIMIT $2 OFFSET $3
            "#,
        )
        .bind(tenant_id)
        .bind(limit)
        .bind(to_i64(window.offset)?)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        let items = rows
            .into_iter()
            .map(|row| {
                Self::decode::<ActionRecord>(row.get::<serde_json::Value, _>("record"))
                    .map(|a| self.restore_action(a))
            })
            .collect::<StoreResult<Vec<_>>>()?;
        Ok(Page {
            items,
            total: total as usize,
        })
    }
}

#[async_trait]
impl ReceiptStore for PostgresPlatformStore {
    async fn insert_receipt(&self, receipt: Receipt) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO oars_receipts (receipt_id, tenant_id, action_id, occurred_at, record)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&receipt.receipt_id)
        .bind(&receipt.tenant_id)
        .bind(&receipt.action_id)
        .bind(receipt.timestamp)
        .bind(Self::encode(&receipt)?)
        .execute(&self.pool)
        .await
        .map_err(map_conflict)?;
        Ok(())
    }

    async fn get_receipt(
        &self,
        tenant_id: &str,
        receipt_id: &str,
    ) -> StoreResult<Option<Receipt>> {
        let row = sqlx::query(
            "SELECT record FROM oars_receipts WHERE tenant_id = $1 AND receipt_id = $2",
        )
        .bind(tenant_id)
        .bind(receipt_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        row.map(|row| Self::decode(row.get::<serde_json::Value, _>("record")))
            .transpose()
    }

    async fn list_receipts_for_action(
        &self,
        tenant_id: &str,
        action_id: &str,
    ) -> StoreResult<Vec<Receipt>> {
        let rows = sqlx::query(
            r#"
            SELECT record FROM oars_receipts
             WHERE tenant_id = $1 AND action_id = $2
             ORDER BY occurred_at ASC
            "#,
        )
        .bind(tenant_id)
        .bind(action_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        rows.into_iter()
            .map(|row| Self::decode(row.get::<serde_json::Value, _>("record")))
            .collect()
    }

    async fn list_receipts(
        &self,
        tenant_id: &str,
        window: QueryWindow,
    ) -> StoreResult<Page<Receipt>> {
        let total: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM oars_receipts WHERE tenant_id = $1")
                .bind(tenant_id)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?;

        let limit = if window.limit == 0 {
            i64::MAX
        } else {
            to_i64(window.limit)?
        };
        let rows = sqlx::query(
            r#"
            SELECT record FROM oars_receipts
             WHERE tenant_id = $1
             ORDER BY occurred_at DESC
             LIMIT $2 OFFSET $3
            "#,
        )
        .bind(tenant_id)
        .bind(limit)
        .bind(to_i64(window.offset)?)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        let items = rows
            .into_iter()
            .map(|row| Self::decode(row.get::<serde_json::Value, _>("record")))
            .collect::<StoreResult<Vec<_>>>()?;
        Ok(Page {
            items,
            total: total as usize,
        })
    }
}

#[async_trait]
impl ApprovalStore for PostgresPlatformStore {
    async fn insert_approval(&self, approval: Approval) -> StoreResult<()> {
        let status = serde_json::to_value(approval.status)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| "pending".to_string());
        sqlx::query(
            r#"
            INSERT INTO oars_approvals
                (approval_id, tenant_id, action_id, status, record, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(&approval.approval_id)
        .bind(&approval.tenant_id)
        .bind(&approval.action_id)
        .bind(status)
        .bind(Self::encode(&approval)?)
        .bind(approval.created_at)
        .bind(approval.updated_at)
        .execute(&self.pool)
        .await
        .map_err(map_conflict)?;
        Ok(())
    }

    async fn update_approval(&self, approval: Approval) -> StoreResult<()> {
        let status = serde_json::to_value(approval.status)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| "pending".to_string());
        let result = sqlx::query(
            r#"
            UPDATE oars_approvals
               SET status = $1, record = $2, updated_at = $3
             WHERE approval_id = $4
            "#,
        )
        .bind(status)
        .bind(Self::encode(&approval)?)
        .bind(approval.updated_at)
        .bind(&approval.approval_id)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!(
                "approval {} not found",
                approval.approval_id
            )));
        }
        Ok(())
    }

    async fn get_approval(
        &self,
        tenant_id: &str,
        approval_id: &str,
    ) -> StoreResult<Option<Approval>> {
        let row = sqlx::query(
            "SELECT record FROM oars_approvals WHERE tenant_id = $1 AND approval_id = $2",
        )
        .bind(tenant_id)
        .bind(approval_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        row.map(|row| Self::decode(row.get::<serde_json::Value, _>("record")))
            .transpose()
    }

    async fn find_open_by_action(
        &self,
        tenant_id: &str,
        action_id: &str,
    ) -> StoreResult<Option<Approval>> {
        let row = sqlx::query(
            r#"
            SELECT record FROM oars_approvals
             WHERE tenant_id = $1 AND action_id = $2 AND status IN ('pending', 'escalated')
            "#,
        )
        .bind(tenant_id)
        .bind(action_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        row.map(|row| Self::decode(row.get::<serde_json::Value, _>("record")))
            .transpose()
    }

    async fn list_open_approvals(&self, tenant_id: &str) -> StoreResult<Vec<Approval>> {
        let rows = sqlx::query(
            r#"
            SELECT record FROM oars_approvals
             WHERE tenant_id = $1 AND status IN ('pending', 'escalated')
            "#,
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        rows.into_iter()
            .map(|row| Self::decode(row.get::<serde_json::Value, _>("record")))
            .collect()
    }

    async fn list_approvals(
        &self,
        tenant_id: &str,
        window: QueryWindow,
    ) -> StoreResult<Page<Approval>> {
        let total: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM oars_approvals WHERE tenant_id = $1")
                .bind(tenant_id)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?;

        let limit = if window.limit == 0 {
            i64::MAX
        } else {
            to_i64(window.limit)?
        };
        let rows = sqlx::query(
            r#"
            SELECT record FROM oars_approvals
             WHERE tenant_id = $1
             ORDER BY created_at DESC
             LIMIT $2 OFFSET $3
            "#,
        )
        .bind(tenant_id)
        .bind(limit)
        .bind(to_i64(window.offset)?)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        let items = rows
            .into_iter()
            .map(|row| Self::decode(row.get::<serde_json::Value, _>("record")))
            .collect::<StoreResult<Vec<_>>>()?;
        Ok(Page {
            items,
            total: total as usize,
        })
    }
}

#[async_trait]
impl WorkflowStore for PostgresPlatformStore {
    async fn upsert_workflow(&self, workflow: ApprovalWorkflow) -> StoreResult<()> {
        self.upsert_admin("workflow", &workflow.tenant_id, "default", &workflow)
            .await
    }

    async fn get_workflow(&self, tenant_id: &str) -> StoreResult<Option<ApprovalWorkflow>> {
        self.get_admin("workflow", tenant_id, "default").await
    }
}

#[async_trait]
impl PolicyStore for PostgresPlatformStore {
    async fn insert_policy(&self, policy: PolicySet) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO oars_policies (policy_id, tenant_id, status, record, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&policy.policy_id)
        .bind(&policy.tenant_id)
        .bind(policy_status_str(&policy))
        .bind(Self::encode(&policy)?)
        .bind(policy.created_at)
        .execute(&self.pool)
        .await
        .map_err(map_conflict)?;
        Ok(())
    }

    async fn update_policy(&self, policy: PolicySet) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE oars_policies
               SET status = $1, record = $2
             WHERE policy_id = $3
            "#,
        )
        .bind(policy_status_str(&policy))
        .bind(Self::encode(&policy)?)
        .bind(&policy.policy_id)
        .execute(&self.pool)
        .await
        .map_err(map_conflict)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!(
                "policy {} not found",
                policy.policy_id
            )));
        }
        Ok(())
    }

    async fn get_policy(
        &self,
        tenant_id: &str,
        policy_id: &str,
    ) -> StoreResult<Option<PolicySet>> {
        let row = sqlx::query(
            "SELECT record FROM oars_policies WHERE tenant_id = $1 AND policy_id = $2",
        )
        .bind(tenant_id)
        .bind(policy_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        row.map(|row| Self::decode(row.get::<serde_json::Value, _>("record")))
            .transpose()
    }

    async fn find_published_policy(&self, tenant_id: &str) -> StoreResult<Option<PolicySet>> {
        let row = sqlx::query(
            "SELECT record FROM oars_policies WHERE tenant_id = $1 AND status = 'published'",
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        row.map(|row| Self::decode(row.get::<serde_json::Value, _>("record")))
            .transpose()
    }

    async fn set_published_policy(
        &self,
        tenant_id: &str,
        policy_id: &str,
    ) -> StoreResult<Option<String>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        let demoted: Option<String> = sqlx::query_scalar(
            r#"
            UPDATE oars_policies
               SET status = 'draft',
                   record = jsonb_set(record, '{status}', '"draft"')
             WHERE tenant_id = $1 AND status = 'published' AND policy_id <> $2
             RETURNING policy_id
            "#,
        )
        .bind(tenant_id)
        .bind(policy_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        let promoted = sqlx::query(
            r#"
            UPDATE oars_policies
               SET status = 'published',
                   record = jsonb_set(record, '{status}', '"published"')
             WHERE tenant_id = $1 AND policy_id = $2
            "#,
        )
        .bind(tenant_id)
        .bind(policy_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        if promoted.rows_affected() == 0 {
            tx.rollback()
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?;
            return Err(StoreError::NotFound(format!("policy {policy_id} not found")));
        }

        tx.commit()
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(demoted)
    }

    async fn list_policies(
        &self,
        tenant_id: &str,
        window: QueryWindow,
    ) -> StoreResult<Page<PolicySet>> {
        let total: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM oars_policies WHERE tenant_id = $1")
                .bind(tenant_id)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?;

        let limit = if window.limit == 0 {
            i64::MAX
        } else {
            to_i64(window.limit)?
        };
        let rows = sqlx::query(
            r#"
            SELECT record FROM oars_policies
             WHERE tenant_id = $1
             ORDER BY created_at DESC
             LIMIT $2 OFFSET $3
            "#,
        )
        .bind(tenant_id)
        .bind(limit)
        .bind(to_i64(window.offset)?)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        let items = rows
            .into_iter()
            .map(|row| Self::decode(row.get::<serde_json::Value, _>("record")))
            .collect::<StoreResult<Vec<_>>>()?;
        Ok(Page {
            items,
            total: total as usize,
        })
    }
}

fn policy_status_str(policy: &PolicySet) -> &'static str {
    match policy.status {
        oars_types::PolicyStatus::Draft => "draft",
        oars_types::PolicyStatus::Published => "published",
    }
}

#[async_trait]
impl VaultStore for PostgresPlatformStore {
    async fn put_secret(&self, secret: VaultSecret) -> StoreResult<()> {
        let key = format!("{}/{}", secret.tool_id, secret.name);
        let tenant = secret.tenant_id.clone();
        let protected = self.protect_secret(secret);
        self.upsert_admin("vault_secret", &tenant, &key, &protected).await
    }

    async fn get_secret(
        &self,
        tenant_id: &str,
        tool_id: &str,
        name: &str,
    ) -> StoreResult<Option<VaultSecret>> {
        let key = format!("{tool_id}/{name}");
        let secret: Option<VaultSecret> =
            self.get_admin("vault_secret", tenant_id, &key).await?;
        Ok(secret.map(|s| self.restore_secret(s)))
    }

    async fn delete_secret(
        &self,
        tenant_id: &str,
        tool_id: &str,
        name: &str,
    ) -> StoreResult<bool> {
        let key = format!("{tool_id}/{name}");
        self.delete_admin("vault_secret", tenant_id, &key).await
    }

    async fn list_secrets(&self, tenant_id: &str) -> StoreResult<Vec<VaultSecret>> {
        let secrets: Vec<VaultSecret> = self.list_admin("vault_secret", tenant_id).await?;
        Ok(secrets
            .into_iter()
            .map(|s| self.restore_secret(s))
            .collect())
    }
}

#[async_trait]
impl RetentionStore for PostgresPlatformStore {
    async fn upsert_retention(&self, policy: LedgerRetentionPolicy) -> StoreResult<()> {
        self.upsert_admin("retention", &policy.tenant_id, "default", &policy)
            .await
    }

    async fn get_retention(
        &self,
        tenant_id: &str,
    ) -> StoreResult<Option<LedgerRetentionPolicy>> {
        self.get_admin("retention", tenant_id, "default").await
    }
}

#[async_trait]
impl DeadLetterStore for PostgresPlatformStore {
    async fn insert_dead_letter(&self, dead_letter: SiemDeadLetter) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO oars_dead_letters (id, tenant_id, record, failed_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(&dead_letter.id)
        .bind(&dead_letter.tenant_id)
        .bind(Self::encode(&dead_letter)?)
        .bind(dead_letter.failed_at)
        .execute(&self.pool)
        .await
        .map_err(map_conflict)?;
        Ok(())
    }

    async fn update_dead_letter(&self, dead_letter: SiemDeadLetter) -> StoreResult<()> {
        let result = sqlx::query("UPDATE oars_dead_letters SET record = $1 WHERE id = $2")
            .bind(Self::encode(&dead_letter)?)
            .bind(&dead_letter.id)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!(
                "dead letter {} not found",
                dead_letter.id
            )));
        }
        Ok(())
    }

    async fn get_dead_letter(
        &self,
        tenant_id: &str,
        id: &str,
    ) -> StoreResult<Option<SiemDeadLetter>> {
        let row = sqlx::query(
            "SELECT record FROM oars_dead_letters WHERE tenant_id = $1 AND id = $2",
        )
        .bind(tenant_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        row.map(|row| Self::decode(row.get::<serde_json::Value, _>("record")))
            .transpose()
    }

    async fn list_dead_letters(
        &self,
        tenant_id: &str,
        window: QueryWindow,
    ) -> StoreResult<Page<SiemDeadLetter>> {
        let total: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM oars_dead_letters WHERE tenant_id = $1")
                .bind(tenant_id)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?;

        let limit = if window.limit == 0 {
            i64::MAX
        } else {
            to_i64(window.limit)?
        };
        let rows = sqlx::query(
            r#"
            SELECT record FROM oars_dead_letters
             WHERE tenant_id = $1
             ORDER BY failed_at DESC
             LIMIT $2 OFFSET $3
            "#,
        )
        .bind(tenant_id)
        .bind(limit)
        .bind(to_i64(window.offset)?)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        let items = rows
            .into_iter()
            .map(|row| Self::decode(row.get::<serde_json::Value, _>("record")))
            .collect::<StoreResult<Vec<_>>>()?;
        Ok(Page {
            items,
            total: total as usize,
        })
    }
}

#[async_trait]
impl IdempotencyStore for PostgresPlatformStore {
    async fn put_idempotency(&self, record: IdempotencyRecord) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO oars_idempotency
                (tenant_id, subject, endpoint, idem_key, record, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&record.tenant_id)
        .bind(&record.subject)
        .bind(&record.endpoint)
        .bind(&record.key)
        .bind(Self::encode(&record)?)
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .map_err(map_conflict)?;
        Ok(())
    }

    async fn get_idempotency(
        &self,
        tenant_id: &str,
        subject: &str,
        endpoint: &str,
        key: &str,
    ) -> StoreResult<Option<IdempotencyRecord>> {
        let row = sqlx::query(
            r#"
            SELECT record FROM oars_idempotency
             WHERE tenant_id = $1 AND subject = $2 AND endpoint = $3 AND idem_key = $4
            "#,
        )
        .bind(tenant_id)
        .bind(subject)
        .bind(endpoint)
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        row.map(|row| Self::decode(row.get::<serde_json::Value, _>("record")))
            .transpose()
    }

    async fn prune_idempotency(&self, older_than: DateTime<Utc>) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM oars_idempotency WHERE created_at < $1")
            .bind(older_than)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl EventStore for PostgresPlatformStore {
    async fn insert_event(&self, event: SecurityEvent) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO oars_security_events (event_id, tenant_id, occurred_at, record)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(&event.event_id)
        .bind(&event.tenant_id)
        .bind(event.occurred_at)
        .bind(Self::encode(&event)?)
        .execute(&self.pool)
        .await
        .map_err(map_conflict)?;
        Ok(())
    }

    async fn list_events(
        &self,
        tenant_id: &str,
        window: QueryWindow,
    ) -> StoreResult<Page<SecurityEvent>> {
        let total: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM oars_security_events WHERE tenant_id = $1")
                .bind(tenant_id)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?;

        let limit = if window.limit == 0 {
            i64::MAX
        } else {
            to_i64(window.limit)?
        };
        let rows = sqlx::query(
            r#"
            SELECT record FROM oars_security_events
             WHERE tenant_id = $1
             ORDER BY occurred_at DESC
             LIMIT $2 OFFSET $3
            "#,
        )
        .bind(tenant_id)
        .bind(limit)
        .bind(to_i64(window.offset)?)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        let items = rows
            .into_iter()
            .map(|row| Self::decode(row.get::<serde_json::Value, _>("record")))
            .collect::<StoreResult<Vec<_>>>()?;
        Ok(Page {
            items,
            total: total as usize,
        })
    }
}

#[async_trait]
impl AlertStore for PostgresPlatformStore {
    async fn insert_alert(&self, alert: Alert) -> StoreResult<()> {
        self.upsert_admin("alert", &alert.tenant_id, &alert.alert_id, &alert)
            .await
    }

    async fn list_alerts(
        &self,
        tenant_id: &str,
        window: QueryWindow,
    ) -> StoreResult<Page<Alert>> {
        let mut items: Vec<Alert> = self.list_admin("alert", tenant_id).await?;
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let total = items.len();
        let items = if window.limit == 0 {
            items.into_iter().skip(window.offset).collect()
        } else {
            items
                .into_iter()
                .skip(window.offset)
                .take(window.limit)
                .collect()
        };
        Ok(Page { items, total })
    }

    async fn upsert_alert_rule(&self, rule: AlertRoutingRule) -> StoreResult<()> {
        self.upsert_admin("alert_rule", &rule.tenant_id, &rule.rule_id, &rule)
            .await
    }

    async fn delete_alert_rule(&self, tenant_id: &str, rule_id: &str) -> StoreResult<bool> {
        self.delete_admin("alert_rule", tenant_id, rule_id).await
    }

    async fn list_alert_rules(&self, tenant_id: &str) -> StoreResult<Vec<AlertRoutingRule>> {
        self.list_admin("alert_rule", tenant_id).await
    }
}

#[async_trait]
impl DirectoryStore for PostgresPlatformStore {
    async fn upsert_tenant(&self, tenant: TenantRecord) -> StoreResult<()> {
        self.upsert_admin("tenant", &tenant.tenant_id, "record", &tenant)
            .await
    }

    async fn get_tenant(&self, tenant_id: &str) -> StoreResult<Option<TenantRecord>> {
        self.get_admin("tenant", tenant_id, "record").await
    }

    async fn list_tenants(&self, window: QueryWindow) -> StoreResult<Page<TenantRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT record FROM oars_admin_records
             WHERE namespace = 'tenant'
             ORDER BY updated_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        let mut items = rows
            .into_iter()
            .map(|row| Self::decode::<TenantRecord>(row.get::<serde_json::Value, _>("record")))
            .collect::<StoreResult<Vec<_>>>()?;
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let total = items.len();
        let items = if window.limit == 0 {
            items.into_iter().skip(window.offset).collect()
        } else {
            items
                .into_iter()
                .skip(window.offset)
                .take(window.limit)
                .collect()
        };
        Ok(Page { items, total })
    }

    async fn upsert_member(&self, member: TenantMember) -> StoreResult<()> {
        self.upsert_admin("member", &member.tenant_id, &member.subject, &member)
            .await
    }

    async fn remove_member(&self, tenant_id: &str, subject: &str) -> StoreResult<bool> {
        self.delete_admin("member", tenant_id, subject).await
    }

    async fn list_members(&self, tenant_id: &str) -> StoreResult<Vec<TenantMember>> {
        self.list_admin("member", tenant_id).await
    }

    async fn insert_service_account(&self, account: ServiceAccount) -> StoreResult<()> {
        if self
            .get_admin::<ServiceAccount>("service_account", &account.tenant_id, &account.account_id)
            .await?
            .is_some()
        {
            return Err(StoreError::Conflict(format!(
                "service account {} already exists",
                account.account_id
            )));
        }
        self.upsert_admin(
            "service_account",
            &account.tenant_id,
            &account.account_id,
            &account,
        )
        .await
    }

    async fn update_service_account(&self, account: ServiceAccount) -> StoreResult<()> {
        if self
            .get_admin::<ServiceAccount>("service_account", &account.tenant_id, &account.account_id)
            .await?
            .is_none()
        {
            return Err(StoreError::NotFound(format!(
                "service account {} not found",
                account.account_id
            )));
        }
        self.upsert_admin(
            "service_account",
            &account.tenant_id,
            &account.account_id,
            &account,
        )
        .await
    }

    async fn get_service_account(
        &self,
        tenant_id: &str,
        account_id: &str,
    ) -> StoreResult<Option<ServiceAccount>> {
        self.get_admin("service_account", tenant_id, account_id).await
    }

    async fn list_service_accounts(&self, tenant_id: &str) -> StoreResult<Vec<ServiceAccount>> {
        self.list_admin("service_account", tenant_id).await
    }

    async fn upsert_scim_user(&self, user: ScimUser) -> StoreResult<()> {
        self.upsert_admin("scim_user", &user.tenant_id, &user.user_id, &user)
            .await
    }

    async fn get_scim_user(
        &self,
        tenant_id: &str,
        user_id: &str,
    ) -> StoreResult<Option<ScimUser>> {
        self.get_admin("scim_user", tenant_id, user_id).await
    }

    async fn list_scim_users(&self, tenant_id: &str) -> StoreResult<Vec<ScimUser>> {
        self.list_admin("scim_user", tenant_id).await
    }

    async fn upsert_scim_group(&self, group: ScimGroup) -> StoreResult<()> {
        self.upsert_admin("scim_group", &group.tenant_id, &group.group_id, &group)
            .await
    }

    async fn get_scim_group(
        &self,
        tenant_id: &str,
        group_id: &str,
    ) -> StoreResult<Option<ScimGroup>> {
        self.get_admin("scim_group", tenant_id, group_id).await
    }

    async fn list_scim_groups(&self, tenant_id: &str) -> StoreResult<Vec<ScimGroup>> {
        self.list_admin("scim_group", tenant_id).await
    }

    async fn upsert_scim_mapping(&self, mapping: ScimGroupMapping) -> StoreResult<()> {
        self.upsert_admin(
            "scim_mapping",
            &mapping.tenant_id,
            &mapping.group_id,
            &mapping,
        )
        .await
    }

    async fn list_scim_mappings(&self, tenant_id: &str) -> StoreResult<Vec<ScimGroupMapping>> {
        self.list_admin("scim_mapping", tenant_id).await
    }
}

#[async_trait]
impl EvidenceStore for PostgresPlatformStore {
    async fn upsert_evidence_node(&self, node: EvidenceNode) -> StoreResult<()> {
        self.upsert_admin("evidence_node", &node.tenant_id, &node.node_id, &node)
            .await
    }

    async fn insert_evidence_edge(&self, edge: EvidenceEdge) -> StoreResult<()> {
        self.upsert_admin("evidence_edge", &edge.tenant_id, &edge.edge_id, &edge)
            .await
    }

    async fn evidence_neighbors(
        &self,
        tenant_id: &str,
        node_id: &str,
    ) -> StoreResult<Vec<EvidenceEdge>> {
        let edges: Vec<EvidenceEdge> = self.list_admin("evidence_edge", tenant_id).await?;
        Ok(edges
            .into_iter()
            .filter(|e| e.from_id == node_id || e.to_id == node_id)
            .collect())
    }

    async fn list_evidence_edges(
        &self,
        tenant_id: &str,
        window: QueryWindow,
    ) -> StoreResult<Page<EvidenceEdge>> {
        let mut items: Vec<EvidenceEdge> = self.list_admin("evidence_edge", tenant_id).await?;
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let total = items.len();
        let items = if window.limit == 0 {
            items.into_iter().skip(window.offset).collect()
        } else {
            items
                .into_iter()
                .skip(window.offset)
                .take(window.limit)
                .collect()
        };
        Ok(Page { items, total })
    }
}

#[async_trait]
impl ControlStore for PostgresPlatformStore {
    async fn upsert_control_mapping(&self, mapping: ControlMapping) -> StoreResult<()> {
        self.upsert_admin(
            "control_mapping",
            &mapping.tenant_id,
            &mapping.mapping_id,
            &mapping,
        )
        .await
    }

    async fn delete_control_mapping(
        &self,
        tenant_id: &str,
        mapping_id: &str,
    ) -> StoreResult<bool> {
        self.delete_admin("control_mapping", tenant_id, mapping_id).await
    }

    async fn list_control_mappings(&self, tenant_id: &str) -> StoreResult<Vec<ControlMapping>> {
        self.list_admin("control_mapping", tenant_id).await
    }
}
