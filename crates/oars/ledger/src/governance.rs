//! Ledger retention governance.
//!
//! Per-tenant retention windows with legal hold. Applying a policy drives
//! the ledger's prune-and-archive path; a tenant under hold cannot be
//! pruned until the hold is released.

use crate::{ImmutableLedger, LedgerError, DEFAULT_RETENTION_DAYS};
use chrono::{DateTime, Utc};
use oars_store::RetentionStore;
use oars_types::{LedgerRetentionPolicy, PruneReport};
use std::sync::Arc;

pub struct RetentionService {
    store: Arc<dyn RetentionStore>,
    ledger: Arc<ImmutableLedger>,
}

impl RetentionService {
    pub fn new(store: Arc<dyn RetentionStore>, ledger: Arc<ImmutableLedger>) -> Self {
        Self { store, ledger }
    }

    /// The tenant's policy, or the platform default when none is set.
    pub async fn get_policy(
        &self,
        tenant_id: &str,
    ) -> Result<LedgerRetentionPolicy, LedgerError> {
        if let Some(policy) = self.store.get_retention(tenant_id).await? {
            return Ok(policy);
        }
        Ok(LedgerRetentionPolicy {
            tenant_id: tenant_id.to_string(),
            retention_days: DEFAULT_RETENTION_DAYS,
            legal_hold: false,
            reason: None,
            updated_at: Utc::now(),
            updated_by: "default".to_string(),
        })
    }

    pub async fn set_policy(
        &self,
        tenant_id: &str,
        retention_days: u32,
        legal_hold: bool,
        reason: Option<String>,
        updated_by: &str,
    ) -> Result<LedgerRetentionPolicy, LedgerError> {
        if retention_days < 1 {
            return Err(LedgerError::InvalidPolicy(
                "retention_days must be at least 1".to_string(),
            ));
        }
        let policy = LedgerRetentionPolicy {
            tenant_id: tenant_id.to_string(),
            retention_days,
            legal_hold,
            reason,
            updated_at: Utc::now(),
            updated_by: updated_by.to_string(),
        };
        self.store.upsert_retention(policy.clone()).await?;
        Ok(policy)
    }

    /// Prune the tenant's expired entries under its configured window.
    /// Fails while a legal hold is active.
    pub async fn apply_policy(
        &self,
        tenant_id: &str,
        now: Option<DateTime<Utc>>,
    ) -> Result<PruneReport, LedgerError> {
        let policy = self.get_policy(tenant_id).await?;
        if policy.legal_hold {
            return Err(LedgerError::LegalHold(format!(
                "tenant {} is under legal hold{}",
                tenant_id,
                policy
                    .reason
                    .as_deref()
                    .map(|r| format!(": {r}"))
                    .unwrap_or_default()
            )));
        }
        self.ledger
            .prune_tenant_entries(tenant_id, policy.retention_days, now)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oars_crypto::FieldProtection;
    use oars_store::file::FilePlatformStore;
    use oars_types::{prefixed_id, EventSeverity, SecurityEvent};

    async fn fixture() -> (RetentionService, Arc<ImmutableLedger>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Arc::new(
            ImmutableLedger::open(dir.path().join("ledger.ndjson")).await.unwrap(),
        );
        let store = Arc::new(FilePlatformStore::in_memory(FieldProtection::disabled()));
        let service = RetentionService::new(store, Arc::clone(&ledger));
        (service, ledger, dir)
    }

    fn old_event(tenant: &str, days_ago: i64) -> SecurityEvent {
        SecurityEvent {
            event_id: prefixed_id("evt"),
            tenant_id: tenant.to_string(),
            event_type: "test".into(),
            severity: EventSeverity::Info,
            actor: "system".into(),
            occurred_at: Utc::now() - chrono::Duration::days(days_ago),
            payload: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn default_policy_is_one_year_without_hold() {
        let (service, _ledger, _dir) = fixture().await;
        let policy = service.get_policy("tenant_alpha").await.unwrap();
        assert_eq!(policy.retention_days, DEFAULT_RETENTION_DAYS);
        assert!(!policy.legal_hold);
    }

    #[tokio::test]
    async fn legal_hold_blocks_apply_until_released() {
        let (service, ledger, _dir) = fixture().await;
        ledger.append_security_event(&old_event("tenant_alpha", 30)).await.unwrap();

        service
            .set_policy("tenant_alpha", 1, true, Some("litigation".into()), "admin_1")
            .await
            .unwrap();
        let held = service.apply_policy("tenant_alpha", None).await;
        assert!(matches!(held, Err(LedgerError::LegalHold(_))));

        service
            .set_policy("tenant_alpha", 1, false, None, "admin_1")
            .await
            .unwrap();
        let report = service
            .apply_policy("tenant_alpha", Some(Utc::now() + chrono::Duration::days(7)))
            .await
            .unwrap();
        assert_eq!(report.pruned_count, 1);

        let integrity = ledger.verify_integrity().await.unwrap();
        assert!(integrity.is_valid);
    }

    #[tokio::test]
    async fn zero_day_retention_is_rejected() {
        let (service, _ledger, _dir) = fixture().await;
        let result = service.set_policy("tenant_alpha", 0, false, None, "admin_1").await;
        assert!(matches!(result, Err(LedgerError::InvalidPolicy(_))));
    }
}
