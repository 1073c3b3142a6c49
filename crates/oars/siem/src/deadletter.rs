//! Dead-letter storage and tenant-scoped administration.

use crate::delivery::SiemDeliveryService;
use async_trait::async_trait;
use chrono::Utc;
use oars_store::{DeadLetterStore, QueryWindow};
use oars_types::{
    prefixed_id, DeadLetterStatus, OarsError, Page, RetryQueueItem, SiemDeadLetter,
};
use std::sync::Arc;
use tracing::warn;

/// Where retry items go when their retries are exhausted.
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    async fn dead_letter(&self, item: RetryQueueItem);
}

/// Persists dead letters into the platform store.
pub struct StoreDeadLetterSink {
    store: Arc<dyn DeadLetterStore>,
}

impl StoreDeadLetterSink {
    pub fn new(store: Arc<dyn DeadLetterStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl DeadLetterSink for StoreDeadLetterSink {
    async fn dead_letter(&self, item: RetryQueueItem) {
        let dead_letter = SiemDeadLetter {
            id: prefixed_id("dlq"),
            tenant_id: item.event.tenant_id.clone(),
            target_id: item.target_id,
            event_id: item.event.event_id.clone(),
            event: item.event,
            attempts: item.attempts,
            last_error: item.last_error,
            failed_at: Utc::now(),
            replay_count: 0,
            status: DeadLetterStatus::Open,
            updated_at: Utc::now(),
        };
        if let Err(error) = self.store.insert_dead_letter(dead_letter).await {
            warn!(%error, "failed to persist siem dead letter");
        }
    }
}

/// Tenant-scoped dead-letter operations. Cross-tenant ids fail NotFound.
pub struct DeadLetterAdmin {
    store: Arc<dyn DeadLetterStore>,
    delivery: Arc<SiemDeliveryService>,
}

impl DeadLetterAdmin {
    pub fn new(store: Arc<dyn DeadLetterStore>, delivery: Arc<SiemDeliveryService>) -> Self {
        Self { store, delivery }
    }

    pub async fn list(
        &self,
        tenant_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Page<SiemDeadLetter>, OarsError> {
        Ok(self
            .store
            .list_dead_letters(tenant_id, QueryWindow { limit, offset })
            .await?)
    }

    /// Re-send the dead-lettered event to its original target.
    pub async fn replay(&self, tenant_id: &str, id: &str) -> Result<SiemDeadLetter, OarsError> {
        let mut dead_letter = self
            .store
            .get_dead_letter(tenant_id, id)
            .await?
            .ok_or_else(|| OarsError::NotFound(format!("dead letter {id} not found")))?;

        self.delivery
            .replay_to_target(&dead_letter.target_id, &dead_letter.event)
            .await
            .map_err(OarsError::UpstreamFailure)?;

        dead_letter.replay_count += 1;
        dead_letter.status = DeadLetterStatus::Replayed;
        dead_letter.updated_at = Utc::now();
        self.store.update_dead_letter(dead_letter.clone()).await?;
        Ok(dead_letter)
    }

    /// Mark a dead letter handled without re-sending it.
    pub async fn resolve(&self, tenant_id: &str, id: &str) -> Result<SiemDeadLetter, OarsError> {
        let mut dead_letter = self
            .store
            .get_dead_letter(tenant_id, id)
            .await?
            .ok_or_else(|| OarsError::NotFound(format!("dead letter {id} not found")))?;
        dead_letter.status = DeadLetterStatus::Resolved;
        dead_letter.updated_at = Utc::now();
        self.store.update_dead_letter(dead_letter.clone()).await?;
        Ok(dead_letter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::RetrySettings;
    use crate::transport::{DeliveryRequest, SiemTransport};
    use oars_crypto::FieldProtection;
    use oars_store::file::FilePlatformStore;
    use oars_types::{EventSeverity, SecurityEvent, SiemTargetConfig};

    struct AlwaysOk;

    #[async_trait]
    impl SiemTransport for AlwaysOk {
        async fn send(&self, _request: &DeliveryRequest) -> Result<(), String> {
            Ok(())
        }
    }

    fn dead_letter(tenant: &str) -> SiemDeadLetter {
        let event = SecurityEvent {
            event_id: prefixed_id("evt"),
            tenant_id: tenant.to_string(),
            event_type: "action.failed".into(),
            severity: EventSeverity::Warning,
            actor: "system".into(),
            occurred_at: Utc::now(),
            payload: serde_json::json!({}),
        };
        SiemDeadLetter {
            id: prefixed_id("dlq"),
            tenant_id: tenant.to_string(),
            target_id: "hook1".into(),
            event_id: event.event_id.clone(),
            event,
            attempts: 5,
            last_error: "connection refused".into(),
            failed_at: Utc::now(),
            replay_count: 0,
            status: DeadLetterStatus::Open,
            updated_at: Utc::now(),
        }
    }

    async fn admin_fixture() -> (DeadLetterAdmin, Arc<FilePlatformStore>) {
        let store = Arc::new(FilePlatformStore::in_memory(FieldProtection::disabled()));
        let delivery = Arc::new(
            SiemDeliveryService::new(
                vec![SiemTargetConfig::GenericWebhook {
                    id: "hook1".into(),
                    url: "https://siem.example.com".into(),
                    auth_header: None,
                }],
                Arc::new(AlwaysOk),
                RetrySettings::default(),
                None,
                None,
            )
            .await
            .unwrap(),
        );
        (
            DeadLetterAdmin::new(store.clone(), delivery),
            store,
        )
    }

    #[tokio::test]
    async fn replay_marks_replayed_and_counts() {
        let (admin, store) = admin_fixture().await;
        let dl = dead_letter("tenant_alpha");
        store.insert_dead_letter(dl.clone()).await.unwrap();

        let replayed = admin.replay("tenant_alpha", &dl.id).await.unwrap();
        assert_eq!(replayed.status, DeadLetterStatus::Replayed);
        assert_eq!(replayed.replay_count, 1);
    }

    #[tokio::test]
    async fn cross_tenant_access_fails_not_found() {
        let (admin, store) = admin_fixture().await;
        let dl = dead_letter("tenant_alpha");
        store.insert_dead_letter(dl.clone()).await.unwrap();

        let replay = admin.replay("tenant_beta", &dl.id).await;
        assert!(matches!(replay, Err(OarsError::NotFound(_))));
        let resolve = admin.resolve("tenant_beta", &dl.id).await;
        assert!(matches!(resolve, Err(OarsError::NotFound(_))));
    }

    #[tokio::test]
    async fn resolve_closes_the_dead_letter() {
        let (admin, store) = admin_fixture().await;
        let dl = dead_letter("tenant_alpha");
        store.insert_dead_letter(dl.clone()).await.unwrap();

        let resolved = admin.resolve("tenant_alpha", &dl.id).await.unwrap();
        assert_eq!(resolved.status, DeadLetterStatus::Resolved);
        assert_eq!(resolved.replay_count, 0);
    }
}
