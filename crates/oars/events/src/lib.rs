//! OARS security event service.
//!
//! One publish surface for every domain event: the event is persisted to
//! the platform store, anchored in the immutable ledger, mirrored to an
//! NDJSON file sink when configured, and fanned out to SIEM targets.
//! Alert routing rides on top of the same stream.

#![deny(unsafe_code)]

mod alerts;

pub use alerts::AlertRouter;

use chrono::Utc;
use oars_ledger::ImmutableLedger;
use oars_siem::SiemDeliveryService;
use oars_store::EventStore;
use oars_types::{prefixed_id, EventSeverity, OarsError, SecurityEvent};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::warn;

pub struct SecurityEventService {
    store: Arc<dyn EventStore>,
    ledger: Arc<ImmutableLedger>,
    siem: Arc<SiemDeliveryService>,
    file_sink: Option<PathBuf>,
}

impl SecurityEventService {
    pub fn new(
        store: Arc<dyn EventStore>,
        ledger: Arc<ImmutableLedger>,
        siem: Arc<SiemDeliveryService>,
        file_sink: Option<PathBuf>,
    ) -> Self {
        Self {
            store,
            ledger,
            siem,
            file_sink,
        }
    }

    /// Publish a domain event everywhere it must land. Store and ledger
    /// writes are mandatory; the file sink and SIEM fan-out are
    /// best-effort (SIEM has its own retry queue).
    pub async fn publish(
        &self,
        tenant_id: &str,
        event_type: &str,
        severity: EventSeverity,
        actor: &str,
        payload: Value,
    ) -> Result<SecurityEvent, OarsError> {
        let event = SecurityEvent {
            event_id: prefixed_id("evt"),
            tenant_id: tenant_id.to_string(),
            event_type: event_type.to_string(),
            severity,
            actor: actor.to_string(),
            occurred_at: Utc::now(),
            payload,
        };

        self.store.insert_event(event.clone()).await?;
        self.ledger.append_security_event(&event).await?;

        if let Some(path) = &self.file_sink {
            if let Err(error) = append_line(path, &event).await {
                warn!(%error, "security event file sink write failed");
            }
        }

        self.siem.publish(&event).await;
        Ok(event)
    }
}

async fn append_line(path: &PathBuf, event: &SecurityEvent) -> Result<(), String> {
    let line = serde_json::to_string(event).map_err(|e| e.to_string())?;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| e.to_string())?;
    }
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(|e| e.to_string())?;
    file.write_all(line.as_bytes())
        .await
        .map_err(|e| e.to_string())?;
    file.write_all(b"\n").await.map_err(|e| e.to_string())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use oars_crypto::FieldProtection;
    use oars_siem::{DeliveryRequest, RetrySettings, SiemTransport};
    use oars_store::file::FilePlatformStore;
    use oars_store::QueryWindow;

    struct NullTransport;

    #[async_trait]
    impl SiemTransport for NullTransport {
        async fn send(&self, _request: &DeliveryRequest) -> Result<(), String> {
            Ok(())
        }
    }

    pub(crate) async fn fixture(
        dir: &tempfile::TempDir,
    ) -> (SecurityEventService, Arc<FilePlatformStore>, Arc<ImmutableLedger>) {
        let store = Arc::new(FilePlatformStore::in_memory(FieldProtection::disabled()));
        let ledger = Arc::new(
            ImmutableLedger::open(dir.path().join("ledger.ndjson")).await.unwrap(),
        );
        let siem = Arc::new(
            SiemDeliveryService::new(
                vec![],
                Arc::new(NullTransport),
                RetrySettings::default(),
                None,
                None,
            )
            .await
            .unwrap(),
        );
        let service = SecurityEventService::new(
            store.clone(),
            Arc::clone(&ledger),
            siem,
            Some(dir.path().join("events.ndjson")),
        );
        (service, store, ledger)
    }

    #[tokio::test]
    async fn publish_lands_in_store_ledger_and_file_sink() {
        let dir = tempfile::tempdir().unwrap();
        let (service, store, ledger) = fixture(&dir).await;

        service
            .publish(
                "tenant_alpha",
                "policy.published",
                EventSeverity::Info,
                "admin_1",
                serde_json::json!({"policyId": "pol_1"}),
            )
            .await
            .unwrap();

        let stored = store
            .list_events("tenant_alpha", QueryWindow::default())
            .await
            .unwrap();
        assert_eq!(stored.total, 1);
        assert_eq!(stored.items[0].event_type, "policy.published");

        let status = ledger.status().await.unwrap();
        assert_eq!(status.entry_count, 1);

        let sink = tokio::fs::read_to_string(dir.path().join("events.ndjson"))
            .await
            .unwrap();
        assert!(sink.contains("policy.published"));
    }
}
