//! OARS vault.
//!
//! Tenant-scoped secrets keyed by `(tool_id, name)`, encrypted at rest by
//! the store's field-protection hook. Listing never returns secret
//! material; mutations emit security events.

#![deny(unsafe_code)]

use chrono::Utc;
use oars_events::SecurityEventService;
use oars_store::VaultStore;
use oars_types::{EventSeverity, OarsError, VaultSecret};
use serde_json::{json, Value};
use std::sync::Arc;

/// Secret metadata without the value, for list surfaces.
#[derive(Clone, Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretSummary {
    pub tool_id: String,
    pub name: String,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    pub updated_by: String,
}

pub struct VaultSecretService {
    store: Arc<dyn VaultStore>,
    events: Option<Arc<SecurityEventService>>,
}

impl VaultSecretService {
    pub fn new(store: Arc<dyn VaultStore>) -> Self {
        Self {
            store,
            events: None,
        }
    }

    pub fn with_events(mut self, events: Arc<SecurityEventService>) -> Self {
        self.events = Some(events);
        self
    }

    pub async fn put_secret(
        &self,
        tenant_id: &str,
        tool_id: &str,
        name: &str,
        value: Value,
        updated_by: &str,
    ) -> Result<(), OarsError> {
        if tool_id.trim().is_empty() || name.trim().is_empty() {
            return Err(OarsError::Validation(
                "secret tool_id and name must not be empty".into(),
            ));
        }
        self.store
            .put_secret(VaultSecret {
                tenant_id: tenant_id.to_string(),
                tool_id: tool_id.to_string(),
                name: name.to_string(),
                value,
                updated_at: Utc::now(),
                updated_by: updated_by.to_string(),
            })
            .await?;
        self.emit(tenant_id, "vault.secret_written", updated_by, tool_id, name)
            .await
    }

    pub async fn get_secret(
        &self,
        tenant_id: &str,
        tool_id: &str,
        name: &str,
    ) -> Result<Option<VaultSecret>, OarsError> {
        Ok(self.store.get_secret(tenant_id, tool_id, name).await?)
    }

    /// Whether the secret exists, without touching its value.
    pub async fn has_secret(
        &self,
        tenant_id: &str,
        tool_id: &str,
        name: &str,
    ) -> Result<bool, OarsError> {
        Ok(self.store.get_secret(tenant_id, tool_id, name).await?.is_some())
    }

    pub async fn delete_secret(
        &self,
        tenant_id: &str,
        tool_id: &str,
        name: &str,
        deleted_by: &str,
    ) -> Result<bool, OarsError> {
        let removed = self.store.delete_secret(tenant_id, tool_id, name).await?;
        if removed {
            self.emit(tenant_id, "vault.secret_deleted", deleted_by, tool_id, name)
                .await?;
        }
        Ok(removed)
    }

    /// Metadata only; secret values never leave through list.
    pub async fn list_secrets(&self, tenant_id: &str) -> Result<Vec<SecretSummary>, OarsError> {
        Ok(self
            .store
            .list_secrets(tenant_id)
            .await?
            .into_iter()
            .map(|s| SecretSummary {
                tool_id: s.tool_id,
                name: s.name,
                updated_at: s.updated_at,
                updated_by: s.updated_by,
            })
            .collect())
    }

    async fn emit(
        &self,
        tenant_id: &str,
        event_type: &str,
        actor: &str,
        tool_id: &str,
        name: &str,
    ) -> Result<(), OarsError> {
        if let Some(events) = &self.events {
            events
                .publish(
                    tenant_id,
                    event_type,
                    EventSeverity::Info,
                    actor,
                    json!({"toolId": tool_id, "name": name}),
                )
                .await?;
        }
        Ok(())
    }
}
