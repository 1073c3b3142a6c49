//! Compliance control mappings and coverage reporting.

use chrono::Utc;
use oars_ledger::ImmutableLedger;
use oars_store::ControlStore;
use oars_types::{prefixed_id, ControlMapping, OarsError};
use serde::Serialize;
use std::sync::Arc;

/// How much ledger evidence backs one control.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlCoverage {
    pub control_id: String,
    pub framework: String,
    pub matching_entries: u64,
}

pub struct ControlService {
    store: Arc<dyn ControlStore>,
    ledger: Arc<ImmutableLedger>,
}

impl ControlService {
    pub fn new(store: Arc<dyn ControlStore>, ledger: Arc<ImmutableLedger>) -> Self {
        Self { store, ledger }
    }

    pub async fn upsert_mapping(
        &self,
        tenant_id: &str,
        framework: &str,
        control_id: &str,
        entity_types: Vec<String>,
        description: &str,
    ) -> Result<ControlMapping, OarsError> {
        if entity_types.is_empty() {
            return Err(OarsError::Validation(
                "control mapping needs at least one entity type".into(),
            ));
        }
        let existing = self
            .store
            .list_control_mappings(tenant_id)
            .await?
            .into_iter()
            .find(|m| m.framework == framework && m.control_id == control_id);
        let mapping = ControlMapping {
            mapping_id: existing
                .map(|m| m.mapping_id)
                .unwrap_or_else(|| prefixed_id("ctl")),
            tenant_id: tenant_id.to_string(),
            framework: framework.to_string(),
            control_id: control_id.to_string(),
            entity_types,
            description: description.to_string(),
            updated_at: Utc::now(),
        };
        self.store.upsert_control_mapping(mapping.clone()).await?;
        Ok(mapping)
    }

    pub async fn delete_mapping(
        &self,
        tenant_id: &str,
        mapping_id: &str,
    ) -> Result<bool, OarsError> {
        Ok(self.store.delete_control_mapping(tenant_id, mapping_id).await?)
    }

    pub async fn list_mappings(&self, tenant_id: &str) -> Result<Vec<ControlMapping>, OarsError> {
        Ok(self.store.list_control_mappings(tenant_id).await?)
    }

    /// Count the tenant's ledger entries backing each mapped control.
    pub async fn coverage_report(
        &self,
        tenant_id: &str,
    ) -> Result<Vec<ControlCoverage>, OarsError> {
        let mappings = self.store.list_control_mappings(tenant_id).await?;
        let entries = self
            .ledger
            .list_entries_by_tenant(tenant_id, 0, None)
            .await
            .map_err(oars_types::OarsError::from)?;

        Ok(mappings
            .into_iter()
            .map(|mapping| {
                let matching_entries = entries
                    .items
                    .iter()
                    .filter(|e| mapping.entity_types.contains(&e.entity_type))
                    .count() as u64;
                ControlCoverage {
                    control_id: mapping.control_id,
                    framework: mapping.framework,
                    matching_entries,
                }
            })
            .collect())
    }
}
