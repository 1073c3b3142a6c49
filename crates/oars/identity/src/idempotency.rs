//! Idempotency capture for write endpoints.
//!
//! Keyed by `(tenant, subject, endpoint, key)`. A replay with the same
//! request fingerprint returns the stored response byte-for-byte; the
//! same key with a different body is a conflict.

use chrono::{DateTime, Utc};
use oars_crypto::hash_canonical;
use oars_store::IdempotencyStore;
use oars_types::{IdempotencyRecord, OarsError};
use serde_json::Value;
use std::sync::Arc;

/// Outcome of consulting the idempotency table before a write.
#[derive(Clone, Debug)]
pub enum IdempotencyCheck {
    /// No capture yet; run the operation and `record` its response.
    Fresh,
    /// Same key and body seen before; return this response unchanged.
    Replay(Value),
}

pub struct IdempotencyService {
    store: Arc<dyn IdempotencyStore>,
}

impl IdempotencyService {
    pub fn new(store: Arc<dyn IdempotencyStore>) -> Self {
        Self { store }
    }

    pub fn fingerprint(body: &Value) -> String {
        hash_canonical(body)
    }

    /// Check the key before executing the write.
    pub async fn begin(
        &self,
        tenant_id: &str,
        subject: &str,
        endpoint: &str,
        key: &str,
        body: &Value,
    ) -> Result<IdempotencyCheck, OarsError> {
        let Some(existing) = self
            .store
            .get_idempotency(tenant_id, subject, endpoint, key)
            .await?
        else {
            return Ok(IdempotencyCheck::Fresh);
        };

        if existing.request_fingerprint == Self::fingerprint(body) {
            Ok(IdempotencyCheck::Replay(existing.response))
        } else {
            Err(OarsError::IdempotencyConflict(format!(
                "idempotency key {key} was used with a different request body"
            )))
        }
    }

    /// Capture the response after a successful fresh write.
    pub async fn record(
        &self,
        tenant_id: &str,
        subject: &str,
        endpoint: &str,
        key: &str,
        body: &Value,
        response: Value,
    ) -> Result<(), OarsError> {
        self.store
            .put_idempotency(IdempotencyRecord {
                tenant_id: tenant_id.to_string(),
                subject: subject.to_string(),
                endpoint: endpoint.to_string(),
                key: key.to_string(),
                request_fingerprint: Self::fingerprint(body),
                response,
                created_at: Utc::now(),
            })
            .await?;
        Ok(())
    }

    /// Drop captures older than the cutoff.
    pub async fn prune(&self, older_than: DateTime<Utc>) -> Result<u64, OarsError> {
        Ok(self.store.prune_idempotency(older_than).await?)
    }
}
