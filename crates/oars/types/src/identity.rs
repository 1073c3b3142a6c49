use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Roles the transport layer can assert for a caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Operator,
    Auditor,
    Agent,
    Service,
}

/// Authenticated caller context handed to the core by the HTTP edge.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenClaims {
    pub token_id: String,
    pub subject: String,
    pub tenant_ids: Vec<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
    pub role: Role,
    #[serde(default)]
    pub delegation_chain: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_account_id: Option<String>,
}

impl TokenClaims {
    pub fn has_tenant(&self, tenant_id: &str) -> bool {
        self.tenant_ids.iter().any(|t| t == tenant_id)
    }

    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }
}

/// A workload identity pinned by its client-certificate fingerprint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadIdentity {
    pub subject: String,
    pub fingerprint_sha256: String,
}

/// Captured response for an idempotent write.
///
/// Keyed by `(tenant_id, subject, endpoint, key)`; a replay with the same
/// fingerprint returns `response` byte-equal, a different fingerprint is a
/// conflict.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdempotencyRecord {
    pub tenant_id: String,
    pub subject: String,
    pub endpoint: String,
    pub key: String,
    pub request_fingerprint: String,
    pub response: Value,
    pub created_at: DateTime<Utc>,
}
