use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a tenant signing key. Rotation moves the active key to
/// `retiring`; retired keys remain resolvable for verification forever.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStatus {
    Active,
    Retiring,
    Retired,
}

/// A tenant's Ed25519 signing key. At most one `active` per tenant.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantKey {
    pub key_id: String,
    pub tenant_id: String,
    pub private_key_pem: String,
    pub public_key_pem: String,
    pub status: KeyStatus,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rotated_at: Option<DateTime<Utc>>,
}

/// Public half of a tenant key, safe to hand to verifiers.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantPublicKey {
    pub key_id: String,
    pub tenant_id: String,
    pub public_key_pem: String,
    pub status: KeyStatus,
    pub created_at: DateTime<Utc>,
}

impl From<&TenantKey> for TenantPublicKey {
    fn from(key: &TenantKey) -> Self {
        Self {
            key_id: key.key_id.clone(),
            tenant_id: key.tenant_id.clone(),
            public_key_pem: key.public_key_pem.clone(),
            status: key.status,
            created_at: key.created_at,
        }
    }
}

/// Result of rotating a tenant's signing key.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyRotation {
    pub new_key_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_active_key_id: Option<String>,
    pub rotated_at: DateTime<Utc>,
}

/// Output of a signing operation.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureBundle {
    pub signature: String,
    pub key_id: String,
}
