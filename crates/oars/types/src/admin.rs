use crate::identity::Role;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Tenant-scoped secret for one connector, e.g. `("database", "connection")`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultSecret {
    pub tenant_id: String,
    pub tool_id: String,
    pub name: String,
    pub value: Value,
    pub updated_at: DateTime<Utc>,
    pub updated_by: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantRecord {
    pub tenant_id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantMember {
    pub tenant_id: String,
    pub subject: String,
    pub role: Role,
    pub added_at: DateTime<Utc>,
}

/// Machine principal; `secret_hash` is the only stored credential material.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceAccount {
    pub account_id: String,
    pub tenant_id: String,
    pub name: String,
    pub secret_hash: String,
    pub disabled: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScimUser {
    pub user_id: String,
    pub tenant_id: String,
    pub user_name: String,
    pub active: bool,
    #[serde(default)]
    pub emails: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScimGroup {
    pub group_id: String,
    pub tenant_id: String,
    pub display_name: String,
    #[serde(default)]
    pub member_user_ids: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

/// Maps a SCIM group onto a platform role for its members.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScimGroupMapping {
    pub tenant_id: String,
    pub group_id: String,
    pub role: Role,
    pub updated_at: DateTime<Utc>,
}

/// Node in the evidence graph (action, receipt, event, control, ...).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvidenceNode {
    pub node_id: String,
    pub tenant_id: String,
    pub kind: String,
    pub label: String,
    pub created_at: DateTime<Utc>,
}

/// Directed edge between evidence nodes; ids only, never pointers.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvidenceEdge {
    pub edge_id: String,
    pub tenant_id: String,
    pub from_id: String,
    pub to_id: String,
    pub relation: String,
    pub created_at: DateTime<Utc>,
}

/// Ties receipt/event entity types to a compliance control.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlMapping {
    pub mapping_id: String,
    pub tenant_id: String,
    pub framework: String,
    pub control_id: String,
    pub entity_types: Vec<String>,
    pub description: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupFile {
    pub path: String,
    pub sha256: String,
    pub bytes: u64,
}

/// Manifest of one backup run over the store document and ledger file.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupManifest {
    pub backup_id: String,
    pub created_at: DateTime<Utc>,
    pub files: Vec<BackupFile>,
}
