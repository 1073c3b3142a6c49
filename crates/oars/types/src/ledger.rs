use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `previous_hash` of the first entry in a chain.
pub const ZERO_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// One line of the append-only NDJSON ledger.
///
/// `entry_hash = SHA-256("{sequence}|{entry_id}|{payload_hash}|{previous_hash}|{occurred_at}")`,
/// with `previous_hash` equal to the prior entry's `entry_hash` (zero-hash at
/// sequence 1) and `payload_hash = SHA-256(canonical_json(payload))`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    pub sequence: u64,
    pub entry_id: String,
    pub tenant_id: String,
    pub entity_type: String,
    pub entity_id: String,
    pub occurred_at: DateTime<Utc>,
    pub payload_hash: String,
    pub previous_hash: String,
    pub entry_hash: String,
    pub payload: Value,
}

/// Snapshot of ledger health exposed on the operations surface.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerStatus {
    pub entry_count: u64,
    pub last_sequence: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_entry_hash: Option<String>,
    pub path: String,
}

/// Result of a full-file integrity pass.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityReport {
    pub is_valid: bool,
    pub checked_entries: u64,
    pub last_sequence: u64,
    pub errors: Vec<String>,
}

/// Result of pruning one tenant's expired entries.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PruneReport {
    pub cutoff_time: DateTime<Utc>,
    pub pruned_count: u64,
    pub remaining_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive_path: Option<String>,
}

/// Per-tenant retention configuration with legal hold.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerRetentionPolicy {
    pub tenant_id: String,
    pub retention_days: u32,
    pub legal_hold: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub updated_at: DateTime<Utc>,
    pub updated_by: String,
}
