//! OARS immutable ledger.
//!
//! Tamper-evident, append-only NDJSON log of receipts and security events.
//! Every entry chains to its predecessor through `previous_hash`; the file
//! is fully verified at open and a mismatch refuses to start. Appends are
//! serialized under a process-level mutex with the file on disk as the
//! source of truth for sequence and chain head.

#![deny(unsafe_code)]

mod governance;

pub use governance::RetentionService;

use chrono::{DateTime, SecondsFormat, Utc};
use oars_crypto::{hash_canonical, sha256_hex};
use oars_types::{
    prefixed_id, IntegrityReport, LedgerEntry, LedgerStatus, Page, PruneReport, ZERO_HASH,
};
use serde_json::Value;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{error, info};

/// Default tenant retention when no policy is configured.
pub const DEFAULT_RETENTION_DAYS: u32 = 365;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger I/O error: {0}")]
    Io(String),

    #[error("ledger entry is not valid NDJSON: {0}")]
    Malformed(String),

    #[error("ledger integrity check failed: {0}")]
    IntegrityFailure(String),

    #[error("legal hold active: {0}")]
    LegalHold(String),

    #[error("invalid retention policy: {0}")]
    InvalidPolicy(String),

    #[error("storage error: {0}")]
    Store(#[from] oars_store::StoreError),
}

impl From<LedgerError> for oars_types::OarsError {
    fn from(value: LedgerError) -> Self {
        match value {
            LedgerError::LegalHold(msg) => oars_types::OarsError::InvalidState(msg),
            LedgerError::InvalidPolicy(msg) => oars_types::OarsError::Validation(msg),
            other => oars_types::OarsError::Internal(other.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
struct ChainHead {
    last_sequence: u64,
    last_entry_hash: String,
}

impl Default for ChainHead {
    fn default() -> Self {
        Self {
            last_sequence: 0,
            last_entry_hash: ZERO_HASH.to_string(),
        }
    }
}

/// Append-only hash-chained ledger file.
pub struct ImmutableLedger {
    path: PathBuf,
    head: Mutex<ChainHead>,
}

/// Timestamp rendering used inside entry hashes. Hashing always reformats
/// the parsed instant through this, so the hash is stable across
/// serialization round-trips.
fn hash_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn compute_entry_hash(
    sequence: u64,
    entry_id: &str,
    payload_hash: &str,
    previous_hash: &str,
    occurred_at: DateTime<Utc>,
) -> String {
    let material = format!(
        "{}|{}|{}|{}|{}",
        sequence,
        entry_id,
        payload_hash,
        previous_hash,
        hash_timestamp(occurred_at)
    );
    sha256_hex(material.as_bytes())
}

impl ImmutableLedger {
    /// Open the ledger at `path`, fully verifying the chain. An integrity
    /// failure is fatal: the operator must intervene before the platform
    /// will write another entry.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let path = path.as_ref().to_path_buf();
        let entries = read_entries(&path).await?;
        let report = verify_entries(&entries);
        if !report.is_valid {
            error!(path = %path.display(), errors = ?report.errors, "ledger failed startup verification");
            return Err(LedgerError::IntegrityFailure(report.errors.join("; ")));
        }

        let head = entries
            .last()
            .map(|entry| ChainHead {
                last_sequence: entry.sequence,
                last_entry_hash: entry.entry_hash.clone(),
            })
            .unwrap_or_default();

        info!(path = %path.display(), entries = entries.len(), "ledger verified");
        Ok(Self {
            path,
            head: Mutex::new(head),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a receipt to the ledger.
    pub async fn append_receipt(
        &self,
        receipt: &oars_types::Receipt,
    ) -> Result<LedgerEntry, LedgerError> {
        let payload = serde_json::to_value(receipt)
            .map_err(|e| LedgerError::Malformed(e.to_string()))?;
        self.append(
            &receipt.tenant_id,
            "receipt",
            &receipt.receipt_id,
            receipt.timestamp,
            payload,
        )
        .await
    }

    /// Append a security event to the ledger.
    pub async fn append_security_event(
        &self,
        event: &oars_types::SecurityEvent,
    ) -> Result<LedgerEntry, LedgerError> {
        let payload =
            serde_json::to_value(event).map_err(|e| LedgerError::Malformed(e.to_string()))?;
        self.append(
            &event.tenant_id,
            "security_event",
            &event.event_id,
            event.occurred_at,
            payload,
        )
        .await
    }

    /// Append one entry. The critical section re-reads the chain head from
    /// disk so the file stays authoritative even if another handle wrote.
    async fn append(
        &self,
        tenant_id: &str,
        entity_type: &str,
        entity_id: &str,
        occurred_at: DateTime<Utc>,
        payload: Value,
    ) -> Result<LedgerEntry, LedgerError> {
        let mut head = self.head.lock().await;

        let disk_head = read_head(&self.path).await?;
        if disk_head.last_sequence != head.last_sequence
            || disk_head.last_entry_hash != head.last_entry_hash
        {
            *head = disk_head;
        }

        let sequence = head.last_sequence + 1;
        let entry_id = prefixed_id("led");
        let payload_hash = hash_canonical(&payload);
        let previous_hash = head.last_entry_hash.clone();
        let entry_hash =
            compute_entry_hash(sequence, &entry_id, &payload_hash, &previous_hash, occurred_at);

        let entry = LedgerEntry {
            sequence,
            entry_id,
            tenant_id: tenant_id.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            occurred_at,
            payload_hash,
            previous_hash,
            entry_hash: entry_hash.clone(),
            payload,
        };

        let line =
            serde_json::to_string(&entry).map_err(|e| LedgerError::Malformed(e.to_string()))?;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| LedgerError::Io(e.to_string()))?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| LedgerError::Io(e.to_string()))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| LedgerError::Io(e.to_string()))?;
        file.write_all(b"\n")
            .await
            .map_err(|e| LedgerError::Io(e.to_string()))?;
        file.sync_all()
            .await
            .map_err(|e| LedgerError::Io(e.to_string()))?;

        head.last_sequence = sequence;
        head.last_entry_hash = entry_hash;
        Ok(entry)
    }

    /// Current chain head and entry count.
    pub async fn status(&self) -> Result<LedgerStatus, LedgerError> {
        let entries = read_entries(&self.path).await?;
        Ok(LedgerStatus {
            entry_count: entries.len() as u64,
            last_sequence: entries.last().map(|e| e.sequence).unwrap_or(0),
            last_entry_hash: entries.last().map(|e| e.entry_hash.clone()),
            path: self.path.display().to_string(),
        })
    }

    /// Re-hash the full file and report every mismatch.
    pub async fn verify_integrity(&self) -> Result<IntegrityReport, LedgerError> {
        let entries = read_entries(&self.path).await?;
        Ok(verify_entries(&entries))
    }

    /// A tenant's entries newest-first, optionally only those before
    /// `before_sequence` for cursor pagination.
    pub async fn list_entries_by_tenant(
        &self,
        tenant_id: &str,
        limit: usize,
        before_sequence: Option<u64>,
    ) -> Result<Page<LedgerEntry>, LedgerError> {
        let entries = read_entries(&self.path).await?;
        let mut matching: Vec<_> = entries
            .into_iter()
            .filter(|e| e.tenant_id == tenant_id)
            .filter(|e| before_sequence.map(|cursor| e.sequence < cursor).unwrap_or(true))
            .collect();
        let total = matching.len();
        matching.sort_by(|a, b| b.sequence.cmp(&a.sequence));
        if limit > 0 {
            matching.truncate(limit);
        }
        Ok(Page {
            items: matching,
            total,
        })
    }

    /// Archive and remove a tenant's entries older than the retention
    /// window, then re-chain the survivors from sequence 1. Entry ids,
    /// payload hashes, and timestamps are preserved; only the chain fields
    /// are recomputed, so integrity holds on the rewritten file.
    pub async fn prune_tenant_entries(
        &self,
        tenant_id: &str,
        retention_days: u32,
        now: Option<DateTime<Utc>>,
    ) -> Result<PruneReport, LedgerError> {
        let mut head = self.head.lock().await;
        let now = now.unwrap_or_else(Utc::now);
        let cutoff = now - chrono::Duration::days(retention_days as i64);

        let entries = read_entries(&self.path).await?;
        let (pruned, kept): (Vec<_>, Vec<_>) = entries
            .into_iter()
            .partition(|e| e.tenant_id == tenant_id && e.occurred_at < cutoff);

        if pruned.is_empty() {
            return Ok(PruneReport {
                cutoff_time: cutoff,
                pruned_count: 0,
                remaining_count: kept.len() as u64,
                archive_path: None,
            });
        }

        // Archive first; if this fails the ledger is untouched.
        let archive_path = self.path.with_file_name(format!(
            "{}.archive-{}-{}.ndjson",
            self.path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "ledger".to_string()),
            tenant_id,
            now.to_rfc3339_opts(SecondsFormat::Secs, true)
        ));
        let mut archive_lines = String::new();
        for entry in &pruned {
            archive_lines.push_str(
                &serde_json::to_string(entry).map_err(|e| LedgerError::Malformed(e.to_string()))?,
            );
            archive_lines.push('\n');
        }
        tokio::fs::write(&archive_path, archive_lines.as_bytes())
            .await
            .map_err(|e| LedgerError::Io(e.to_string()))?;

        // Re-chain survivors in original order from sequence 1.
        let mut rewritten = String::new();
        let mut previous_hash = ZERO_HASH.to_string();
        let mut sequence = 0u64;
        let mut new_head = ChainHead::default();
        for mut entry in kept {
            sequence += 1;
            entry.sequence = sequence;
            entry.previous_hash = previous_hash.clone();
            entry.entry_hash = compute_entry_hash(
                sequence,
                &entry.entry_id,
                &entry.payload_hash,
                &previous_hash,
                entry.occurred_at,
            );
            previous_hash = entry.entry_hash.clone();
            new_head = ChainHead {
                last_sequence: sequence,
                last_entry_hash: entry.entry_hash.clone(),
            };
            rewritten.push_str(
                &serde_json::to_string(&entry)
                    .map_err(|e| LedgerError::Malformed(e.to_string()))?,
            );
            rewritten.push('\n');
        }

        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, rewritten.as_bytes())
            .await
            .map_err(|e| LedgerError::Io(e.to_string()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| LedgerError::Io(e.to_string()))?;

        let remaining_count = new_head.last_sequence;
        *head = new_head;

        info!(
            tenant = tenant_id,
            pruned = pruned.len(),
            remaining = remaining_count,
            archive = %archive_path.display(),
            "ledger entries pruned"
        );
        Ok(PruneReport {
            cutoff_time: cutoff,
            pruned_count: pruned.len() as u64,
            remaining_count,
            archive_path: Some(archive_path.display().to_string()),
        })
    }
}

async fn read_entries(path: &Path) -> Result<Vec<LedgerEntry>, LedgerError> {
    let exists = tokio::fs::try_exists(path)
        .await
        .map_err(|e| LedgerError::Io(e.to_string()))?;
    if !exists {
        return Ok(Vec::new());
    }
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| LedgerError::Io(e.to_string()))?;

    let mut entries = Vec::new();
    for (i, line) in raw.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let entry: LedgerEntry = serde_json::from_str(line)
            .map_err(|e| LedgerError::Malformed(format!("line {}: {}", i + 1, e)))?;
        entries.push(entry);
    }
    Ok(entries)
}

async fn read_head(path: &Path) -> Result<ChainHead, LedgerError> {
    let entries = read_entries(path).await?;
    Ok(entries
        .last()
        .map(|entry| ChainHead {
            last_sequence: entry.sequence,
            last_entry_hash: entry.entry_hash.clone(),
        })
        .unwrap_or_default())
}

fn verify_entries(entries: &[LedgerEntry]) -> IntegrityReport {
    let mut errors = Vec::new();
    let mut previous_hash = ZERO_HASH.to_string();

    for (i, entry) in entries.iter().enumerate() {
        let expected_sequence = (i + 1) as u64;
        if entry.sequence != expected_sequence {
            errors.push(format!(
                "entry {} has sequence {}, expected {}",
                entry.entry_id, entry.sequence, expected_sequence
            ));
        }
        if entry.previous_hash != previous_hash {
            errors.push(format!(
                "entry {} has broken chain link at sequence {}",
                entry.entry_id, entry.sequence
            ));
        }
        let payload_hash = hash_canonical(&entry.payload);
        if payload_hash != entry.payload_hash {
            errors.push(format!(
                "entry {} payload hash mismatch at sequence {}",
                entry.entry_id, entry.sequence
            ));
        }
        let entry_hash = compute_entry_hash(
            entry.sequence,
            &entry.entry_id,
            &entry.payload_hash,
            &entry.previous_hash,
            entry.occurred_at,
        );
        if entry_hash != entry.entry_hash {
            errors.push(format!(
                "entry {} hash mismatch at sequence {}",
                entry.entry_id, entry.sequence
            ));
        }
        previous_hash = entry.entry_hash.clone();
    }

    IntegrityReport {
        is_valid: errors.is_empty(),
        checked_entries: entries.len() as u64,
        last_sequence: entries.last().map(|e| e.sequence).unwrap_or(0),
        errors,
    }
}
