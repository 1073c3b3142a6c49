//! OARS unified platform storage.
//!
//! This crate defines the persistence contract for the gateway core:
//! - actions, receipts, approvals, policies (system of record)
//! - vault secrets, retention policies, SIEM dead letters
//! - idempotency captures, security events, alerts
//! - directory records (tenants, members, service accounts, SCIM)
//! - evidence graph and control mappings
//!
//! Design stance:
//! - All mutations flow through the store traits; services never touch
//!   files or pools directly.
//! - The file variant is the deterministic single-node backend; Postgres
//!   is the transactional multi-worker backend behind the `postgres`
//!   feature.
//! - Sensitive payload fields (action input, vault secret values) pass
//!   through field protection on persist and are restored on read.

#![deny(unsafe_code)]
#![warn(rust_2018_idioms)]

mod error;
pub mod file;
#[cfg(feature = "postgres")]
pub mod postgres;
mod traits;

pub use error::{StoreError, StoreResult};
pub use traits::{
    ActionStore, AlertStore, ApprovalStore, ControlStore, DeadLetterStore, DirectoryStore,
    EventStore, EvidenceStore, IdempotencyStore, PlatformStore, PolicyStore, QueryWindow,
    ReceiptStore, RetentionStore, VaultStore, WorkflowStore,
};
