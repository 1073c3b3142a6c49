//! OARS Types - the shared domain vocabulary.
//!
//! Every record that crosses a service boundary lives here: actions and
//! their lifecycle states, signed receipts, approvals, policy sets, ledger
//! entries, SIEM delivery records, execution jobs, and the identity claims
//! the transport layer hands to the core.
#![deny(unsafe_code)]

mod action;
mod admin;
mod approval;
mod error;
mod event;
mod identity;
mod job;
mod key;
mod ledger;
mod policy;
mod receipt;
mod siem;

pub use action::{
    ActionActor, ActionContext, ActionRecord, ActionResource, ActionResponse, ActionState,
    PolicyDecision, PolicySnapshot, RiskAssessment, RiskTier, SubmitActionRequest,
};
pub use admin::{
    BackupFile, BackupManifest, ControlMapping, EvidenceEdge, EvidenceNode, ScimGroup,
    ScimGroupMapping, ScimUser, ServiceAccount, TenantMember, TenantRecord, VaultSecret,
};
pub use approval::{
    Approval, ApprovalDecisionRecord, ApprovalProgress, ApprovalStage, ApprovalStatus,
    ApprovalWorkflow, DecisionVerdict, StageMode,
};
pub use error::{ErrorBody, ErrorEnvelope, OarsError, OarsResult};
pub use event::{Alert, AlertRoutingRule, EventSeverity, SecurityEvent};
pub use identity::{IdempotencyRecord, Role, TokenClaims, WorkloadIdentity};
pub use job::{ExecutionJob, JobStatus};
pub use key::{KeyRotation, KeyStatus, SignatureBundle, TenantKey, TenantPublicKey};
pub use ledger::{
    IntegrityReport, LedgerEntry, LedgerRetentionPolicy, LedgerStatus, PruneReport, ZERO_HASH,
};
pub use policy::{
    PolicyEvaluation, PolicyRule, PolicySet, PolicyStatus, RollbackOutcome, RuleMatch,
    TimeWindowUtc,
};
pub use receipt::{
    Receipt, ReceiptIntegrity, ReceiptType, VerificationReport, RECEIPT_SCHEMA_VERSION,
};
pub use siem::{
    DeadLetterStatus, RetryQueueItem, SiemDeadLetter, SiemTargetConfig, TargetMetrics,
};

/// Generate an opaque prefixed identifier, e.g. `act_4f9c…`.
pub fn prefixed_id(prefix: &str) -> String {
    format!("{}_{}", prefix, uuid::Uuid::new_v4().simple())
}

/// Generic paged response for list surfaces.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixed_ids_carry_their_prefix() {
        let id = prefixed_id("act");
        assert!(id.starts_with("act_"));
        assert!(id.len() > 10);
    }
}
