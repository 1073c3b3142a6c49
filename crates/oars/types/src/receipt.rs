use crate::action::{ActionActor, ActionResource, PolicySnapshot, RiskAssessment};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Receipt schema version stamped on every receipt.
pub const RECEIPT_SCHEMA_VERSION: &str = "1";

/// One receipt per lifecycle transition of an action.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptType {
    Requested,
    Denied,
    ApprovalRequired,
    Approved,
    Quarantined,
    Executed,
    Failed,
}

impl ReceiptType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReceiptType::Requested => "requested",
            ReceiptType::Denied => "denied",
            ReceiptType::ApprovalRequired => "approval_required",
            ReceiptType::Approved => "approved",
            ReceiptType::Quarantined => "quarantined",
            ReceiptType::Executed => "executed",
            ReceiptType::Failed => "failed",
        }
    }
}

/// Integrity block carried on the wire alongside the receipt body.
///
/// `payload_hash` is SHA-256 of the canonical JSON of the receipt with this
/// block removed; `signature` is the tenant key's Ed25519 signature over the
/// hash bytes, base64-encoded.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptIntegrity {
    pub signing_key_id: String,
    pub signature: String,
    pub payload_hash: String,
}

/// Signed, chained record of one transition in an action's lifecycle.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub receipt_id: String,
    pub action_id: String,
    pub tenant_id: String,
    #[serde(rename = "type")]
    pub receipt_type: ReceiptType,
    pub timestamp: DateTime<Utc>,
    pub schema_version: String,
    pub resource: ActionResource,
    pub actor: ActionActor,
    pub policy: PolicySnapshot,
    pub risk: RiskAssessment,
    pub previous_receipt_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub integrity: Option<ReceiptIntegrity>,
}

/// Outcome of verifying one receipt (and optionally its chain).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationReport {
    pub is_signature_valid: bool,
    pub is_chain_valid: bool,
    pub is_schema_valid: bool,
    pub verification_errors: Vec<String>,
}

impl VerificationReport {
    pub fn is_valid(&self) -> bool {
        self.is_signature_valid && self.is_chain_valid && self.is_schema_valid
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn receipt_type_field_serializes_as_type() {
        let receipt = Receipt {
            receipt_id: "rcpt_1".into(),
            action_id: "act_1".into(),
            tenant_id: "tenant_alpha".into(),
            receipt_type: ReceiptType::Requested,
            timestamp: Utc::now(),
            schema_version: RECEIPT_SCHEMA_VERSION.into(),
            resource: ActionResource {
                tool_id: "jira".into(),
                operation: "create_ticket".into(),
                target: "project:SEC".into(),
            },
            actor: ActionActor::default(),
            policy: PolicySnapshot {
                decision: crate::PolicyDecision::Allow,
                policy_set_id: None,
                policy_version: None,
                rule_ids: vec![],
                rationale: "default".into(),
            },
            risk: RiskAssessment {
                score: 20,
                tier: crate::RiskTier::Low,
                signals: vec![],
            },
            previous_receipt_id: None,
            integrity: None,
        };
        let value = serde_json::to_value(&receipt).unwrap();
        assert_eq!(value["type"], "requested");
        assert_eq!(value["schemaVersion"], "1");
        assert!(value["previousReceiptId"].is_null());
    }
}
