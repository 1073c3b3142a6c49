use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle states of a submitted action.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionState {
    Requested,
    Denied,
    ApprovalRequired,
    Approved,
    Executed,
    Failed,
    Quarantined,
    Canceled,
}

impl ActionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionState::Requested => "requested",
            ActionState::Denied => "denied",
            ActionState::ApprovalRequired => "approval_required",
            ActionState::Approved => "approved",
            ActionState::Executed => "executed",
            ActionState::Failed => "failed",
            ActionState::Quarantined => "quarantined",
            ActionState::Canceled => "canceled",
        }
    }

    /// Terminal states accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ActionState::Denied
                | ActionState::Executed
                | ActionState::Failed
                | ActionState::Quarantined
                | ActionState::Canceled
        )
    }
}

impl std::fmt::Display for ActionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who is asking for the action.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionActor {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_id: Option<String>,
    #[serde(default)]
    pub delegation_chain: Vec<String>,
}

/// What the action wants to do, and to what.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionResource {
    pub tool_id: String,
    pub operation: String,
    pub target: String,
}

/// Ambient request context captured at submission.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    #[serde(default)]
    pub data_types: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requested_at: Option<DateTime<Utc>>,
}

/// Terminal policy decision for an action.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyDecision {
    Allow,
    Deny,
    Approve,
    Quarantine,
}

impl std::fmt::Display for PolicyDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PolicyDecision::Allow => "allow",
            PolicyDecision::Deny => "deny",
            PolicyDecision::Approve => "approve",
            PolicyDecision::Quarantine => "quarantine",
        };
        f.write_str(s)
    }
}

/// Snapshot of the policy outcome stamped onto actions and receipts.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicySnapshot {
    pub decision: PolicyDecision,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_set_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_version: Option<u32>,
    #[serde(default)]
    pub rule_ids: Vec<String>,
    pub rationale: String,
}

/// Risk tier buckets derived from the numeric score.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskTier {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for RiskTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RiskTier::Low => "low",
            RiskTier::Medium => "medium",
            RiskTier::High => "high",
            RiskTier::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// Deterministic risk result for one request.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskAssessment {
    pub score: u32,
    pub tier: RiskTier,
    pub signals: Vec<String>,
}

/// The system of record for one submitted action. Mutated only by the
/// Action Service; never deleted.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionRecord {
    pub action_id: String,
    pub tenant_id: String,
    pub state: ActionState,
    pub actor: ActionActor,
    pub resource: ActionResource,
    pub input: Value,
    pub context: ActionContext,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy: Option<PolicySnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk: Option<RiskAssessment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approval_id: Option<String>,
    /// Ordered, append-only.
    #[serde(default)]
    pub receipt_ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Submission payload accepted at the gateway boundary.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitActionRequest {
    pub tenant_id: String,
    pub actor: ActionActor,
    pub resource: ActionResource,
    #[serde(default)]
    pub input: Value,
    #[serde(default)]
    pub context: ActionContext,
}

/// What callers get back from submit / decision / execute surfaces.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionResponse {
    pub action_id: String,
    pub state: ActionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy: Option<PolicySnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk: Option<RiskAssessment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approval_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_up_required: Option<bool>,
    #[serde(default)]
    pub receipt_ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_state_serializes_snake_case() {
        let json = serde_json::to_string(&ActionState::ApprovalRequired).unwrap();
        assert_eq!(json, "\"approval_required\"");
    }

    #[test]
    fn terminal_states_are_closed() {
        assert!(ActionState::Executed.is_terminal());
        assert!(ActionState::Denied.is_terminal());
        assert!(!ActionState::Approved.is_terminal());
        assert!(!ActionState::Requested.is_terminal());
    }

    #[test]
    fn risk_tiers_order_by_severity() {
        assert!(RiskTier::Critical > RiskTier::High);
        assert!(RiskTier::High > RiskTier::Medium);
        assert!(RiskTier::Medium > RiskTier::Low);
    }
}
