use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Overall state of an approval workflow instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Escalated,
}

impl ApprovalStatus {
    /// Open approvals still accept decisions; escalation does not close
    /// the workflow, it flags the stage for attention.
    pub fn is_open(&self) -> bool {
        matches!(self, ApprovalStatus::Pending | ApprovalStatus::Escalated)
    }
}

/// How approvals inside a stage are counted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageMode {
    Serial,
    Parallel,
}

/// One stage in a multi-stage approval workflow.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalStage {
    pub id: String,
    pub name: String,
    pub mode: StageMode,
    /// Approvals needed before the stage advances; always >= 1.
    pub required_approvals: u32,
    /// Allow-list of approvers; empty means any approver.
    #[serde(default)]
    pub approver_ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sla_seconds: Option<u64>,
    /// Subjects notified when the stage blows its SLA.
    #[serde(default)]
    pub escalate_to: Vec<String>,
}

/// One recorded approve/reject verdict.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionVerdict {
    Approve,
    Reject,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalDecisionRecord {
    pub stage_id: String,
    pub approver_id: String,
    pub decision: DecisionVerdict,
    pub reason: String,
    pub at: DateTime<Utc>,
}

/// An in-flight (or settled) approval bound to exactly one action.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Approval {
    pub approval_id: String,
    pub action_id: String,
    pub tenant_id: String,
    pub status: ApprovalStatus,
    pub stages: Vec<ApprovalStage>,
    pub current_stage_index: usize,
    pub stage_started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage_deadline_at: Option<DateTime<Utc>>,
    /// Stages that already escalated; scans never escalate a stage twice.
    #[serde(default)]
    pub escalated_stage_ids: Vec<String>,
    pub requires_step_up: bool,
    #[serde(default)]
    pub decisions: Vec<ApprovalDecisionRecord>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Approval {
    pub fn current_stage(&self) -> Option<&ApprovalStage> {
        self.stages.get(self.current_stage_index)
    }

    pub fn progress(&self) -> ApprovalProgress {
        ApprovalProgress {
            current_stage_index: self.current_stage_index,
            total_stages: self.stages.len(),
            current_stage_name: self
                .current_stage()
                .map(|stage| stage.name.clone())
                .unwrap_or_default(),
        }
    }
}

/// Progress summary exposed on decision responses.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalProgress {
    pub current_stage_index: usize,
    pub total_stages: usize,
    pub current_stage_name: String,
}

/// Per-tenant workflow template consulted when an approval is opened.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalWorkflow {
    pub workflow_id: String,
    pub tenant_id: String,
    pub name: String,
    pub stages: Vec<ApprovalStage>,
    pub updated_at: DateTime<Utc>,
}
