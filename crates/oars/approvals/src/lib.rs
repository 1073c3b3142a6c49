//! OARS approval service.
//!
//! Multi-stage approval workflows with serial and parallel stages,
//! step-up authentication for critical risk, and SLA-driven escalation.
//! The workflow template comes from tenant configuration when present;
//! otherwise a single serial stage requiring one approval applies.

#![deny(unsafe_code)]

use chrono::{DateTime, Duration, Utc};
use oars_events::SecurityEventService;
use oars_store::{ApprovalStore, WorkflowStore};
use oars_types::{
    prefixed_id, ActionRecord, Approval, ApprovalDecisionRecord, ApprovalProgress, ApprovalStage,
    ApprovalStatus, DecisionVerdict, EventSeverity, OarsError, RiskAssessment, RiskTier,
    StageMode,
};
use serde_json::json;
use std::sync::Arc;
use tracing::info;

/// Development step-up code; production deployments plug in a verifier.
pub const DEV_STEP_UP_CODE: &str = "stepup_dev_code";

/// Secondary-authentication hook for critical approvals.
pub trait StepUpVerifier: Send + Sync {
    fn verify(&self, tenant_id: &str, approver_id: &str, code: &str) -> bool;
}

/// Accepts the fixed development code.
pub struct DevStepUpVerifier;

impl StepUpVerifier for DevStepUpVerifier {
    fn verify(&self, _tenant_id: &str, _approver_id: &str, code: &str) -> bool {
        code == DEV_STEP_UP_CODE
    }
}

/// Result of recording one decision.
#[derive(Clone, Debug)]
pub struct DecisionOutcome {
    pub approval: Approval,
    pub progress: ApprovalProgress,
}

/// One escalation raised by a scan.
#[derive(Clone, Debug)]
pub struct Escalation {
    pub approval_id: String,
    pub stage_id: String,
    pub escalate_to: Vec<String>,
}

pub struct ApprovalService {
    approvals: Arc<dyn ApprovalStore>,
    workflows: Arc<dyn WorkflowStore>,
    events: Option<Arc<SecurityEventService>>,
    step_up: Arc<dyn StepUpVerifier>,
}

impl ApprovalService {
    pub fn new(
        approvals: Arc<dyn ApprovalStore>,
        workflows: Arc<dyn WorkflowStore>,
        step_up: Arc<dyn StepUpVerifier>,
    ) -> Self {
        Self {
            approvals,
            workflows,
            events: None,
            step_up,
        }
    }

    pub fn with_events(mut self, events: Arc<SecurityEventService>) -> Self {
        self.events = Some(events);
        self
    }

    /// Open an approval for an action that policy routed to review.
    /// Step-up is required exactly when the risk tier is critical.
    pub async fn open_approval(
        &self,
        action: &ActionRecord,
        risk: &RiskAssessment,
    ) -> Result<Approval, OarsError> {
        let stages = match self.workflows.get_workflow(&action.tenant_id).await? {
            Some(workflow) if !workflow.stages.is_empty() => workflow.stages,
            _ => default_stages(),
        };

        let now = Utc::now();
        let approval = Approval {
            approval_id: prefixed_id("apr"),
            action_id: action.action_id.clone(),
            tenant_id: action.tenant_id.clone(),
            status: ApprovalStatus::Pending,
            stage_deadline_at: stage_deadline(&stages[0], now),
            stages,
            current_stage_index: 0,
            stage_started_at: now,
            escalated_stage_ids: Vec::new(),
            requires_step_up: risk.tier == RiskTier::Critical,
            decisions: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        self.approvals.insert_approval(approval.clone()).await?;

        if let Some(events) = &self.events {
            events
                .publish(
                    &action.tenant_id,
                    "approval.opened",
                    EventSeverity::Info,
                    "approval-service",
                    json!({
                        "approvalId": approval.approval_id,
                        "actionId": action.action_id,
                        "requiresStepUp": approval.requires_step_up,
                        "totalStages": approval.stages.len(),
                    }),
                )
                .await?;
        }
        Ok(approval)
    }

    pub async fn get_approval(
        &self,
        tenant_id: &str,
        approval_id: &str,
    ) -> Result<Approval, OarsError> {
        self.approvals
            .get_approval(tenant_id, approval_id)
            .await?
            .ok_or_else(|| OarsError::NotFound(format!("approval {approval_id} not found")))
    }

    /// Record one approve/reject decision against the current stage.
    #[allow(clippy::too_many_arguments)]
    pub async fn record_decision(
        &self,
        tenant_id: &str,
        approval_id: &str,
        verdict: DecisionVerdict,
        approver_id: &str,
        reason: &str,
        step_up_code: Option<&str>,
    ) -> Result<DecisionOutcome, OarsError> {
        let mut approval = self.get_approval(tenant_id, approval_id).await?;

        if !approval.status.is_open() {
            return Err(OarsError::InvalidState(format!(
                "approval {} is {:?} and accepts no further decisions",
                approval_id, approval.status
            )));
        }

        if approval.requires_step_up {
            let code = step_up_code.ok_or_else(|| {
                OarsError::StepUpRequired(
                    "step-up authentication code required for this approval".into(),
                )
            })?;
            if !self.step_up.verify(tenant_id, approver_id, code) {
                return Err(OarsError::StepUpRequired(
                    "step-up authentication code rejected".into(),
                ));
            }
        }

        let stage = approval
            .current_stage()
            .cloned()
            .ok_or_else(|| OarsError::Internal("approval has no current stage".into()))?;

        if !stage.approver_ids.is_empty()
            && !stage.approver_ids.iter().any(|id| id == approver_id)
        {
            return Err(OarsError::NotAuthorizedApprover(format!(
                "{approver_id} is not an allowed approver for stage {}",
                stage.name
            )));
        }

        // One decision per approver per stage; parallel stages need
        // distinct approvers to reach their threshold.
        if approval
            .decisions
            .iter()
            .any(|d| d.stage_id == stage.id && d.approver_id == approver_id)
        {
            return Err(OarsError::Validation(format!(
                "{approver_id} already decided stage {}",
                stage.name
            )));
        }

        let now = Utc::now();
        approval.decisions.push(ApprovalDecisionRecord {
            stage_id: stage.id.clone(),
            approver_id: approver_id.to_string(),
            decision: verdict,
            reason: reason.to_string(),
            at: now,
        });

        match verdict {
            DecisionVerdict::Reject => {
                approval.status = ApprovalStatus::Rejected;
            }
            DecisionVerdict::Approve => {
                let approvals_in_stage = approval
                    .decisions
                    .iter()
                    .filter(|d| {
                        d.stage_id == stage.id && d.decision == DecisionVerdict::Approve
                    })
                    .count() as u32;
                let threshold = match stage.mode {
                    StageMode::Serial => 1,
                    StageMode::Parallel => stage.required_approvals.max(1),
                };
                if approvals_in_stage >= threshold {
                    if approval.current_stage_index + 1 >= approval.stages.len() {
                        approval.status = ApprovalStatus::Approved;
                    } else {
                        approval.current_stage_index += 1;
                        approval.status = ApprovalStatus::Pending;
                        approval.stage_started_at = now;
                        approval.stage_deadline_at = approval
                            .current_stage()
                            .and_then(|next| stage_deadline(next, now));
                    }
                }
            }
        }

        approval.updated_at = now;
        self.approvals.update_approval(approval.clone()).await?;

        if let Some(events) = &self.events {
            events
                .publish(
                    tenant_id,
                    "approval.decision",
                    EventSeverity::Info,
                    approver_id,
                    json!({
                        "approvalId": approval.approval_id,
                        "stageId": stage.id,
                        "decision": verdict,
                        "status": approval.status,
                    }),
                )
                .await?;
        }

        let progress = approval.progress();
        Ok(DecisionOutcome { approval, progress })
    }

    /// Escalate every open approval whose current stage blew its SLA.
    /// Idempotent: a stage escalates at most once, so repeated scans
    /// return nothing new.
    pub async fn scan_for_escalations(
        &self,
        tenant_id: &str,
        now: Option<DateTime<Utc>>,
    ) -> Result<Vec<Escalation>, OarsError> {
        let now = now.unwrap_or_else(Utc::now);
        let mut escalations = Vec::new();

        for mut approval in self.approvals.list_open_approvals(tenant_id).await? {
            let Some(deadline) = approval.stage_deadline_at else {
                continue;
            };
            if deadline > now {
                continue;
            }
            let Some(stage) = approval.current_stage().cloned() else {
                continue;
            };
            if approval.escalated_stage_ids.contains(&stage.id) {
                continue;
            }

            approval.escalated_stage_ids.push(stage.id.clone());
            approval.status = ApprovalStatus::Escalated;
            approval.updated_at = now;
            self.approvals.update_approval(approval.clone()).await?;

            info!(
                approval = %approval.approval_id,
                stage = %stage.id,
                "approval stage escalated past its SLA"
            );
            if let Some(events) = &self.events {
                events
                    .publish(
                        tenant_id,
                        "approval.escalated",
                        EventSeverity::Warning,
                        "approval-service",
                        json!({
                            "approvalId": approval.approval_id,
                            "actionId": approval.action_id,
                            "stageId": stage.id,
                            "stageName": stage.name,
                            "escalateTo": stage.escalate_to,
                        }),
                    )
                    .await?;
            }

            escalations.push(Escalation {
                approval_id: approval.approval_id.clone(),
                stage_id: stage.id,
                escalate_to: stage.escalate_to,
            });
        }
        Ok(escalations)
    }
}

fn default_stages() -> Vec<ApprovalStage> {
    vec![ApprovalStage {
        id: "stage-1".to_string(),
        name: "Approval".to_string(),
        mode: StageMode::Serial,
        required_approvals: 1,
        approver_ids: Vec::new(),
        sla_seconds: None,
        escalate_to: Vec::new(),
    }]
}

fn stage_deadline(stage: &ApprovalStage, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
    stage
        .sla_seconds
        .map(|seconds| from + Duration::seconds(seconds as i64))
}
