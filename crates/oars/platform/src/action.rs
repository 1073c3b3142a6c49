//! The action orchestrator.
//!
//! Drives one action through risk scoring, policy evaluation, approval,
//! backplane enqueue or inline execution, and per-transition receipts.
//! Every state change persists immediately and `receipt_ids` only ever
//! grows.

use async_trait::async_trait;
use chrono::Utc;
use oars_approvals::ApprovalService;
use oars_backplane::{EnqueueJob, ExecutionBackplane, JobExecutor};
use oars_connectors::ExecutionService;
use oars_events::{AlertRouter, SecurityEventService};
use oars_identity::{require_scope, require_tenant, IdempotencyCheck, IdempotencyService};
use oars_policy::{decision_to_state, PolicyService};
use oars_receipts::{CreateReceipt, ReceiptService};
use oars_store::{ActionStore, PlatformStore};
use oars_types::{
    prefixed_id, ActionRecord, ActionResponse, ActionState, ApprovalProgress, ApprovalStatus,
    DecisionVerdict, EventSeverity, ExecutionJob, OarsError, PolicyDecision, PolicySnapshot,
    Receipt, ReceiptType, RiskAssessment, SubmitActionRequest, TokenClaims,
};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Response to an approval decision: the approval's view plus the
/// action's, which may have advanced all the way to executed.
#[derive(Clone, Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionResponse {
    pub approval_status: ApprovalStatus,
    pub approval_progress: ApprovalProgress,
    pub action: ActionResponse,
}

pub struct ActionService {
    store: Arc<dyn PlatformStore>,
    policy: Arc<PolicyService>,
    approvals: Arc<ApprovalService>,
    receipts: Arc<ReceiptService>,
    execution: Arc<ExecutionService>,
    alerts: Arc<AlertRouter>,
    events: Arc<SecurityEventService>,
    idempotency: Arc<IdempotencyService>,
    backplane: Option<Arc<dyn ExecutionBackplane>>,
}

impl ActionService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn PlatformStore>,
        policy: Arc<PolicyService>,
        approvals: Arc<ApprovalService>,
        receipts: Arc<ReceiptService>,
        execution: Arc<ExecutionService>,
        alerts: Arc<AlertRouter>,
        events: Arc<SecurityEventService>,
        idempotency: Arc<IdempotencyService>,
        backplane: Option<Arc<dyn ExecutionBackplane>>,
    ) -> Self {
        Self {
            store,
            policy,
            approvals,
            receipts,
            execution,
            alerts,
            events,
            idempotency,
            backplane,
        }
    }

    /// Submission boundary: tenant and scope enforcement plus optional
    /// idempotency capture, then the state machine.
    pub async fn submit_authorized(
        &self,
        claims: &TokenClaims,
        request: SubmitActionRequest,
        request_id: &str,
        idempotency_key: Option<&str>,
    ) -> Result<ActionResponse, OarsError> {
        require_tenant(claims, &request.tenant_id)?;
        require_scope(claims, "actions:write")?;

        let Some(key) = idempotency_key else {
            return self.submit_action(request, request_id).await;
        };

        let body = serde_json::to_value(&request)
            .map_err(|e| OarsError::Internal(e.to_string()))?;
        match self
            .idempotency
            .begin(&request.tenant_id, &claims.subject, "/v1/actions", key, &body)
            .await?
        {
            IdempotencyCheck::Replay(stored) => serde_json::from_value(stored)
                .map_err(|e| OarsError::Internal(format!("stored response corrupt: {e}"))),
            IdempotencyCheck::Fresh => {
                let response = self.submit_action(request.clone(), request_id).await?;
                let stored = serde_json::to_value(&response)
                    .map_err(|e| OarsError::Internal(e.to_string()))?;
                self.idempotency
                    .record(
                        &request.tenant_id,
                        &claims.subject,
                        "/v1/actions",
                        key,
                        &body,
                        stored,
                    )
                    .await?;
                Ok(response)
            }
        }
    }

    /// Submit one action and drive it as far as policy allows.
    #[instrument(skip_all, fields(tenant = %request.tenant_id, tool = %request.resource.tool_id))]
    pub async fn submit_action(
        &self,
        request: SubmitActionRequest,
        request_id: &str,
    ) -> Result<ActionResponse, OarsError> {
        if request.tenant_id.trim().is_empty() {
            return Err(OarsError::Validation("tenantId must not be empty".into()));
        }
        if request.resource.tool_id.trim().is_empty()
            || request.resource.operation.trim().is_empty()
        {
            return Err(OarsError::Validation(
                "resource toolId and operation must not be empty".into(),
            ));
        }

        let now = Utc::now();
        let mut context = request.context.clone();
        context.requested_at = Some(now);

        let mut action = ActionRecord {
            action_id: prefixed_id("act"),
            tenant_id: request.tenant_id.clone(),
            state: ActionState::Requested,
            actor: request.actor.clone(),
            resource: request.resource.clone(),
            input: request.input.clone(),
            context,
            policy: None,
            risk: None,
            approval_id: None,
            receipt_ids: Vec::new(),
            last_error: None,
            created_at: now,
            updated_at: now,
        };
        self.store.create_action(action.clone()).await?;

        let risk = oars_risk::evaluate(&action.resource);
        let evaluation = self.policy.evaluate(&action, &risk, None).await?;
        let snapshot = PolicySnapshot {
            decision: evaluation.decision,
            policy_set_id: evaluation.policy_set_id.clone(),
            policy_version: evaluation.policy_version,
            rule_ids: evaluation.rule_ids.clone(),
            rationale: evaluation.rationale.clone(),
        };
        action.policy = Some(snapshot);
        action.risk = Some(risk.clone());
        self.persist(&mut action).await?;

        self.issue_receipt(&mut action, ReceiptType::Requested, request_id).await?;

        info!(
            action = %action.action_id,
            decision = %evaluation.decision,
            tier = %risk.tier,
            "action evaluated"
        );

        let mut step_up_required = None;
        let mut execution_output = None;
        match evaluation.decision {
            PolicyDecision::Deny | PolicyDecision::Quarantine => {
                action.state = decision_to_state(evaluation.decision);
                self.persist(&mut action).await?;
                let receipt_type = match evaluation.decision {
                    PolicyDecision::Deny => ReceiptType::Denied,
                    _ => ReceiptType::Quarantined,
                };
                self.issue_receipt(&mut action, receipt_type, request_id).await?;
                self.alerts.action_outcome(&action).await?;
            }
            PolicyDecision::Approve => {
                let approval = self.approvals.open_approval(&action, &risk).await?;
                step_up_required = Some(approval.requires_step_up);
                action.approval_id = Some(approval.approval_id.clone());
                action.state = ActionState::ApprovalRequired;
                self.persist(&mut action).await?;
                self.issue_receipt(&mut action, ReceiptType::ApprovalRequired, request_id)
                    .await?;
            }
            PolicyDecision::Allow => {
                action.state = ActionState::Approved;
                self.persist(&mut action).await?;
                self.issue_receipt(&mut action, ReceiptType::Approved, request_id).await?;
                let (settled, output) = self.dispatch_approved(action, request_id).await?;
                action = settled;
                execution_output = output;
            }
        }

        let mut response = response_from(&action);
        response.step_up_required = step_up_required;
        response.output = execution_output;
        Ok(response)
    }

    /// Route an approved action: enqueue when a backplane is configured,
    /// otherwise execute inline. Returns the action plus any inline
    /// execution output.
    async fn dispatch_approved(
        &self,
        mut action: ActionRecord,
        request_id: &str,
    ) -> Result<(ActionRecord, Option<serde_json::Value>), OarsError> {
        if let Some(backplane) = &self.backplane {
            backplane
                .enqueue(EnqueueJob {
                    tenant_id: action.tenant_id.clone(),
                    action_id: action.action_id.clone(),
                    request_id: request_id.to_string(),
                })
                .await?;
            info!(action = %action.action_id, "action enqueued for asynchronous execution");
            return Ok((action, None));
        }
        let output = self.execute_inner(&mut action, request_id).await?;
        Ok((action, output))
    }

    /// Run the connector and settle the terminal state. Returns the
    /// sanitized connector output on success.
    async fn execute_inner(
        &self,
        action: &mut ActionRecord,
        request_id: &str,
    ) -> Result<Option<serde_json::Value>, OarsError> {
        let outcome = self.execution.execute(action).await;
        if outcome.success {
            action.state = ActionState::Executed;
            action.last_error = None;
        } else {
            action.state = ActionState::Failed;
            action.last_error = outcome.error.clone();
            warn!(
                action = %action.action_id,
                error = outcome.error.as_deref().unwrap_or("unknown"),
                "action execution failed"
            );
        }
        self.persist(action).await?;

        let receipt_type = if outcome.success {
            ReceiptType::Executed
        } else {
            ReceiptType::Failed
        };
        self.issue_receipt(action, receipt_type, request_id).await?;
        self.alerts.action_outcome(action).await?;

        self.events
            .publish(
                &action.tenant_id,
                if outcome.success {
                    "action.executed"
                } else {
                    "action.failed"
                },
                if outcome.success {
                    EventSeverity::Info
                } else {
                    EventSeverity::Warning
                },
                "action-service",
                json!({
                    "actionId": action.action_id,
                    "output": outcome.output.clone(),
                    "error": outcome.error,
                }),
            )
            .await?;
        Ok(outcome.success.then_some(outcome.output))
    }

    /// Apply an approval decision and, once all stages approve, run the
    /// same dispatch path a policy-allowed submission takes.
    #[allow(clippy::too_many_arguments)]
    pub async fn handle_approval_decision(
        &self,
        tenant_id: &str,
        approval_id: &str,
        verdict: DecisionVerdict,
        approver_id: &str,
        reason: &str,
        request_id: &str,
        step_up_code: Option<&str>,
    ) -> Result<DecisionResponse, OarsError> {
        let outcome = self
            .approvals
            .record_decision(tenant_id, approval_id, verdict, approver_id, reason, step_up_code)
            .await?;

        let mut action = self
            .store
            .get_action(tenant_id, &outcome.approval.action_id)
            .await?
            .ok_or_else(|| {
                OarsError::NotFound(format!(
                    "action {} behind approval {approval_id} not found",
                    outcome.approval.action_id
                ))
            })?;

        let mut execution_output = None;
        match outcome.approval.status {
            ApprovalStatus::Rejected => {
                action.state = ActionState::Denied;
                action.last_error = Some(format!("approval rejected by {approver_id}: {reason}"));
                self.persist(&mut action).await?;
                self.issue_receipt(&mut action, ReceiptType::Denied, request_id).await?;
                self.alerts.action_outcome(&action).await?;
            }
            ApprovalStatus::Approved => {
                action.state = ActionState::Approved;
                self.persist(&mut action).await?;
                self.issue_receipt(&mut action, ReceiptType::Approved, request_id).await?;
                let (settled, output) = self.dispatch_approved(action, request_id).await?;
                action = settled;
                execution_output = output;
            }
            // Still mid-workflow: nothing changes on the action yet.
            ApprovalStatus::Pending | ApprovalStatus::Escalated => {}
        }

        let mut response = response_from(&action);
        response.output = execution_output;
        Ok(DecisionResponse {
            approval_status: outcome.approval.status,
            approval_progress: outcome.progress,
            action: response,
        })
    }

    /// Execute an action previously approved and parked on the backplane.
    /// Safe to re-enter: already-settled actions return their last state.
    pub async fn execute_approved_action(
        &self,
        tenant_id: &str,
        action_id: &str,
        request_id: &str,
    ) -> Result<ActionResponse, OarsError> {
        let mut action = self
            .store
            .get_action(tenant_id, action_id)
            .await?
            .ok_or_else(|| OarsError::NotFound(format!("action {action_id} not found")))?;

        match action.state {
            ActionState::Executed | ActionState::Failed => Ok(response_from(&action)),
            ActionState::Approved => {
                let output = self.execute_inner(&mut action, request_id).await?;
                let mut response = response_from(&action);
                response.output = output;
                Ok(response)
            }
            other => Err(OarsError::InvalidState(format!(
                "action {action_id} is {other}, not approved"
            ))),
        }
    }

    pub async fn get_action(
        &self,
        tenant_id: &str,
        action_id: &str,
    ) -> Result<ActionRecord, OarsError> {
        self.store
            .get_action(tenant_id, action_id)
            .await?
            .ok_or_else(|| OarsError::NotFound(format!("action {action_id} not found")))
    }

    async fn persist(&self, action: &mut ActionRecord) -> Result<(), OarsError> {
        action.updated_at = Utc::now();
        self.store.update_action(action.clone()).await?;
        Ok(())
    }

    /// Issue one receipt and append it to the action's ordered list.
    async fn issue_receipt(
        &self,
        action: &mut ActionRecord,
        receipt_type: ReceiptType,
        request_id: &str,
    ) -> Result<Receipt, OarsError> {
        let policy = action.policy.clone().unwrap_or(PolicySnapshot {
            decision: PolicyDecision::Allow,
            policy_set_id: None,
            policy_version: None,
            rule_ids: vec![],
            rationale: String::new(),
        });
        let risk = action.risk.clone().unwrap_or(RiskAssessment {
            score: 0,
            tier: oars_types::RiskTier::Low,
            signals: vec![],
        });
        let receipt = self
            .receipts
            .create_receipt(CreateReceipt {
                action,
                receipt_type,
                policy,
                risk,
                request_id,
            })
            .await?;
        action.receipt_ids.push(receipt.receipt_id.clone());
        self.persist(action).await?;
        Ok(receipt)
    }
}

fn response_from(action: &ActionRecord) -> ActionResponse {
    ActionResponse {
        action_id: action.action_id.clone(),
        state: action.state,
        policy: action.policy.clone(),
        risk: action.risk.clone(),
        approval_id: action.approval_id.clone(),
        step_up_required: None,
        receipt_ids: action.receipt_ids.clone(),
        output: None,
        last_error: action.last_error.clone(),
    }
}

/// Worker-facing seam: the backplane drives parked jobs through here.
#[async_trait]
impl JobExecutor for ActionService {
    async fn execute_job(&self, job: &ExecutionJob) -> Result<ActionState, String> {
        match self
            .execute_approved_action(&job.tenant_id, &job.action_id, &job.request_id)
            .await
        {
            Ok(response) => Ok(response.state),
            Err(error) => Err(error.to_string()),
        }
    }
}
