//! End-to-end action lifecycle scenarios.

use oars_integration::{agent_claims, build_platform, queued_config, test_config};
use oars_receipts::VerifyRequest;
use oars_store::{AlertStore, QueryWindow, ReceiptStore};
use oars_types::{
    ActionActor, ActionContext, ActionResource, ActionState, DecisionVerdict, OarsError,
    ReceiptType, SubmitActionRequest,
};
use serde_json::json;

fn submit_request(tool: &str, operation: &str, target: &str) -> SubmitActionRequest {
    SubmitActionRequest {
        tenant_id: "tenant_alpha".into(),
        actor: ActionActor {
            agent_id: Some("agent_finops".into()),
            ..Default::default()
        },
        resource: ActionResource {
            tool_id: tool.into(),
            operation: operation.into(),
            target: target.into(),
        },
        input: json!({"summary": "quarterly access review"}),
        context: ActionContext::default(),
    }
}

#[tokio::test]
async fn low_risk_action_auto_executes_with_verifiable_receipt_chain() {
    let dir = tempfile::tempdir().unwrap();
    let platform = build_platform(test_config(dir.path())).await.unwrap();

    let response = platform
        .actions
        .submit_action(submit_request("jira", "create_ticket", "project:SEC"), "req_1")
        .await
        .unwrap();

    assert_eq!(response.state, ActionState::Executed);
    assert_eq!(response.receipt_ids.len(), 3);

    let receipts = platform
        .store
        .list_receipts_for_action("tenant_alpha", &response.action_id)
        .await
        .unwrap();
    let kinds: Vec<ReceiptType> = receipts.iter().map(|r| r.receipt_type).collect();
    assert_eq!(
        kinds,
        vec![ReceiptType::Requested, ReceiptType::Approved, ReceiptType::Executed]
    );

    for receipt in &receipts {
        let report = platform
            .receipts
            .verify(VerifyRequest::ById {
                tenant_id: "tenant_alpha".into(),
                receipt_id: receipt.receipt_id.clone(),
            })
            .await
            .unwrap();
        assert!(
            report.is_valid(),
            "receipt {} failed verification: {:?}",
            receipt.receipt_id,
            report.verification_errors
        );
    }

    // Chain linkage: first has no predecessor, the rest link in order.
    assert!(receipts[0].previous_receipt_id.is_none());
    assert_eq!(
        receipts[1].previous_receipt_id.as_deref(),
        Some(receipts[0].receipt_id.as_str())
    );
    assert_eq!(
        receipts[2].previous_receipt_id.as_deref(),
        Some(receipts[1].receipt_id.as_str())
    );
}

#[tokio::test]
async fn high_risk_action_requires_step_up_approval_then_executes() {
    let dir = tempfile::tempdir().unwrap();
    let platform = build_platform(test_config(dir.path())).await.unwrap();

    let response = platform
        .actions
        .submit_action(
            submit_request("iam", "change_permissions", "prod:finance"),
            "req_1",
        )
        .await
        .unwrap();
    assert_eq!(response.state, ActionState::ApprovalRequired);
    assert_eq!(response.step_up_required, Some(true));
    let approval_id = response.approval_id.clone().expect("approval opened");

    // Decision without step-up is refused.
    let refused = platform
        .actions
        .handle_approval_decision(
            "tenant_alpha",
            &approval_id,
            DecisionVerdict::Approve,
            "security_manager",
            "reviewed",
            "req_2",
            None,
        )
        .await;
    assert!(matches!(refused, Err(OarsError::StepUpRequired(_))));

    // With the dev code the approval settles and the action executes.
    let decided = platform
        .actions
        .handle_approval_decision(
            "tenant_alpha",
            &approval_id,
            DecisionVerdict::Approve,
            "security_manager",
            "reviewed",
            "req_3",
            Some("stepup_dev_code"),
        )
        .await
        .unwrap();
    assert_eq!(decided.action.state, ActionState::Executed);

    let alerts = platform
        .store
        .list_alerts("tenant_alpha", QueryWindow::default())
        .await
        .unwrap();
    assert!(
        alerts.items.iter().any(|a| a.name == "HIGH_RISK_EXECUTED"),
        "expected HIGH_RISK_EXECUTED alert, got {:?}",
        alerts.items.iter().map(|a| a.name.clone()).collect::<Vec<_>>()
    );
}

#[tokio::test]
async fn idempotent_submission_replays_and_conflicts() {
    let dir = tempfile::tempdir().unwrap();
    let platform = build_platform(test_config(dir.path())).await.unwrap();
    let claims = agent_claims("tenant_alpha", "agent_finops");

    let request = submit_request("jira", "create_ticket", "project:SEC");
    let first = platform
        .actions
        .submit_authorized(&claims, request.clone(), "req_1", Some("idem-1"))
        .await
        .unwrap();
    let second = platform
        .actions
        .submit_authorized(&claims, request.clone(), "req_2", Some("idem-1"))
        .await
        .unwrap();
    assert_eq!(first.action_id, second.action_id);

    let mut different = request;
    different.input = json!({"summary": "something else entirely"});
    let conflict = platform
        .actions
        .submit_authorized(&claims, different, "req_3", Some("idem-1"))
        .await;
    assert!(matches!(conflict, Err(OarsError::IdempotencyConflict(_))));
}

#[tokio::test]
async fn tenant_scope_is_enforced_at_the_boundary() {
    let dir = tempfile::tempdir().unwrap();
    let platform = build_platform(test_config(dir.path())).await.unwrap();
    let claims = agent_claims("tenant_beta", "agent_outsider");

    let result = platform
        .actions
        .submit_authorized(
            &claims,
            submit_request("jira", "create_ticket", "project:SEC"),
            "req_1",
            None,
        )
        .await;
    assert!(matches!(result, Err(OarsError::TenantScopeViolation(_))));
}

#[tokio::test]
async fn key_rotation_keeps_old_receipts_verifiable() {
    let dir = tempfile::tempdir().unwrap();
    let platform = build_platform(test_config(dir.path())).await.unwrap();

    let before = platform
        .actions
        .submit_action(submit_request("jira", "create_ticket", "project:SEC"), "req_1")
        .await
        .unwrap();

    platform.keys.rotate_tenant_key("tenant_alpha").await.unwrap();

    let after = platform
        .actions
        .submit_action(submit_request("jira", "create_ticket", "project:SEC"), "req_2")
        .await
        .unwrap();

    let old_receipt = platform
        .store
        .get_receipt("tenant_alpha", &before.receipt_ids[0])
        .await
        .unwrap()
        .unwrap();
    let new_receipt = platform
        .store
        .get_receipt("tenant_alpha", &after.receipt_ids[0])
        .await
        .unwrap()
        .unwrap();
    let old_key = old_receipt.integrity.as_ref().unwrap().signing_key_id.clone();
    let new_key = new_receipt.integrity.as_ref().unwrap().signing_key_id.clone();
    assert_ne!(old_key, new_key);

    let report = platform
        .receipts
        .verify(VerifyRequest::ById {
            tenant_id: "tenant_alpha".into(),
            receipt_id: old_receipt.receipt_id.clone(),
        })
        .await
        .unwrap();
    assert!(report.is_signature_valid, "{:?}", report.verification_errors);
}

#[tokio::test]
async fn queued_actions_park_until_a_worker_drives_them() {
    let dir = tempfile::tempdir().unwrap();
    let platform = build_platform(queued_config(dir.path())).await.unwrap();

    let response = platform
        .actions
        .submit_action(submit_request("jira", "create_ticket", "project:SEC"), "req_1")
        .await
        .unwrap();
    assert_eq!(response.state, ActionState::Approved);

    let backplane = platform.backplane.clone().expect("queue mode has a backplane");
    let depth = backplane.depth().await.unwrap();
    assert_eq!(depth.pending, 1);

    // Drive the parked job the way the worker loop would.
    let jobs = backplane.claim("test-worker", 5).await.unwrap();
    assert_eq!(jobs.len(), 1);
    let worker = oars_backplane::Worker::new(
        backplane.clone(),
        platform.actions.clone(),
        oars_backplane::WorkerSettings {
            worker_id: "test-worker".into(),
            ..Default::default()
        },
    );
    worker.drive(&jobs[0]).await.unwrap();

    let action = platform
        .actions
        .get_action("tenant_alpha", &response.action_id)
        .await
        .unwrap();
    assert_eq!(action.state, ActionState::Executed);

    let depth = backplane.depth().await.unwrap();
    assert_eq!(depth.pending + depth.running, 0);
}

#[tokio::test]
async fn forbidden_targets_settle_as_failed_actions() {
    let dir = tempfile::tempdir().unwrap();
    let platform = build_platform(test_config(dir.path())).await.unwrap();

    let response = platform
        .actions
        .submit_action(
            submit_request("slack", "send_email", "http://169.254.169.254/latest"),
            "req_1",
        )
        .await
        .unwrap();

    assert_eq!(response.state, ActionState::Failed);
    assert!(response.last_error.as_deref().unwrap().contains("forbidden target"));

    let receipts = platform
        .store
        .list_receipts_for_action("tenant_alpha", &response.action_id)
        .await
        .unwrap();
    assert_eq!(
        receipts.last().map(|r| r.receipt_type),
        Some(ReceiptType::Failed)
    );
}
