//! Ledger tamper detection, retention with legal hold, and the evidence
//! trail around executed actions.

use oars_integration::{build_platform, test_config};
use oars_ledger::LedgerError;
use oars_platform::PlatformContext;
use oars_store::{EventStore, QueryWindow};
use oars_types::{
    ActionActor, ActionContext, ActionResource, ActionState, SubmitActionRequest,
};
use serde_json::json;

fn submit_request() -> SubmitActionRequest {
    SubmitActionRequest {
        tenant_id: "tenant_alpha".into(),
        actor: ActionActor {
            agent_id: Some("agent_finops".into()),
            ..Default::default()
        },
        resource: ActionResource {
            tool_id: "jira".into(),
            operation: "create_ticket".into(),
            target: "project:SEC".into(),
        },
        input: json!({"summary": "audit evidence"}),
        context: ActionContext::default(),
    }
}

#[tokio::test]
async fn tampered_ledger_refuses_platform_startup() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());

    {
        let platform = build_platform(config.clone()).await.unwrap();
        platform
            .actions
            .submit_action(submit_request(), "req_1")
            .await
            .unwrap();
        platform.shutdown();
    }

    // Overwrite the first entry's payloadHash on disk.
    let ledger_path = dir.path().join("ledger.ndjson");
    let raw = std::fs::read_to_string(&ledger_path).unwrap();
    let mut lines: Vec<String> = raw.lines().map(str::to_string).collect();
    let mut first: serde_json::Value = serde_json::from_str(&lines[0]).unwrap();
    first["payloadHash"] = json!("0".repeat(64));
    lines[0] = first.to_string();
    std::fs::write(&ledger_path, lines.join("\n") + "\n").unwrap();

    let rebuilt = PlatformContext::build(config).await;
    assert!(rebuilt.is_err(), "tampered ledger must refuse to load");
}

#[tokio::test]
async fn retention_honors_legal_hold_then_prunes_with_archive() {
    let dir = tempfile::tempdir().unwrap();
    let platform = build_platform(test_config(dir.path())).await.unwrap();

    platform
        .actions
        .submit_action(submit_request(), "req_1")
        .await
        .unwrap();
    let before = platform.ledger.status().await.unwrap();
    assert!(before.entry_count > 0);

    // Legal hold blocks pruning.
    platform
        .retention
        .set_policy("tenant_alpha", 1, true, Some("litigation".into()), "admin_1")
        .await
        .unwrap();
    let held = platform.retention.apply_policy("tenant_alpha", None).await;
    assert!(matches!(held, Err(LedgerError::LegalHold(_))));

    // Release the hold, keep a one-day window, and advance the clock a
    // week: everything the tenant wrote becomes prunable.
    platform
        .retention
        .set_policy("tenant_alpha", 1, false, None, "admin_1")
        .await
        .unwrap();
    let report = platform
        .retention
        .apply_policy(
            "tenant_alpha",
            Some(chrono::Utc::now() + chrono::Duration::days(7)),
        )
        .await
        .unwrap();
    assert_eq!(report.pruned_count, before.entry_count);
    let archive_path = report.archive_path.expect("archive written");
    assert!(std::path::Path::new(&archive_path).exists());

    let integrity = platform.ledger.verify_integrity().await.unwrap();
    assert!(integrity.is_valid, "{:?}", integrity.errors);
}

#[tokio::test]
async fn executed_actions_leave_an_evidence_trail() {
    let dir = tempfile::tempdir().unwrap();
    let platform = build_platform(test_config(dir.path())).await.unwrap();

    let response = platform
        .actions
        .submit_action(submit_request(), "req_1")
        .await
        .unwrap();
    assert_eq!(response.state, ActionState::Executed);

    // Every receipt hangs off the action in the evidence graph.
    let edges = platform
        .evidence
        .neighbors("tenant_alpha", &response.action_id)
        .await
        .unwrap();
    assert_eq!(edges.len(), response.receipt_ids.len());

    // The ledger carries both receipts and the emitted security events.
    let entries = platform
        .ledger
        .list_entries_by_tenant("tenant_alpha", 0, None)
        .await
        .unwrap();
    let receipt_entries = entries
        .items
        .iter()
        .filter(|e| e.entity_type == "receipt")
        .count();
    assert_eq!(receipt_entries, response.receipt_ids.len());
    assert!(entries
        .items
        .iter()
        .any(|e| e.entity_type == "security_event"));

    // Control coverage sees the receipts.
    platform
        .controls
        .upsert_mapping(
            "tenant_alpha",
            "SOC2",
            "CC6.1",
            vec!["receipt".into()],
            "change control evidence",
        )
        .await
        .unwrap();
    let coverage = platform.controls.coverage_report("tenant_alpha").await.unwrap();
    assert_eq!(coverage[0].matching_entries as usize, response.receipt_ids.len());

    // And the store's event log saw the executed event.
    let events = platform
        .store
        .list_events("tenant_alpha", QueryWindow::default())
        .await
        .unwrap();
    assert!(events.items.iter().any(|e| e.event_type == "action.executed"));
}
