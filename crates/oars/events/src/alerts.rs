//! Alert routing over the security event stream.
//!
//! Tenant routing rules match on event-type prefix and minimum severity.
//! Built-in action outcomes raise platform alerts (high-risk execution,
//! policy denial, execution failure) without requiring a rule.

use crate::SecurityEventService;
use chrono::Utc;
use oars_store::AlertStore;
use oars_types::{
    prefixed_id, ActionRecord, ActionState, Alert, EventSeverity, OarsError, RiskTier,
    SecurityEvent,
};
use serde_json::json;
use std::sync::Arc;

pub struct AlertRouter {
    store: Arc<dyn AlertStore>,
    events: Arc<SecurityEventService>,
}

impl AlertRouter {
    pub fn new(store: Arc<dyn AlertStore>, events: Arc<SecurityEventService>) -> Self {
        Self { store, events }
    }

    /// Apply the tenant's routing rules to one event. Alert-stream events
    /// are never routed again, so a broad rule cannot feed back on itself.
    pub async fn route(&self, event: &SecurityEvent) -> Result<Vec<Alert>, OarsError> {
        if event.event_type.starts_with("alert.") {
            return Ok(Vec::new());
        }

        let rules = self.store.list_alert_rules(&event.tenant_id).await?;
        let mut raised = Vec::new();
        for rule in rules.into_iter().filter(|r| r.enabled) {
            if !event.event_type.starts_with(&rule.event_type_prefix) {
                continue;
            }
            if let Some(min) = rule.min_severity {
                if event.severity < min {
                    continue;
                }
            }
            let alert = self
                .raise(
                    &event.tenant_id,
                    &format!("ROUTED_{}", rule.rule_id),
                    event.severity,
                    Some(rule.rule_id.clone()),
                    None,
                    &rule.channel,
                    json!({"eventId": event.event_id, "eventType": event.event_type}),
                )
                .await?;
            raised.push(alert);
        }
        Ok(raised)
    }

    /// Built-in outcome alerts for terminal action states.
    pub async fn action_outcome(&self, action: &ActionRecord) -> Result<Option<Alert>, OarsError> {
        let tier = action.risk.as_ref().map(|r| r.tier).unwrap_or(RiskTier::Low);
        let (name, severity) = match action.state {
            ActionState::Executed if tier >= RiskTier::High => {
                ("HIGH_RISK_EXECUTED", EventSeverity::Critical)
            }
            ActionState::Denied | ActionState::Quarantined => {
                ("POLICY_DENIED", EventSeverity::Warning)
            }
            ActionState::Failed => ("EXECUTION_FAILED", EventSeverity::Warning),
            _ => return Ok(None),
        };

        let alert = self
            .raise(
                &action.tenant_id,
                name,
                severity,
                None,
                Some(action.action_id.clone()),
                "default",
                json!({
                    "actionId": action.action_id,
                    "state": action.state,
                    "toolId": action.resource.tool_id,
                    "operation": action.resource.operation,
                    "riskTier": tier,
                }),
            )
            .await?;
        Ok(Some(alert))
    }

    #[allow(clippy::too_many_arguments)]
    async fn raise(
        &self,
        tenant_id: &str,
        name: &str,
        severity: EventSeverity,
        rule_id: Option<String>,
        action_id: Option<String>,
        channel: &str,
        payload: serde_json::Value,
    ) -> Result<Alert, OarsError> {
        let alert = Alert {
            alert_id: prefixed_id("alr"),
            tenant_id: tenant_id.to_string(),
            name: name.to_string(),
            severity,
            rule_id,
            action_id,
            channel: channel.to_string(),
            created_at: Utc::now(),
            payload: payload.clone(),
        };
        self.store.insert_alert(alert.clone()).await?;
        self.events
            .publish(
                tenant_id,
                "alert.triggered",
                severity,
                "alert-router",
                json!({"alertId": alert.alert_id, "name": name, "channel": channel, "detail": payload}),
            )
            .await?;
        Ok(alert)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::fixture;
    use oars_store::QueryWindow;
    use oars_types::{
        ActionActor, ActionContext, ActionResource, AlertRoutingRule, RiskAssessment,
    };

    fn executed_action(tier: RiskTier) -> ActionRecord {
        let now = Utc::now();
        ActionRecord {
            action_id: prefixed_id("act"),
            tenant_id: "tenant_alpha".into(),
            state: ActionState::Executed,
            actor: ActionActor::default(),
            resource: ActionResource {
                tool_id: "iam".into(),
                operation: "change_permissions".into(),
                target: "prod:finance".into(),
            },
            input: json!({}),
            context: ActionContext::default(),
            policy: None,
            risk: Some(RiskAssessment {
                score: 95,
                tier,
                signals: vec![],
            }),
            approval_id: None,
            receipt_ids: vec![],
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn high_risk_execution_raises_alert() {
        let dir = tempfile::tempdir().unwrap();
        let (events, store, _ledger) = fixture(&dir).await;
        let router = AlertRouter::new(store.clone(), Arc::new(events));

        let alert = router
            .action_outcome(&executed_action(RiskTier::Critical))
            .await
            .unwrap()
            .expect("alert raised");
        assert_eq!(alert.name, "HIGH_RISK_EXECUTED");

        let alerts = store.list_alerts("tenant_alpha", QueryWindow::default()).await.unwrap();
        assert_eq!(alerts.total, 1);
    }

    #[tokio::test]
    async fn low_risk_execution_raises_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let (events, store, _ledger) = fixture(&dir).await;
        let router = AlertRouter::new(store.clone(), Arc::new(events));

        let result = router
            .action_outcome(&executed_action(RiskTier::Low))
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn routing_rules_match_prefix_and_severity() {
        let dir = tempfile::tempdir().unwrap();
        let (events, store, _ledger) = fixture(&dir).await;
        let events = Arc::new(events);
        let router = AlertRouter::new(store.clone(), Arc::clone(&events));

        store
            .upsert_alert_rule(AlertRoutingRule {
                rule_id: "rule_approvals".into(),
                tenant_id: "tenant_alpha".into(),
                event_type_prefix: "approval.".into(),
                min_severity: Some(EventSeverity::Warning),
                channel: "pagerduty".into(),
                enabled: true,
                updated_at: Utc::now(),
            })
            .await
            .unwrap();

        let matching = events
            .publish(
                "tenant_alpha",
                "approval.escalated",
                EventSeverity::Warning,
                "system",
                json!({}),
            )
            .await
            .unwrap();
        let raised = router.route(&matching).await.unwrap();
        assert_eq!(raised.len(), 1);
        assert_eq!(raised[0].channel, "pagerduty");

        let below_threshold = events
            .publish(
                "tenant_alpha",
                "approval.opened",
                EventSeverity::Info,
                "system",
                json!({}),
            )
            .await
            .unwrap();
        assert!(router.route(&below_threshold).await.unwrap().is_empty());

        let wrong_prefix = events
            .publish(
                "tenant_alpha",
                "policy.published",
                EventSeverity::Critical,
                "system",
                json!({}),
            )
            .await
            .unwrap();
        assert!(router.route(&wrong_prefix).await.unwrap().is_empty());
    }
}
