//! OARS policy service.
//!
//! Policy sets are versioned rule lists; at most one set per tenant is
//! published at a time. Evaluation walks the published rules in priority
//! order and the first match wins; without a published set a conservative
//! default policy applies.

#![deny(unsafe_code)]

use chrono::{Timelike, Utc};
use oars_store::PolicyStore;
use oars_types::{
    prefixed_id, ActionRecord, ActionState, OarsError, PolicyDecision, PolicyEvaluation,
    PolicyRule, PolicySet, PolicyStatus, RiskAssessment, RollbackOutcome,
};
use std::sync::Arc;
use tracing::info;

pub struct PolicyService {
    store: Arc<dyn PolicyStore>,
}

impl PolicyService {
    pub fn new(store: Arc<dyn PolicyStore>) -> Self {
        Self { store }
    }

    /// Create a draft policy set. Rules are stored sorted by descending
    /// priority so evaluation order is fixed at write time.
    pub async fn create_policy(
        &self,
        tenant_id: &str,
        version: u32,
        mut rules: Vec<PolicyRule>,
    ) -> Result<PolicySet, OarsError> {
        for rule in &rules {
            if rule.id.trim().is_empty() {
                return Err(OarsError::Validation("rule id must not be empty".into()));
            }
        }
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));

        let now = Utc::now();
        let policy = PolicySet {
            policy_id: prefixed_id("pol"),
            tenant_id: tenant_id.to_string(),
            version,
            status: PolicyStatus::Draft,
            rules,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_policy(policy.clone()).await?;
        Ok(policy)
    }

    pub async fn get_policy(
        &self,
        tenant_id: &str,
        policy_id: &str,
    ) -> Result<PolicySet, OarsError> {
        self.store
            .get_policy(tenant_id, policy_id)
            .await?
            .ok_or_else(|| OarsError::NotFound(format!("policy {policy_id} not found")))
    }

    /// Publish a draft; any other published set for the tenant is demoted
    /// in the same step.
    pub async fn publish_policy(
        &self,
        tenant_id: &str,
        policy_id: &str,
    ) -> Result<PolicySet, OarsError> {
        let demoted = self.store.set_published_policy(tenant_id, policy_id).await?;
        info!(tenant = tenant_id, policy = policy_id, ?demoted, "policy published");
        self.get_policy(tenant_id, policy_id).await
    }

    /// Re-publish an older set. Fails when the target is already the
    /// current published policy.
    pub async fn rollback_policy(
        &self,
        tenant_id: &str,
        policy_id: &str,
    ) -> Result<RollbackOutcome, OarsError> {
        let target = self.get_policy(tenant_id, policy_id).await?;
        if target.status == PolicyStatus::Published {
            return Err(OarsError::Validation(format!(
                "policy {policy_id} is already the current published policy"
            )));
        }

        let previous_published_policy_id =
            self.store.set_published_policy(tenant_id, policy_id).await?;
        let policy = self.get_policy(tenant_id, policy_id).await?;
        Ok(RollbackOutcome {
            policy,
            previous_published_policy_id,
        })
    }

    pub async fn list_policies(
        &self,
        tenant_id: &str,
        window: oars_store::QueryWindow,
    ) -> Result<oars_types::Page<PolicySet>, OarsError> {
        Ok(self.store.list_policies(tenant_id, window).await?)
    }

    /// Evaluate an action against the tenant's policy. `policy_id` pins a
    /// specific set (published or draft) for dry runs; otherwise the
    /// published set applies, falling back to the default policy.
    pub async fn evaluate(
        &self,
        action: &ActionRecord,
        risk: &RiskAssessment,
        policy_id: Option<&str>,
    ) -> Result<PolicyEvaluation, OarsError> {
        let policy = match policy_id {
            Some(id) => Some(self.get_policy(&action.tenant_id, id).await?),
            None => self.store.find_published_policy(&action.tenant_id).await?,
        };

        let Some(policy) = policy else {
            return Ok(default_policy_evaluation(action, risk));
        };

        let mut rules = policy.rules.clone();
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));

        for rule in &rules {
            if rule_matches(rule, action, risk) {
                return Ok(PolicyEvaluation {
                    decision: rule.decision,
                    policy_set_id: Some(policy.policy_id.clone()),
                    policy_version: Some(policy.version),
                    rule_ids: vec![rule.id.clone()],
                    rationale: format!("Matched rule {}: {}", rule.id, rule.description),
                });
            }
        }

        Ok(PolicyEvaluation {
            decision: PolicyDecision::Allow,
            policy_set_id: Some(policy.policy_id.clone()),
            policy_version: Some(policy.version),
            rule_ids: vec![],
            rationale: "No matching rule; default allow.".to_string(),
        })
    }
}

/// Map a policy decision onto the action state it produces.
pub fn decision_to_state(decision: PolicyDecision) -> ActionState {
    match decision {
        PolicyDecision::Deny => ActionState::Denied,
        PolicyDecision::Approve => ActionState::ApprovalRequired,
        PolicyDecision::Quarantine => ActionState::Quarantined,
        PolicyDecision::Allow => ActionState::Approved,
    }
}

fn default_policy_evaluation(action: &ActionRecord, risk: &RiskAssessment) -> PolicyEvaluation {
    use oars_types::RiskTier;

    if action.resource.operation == "drop_database" {
        return PolicyEvaluation {
            decision: PolicyDecision::Deny,
            policy_set_id: None,
            policy_version: None,
            rule_ids: vec!["default-drop-database".to_string()],
            rationale: "Default policy: drop_database is denied.".to_string(),
        };
    }
    if matches!(risk.tier, RiskTier::High | RiskTier::Critical) {
        return PolicyEvaluation {
            decision: PolicyDecision::Approve,
            policy_set_id: None,
            policy_version: None,
            rule_ids: vec!["default-high-risk".to_string()],
            rationale: "Default policy: high risk requires approval.".to_string(),
        };
    }
    PolicyEvaluation {
        decision: PolicyDecision::Allow,
        policy_set_id: None,
        policy_version: None,
        rule_ids: vec![],
        rationale: "Default policy: allow.".to_string(),
    }
}

/// All present predicates must hold for a rule to match.
fn rule_matches(rule: &PolicyRule, action: &ActionRecord, risk: &RiskAssessment) -> bool {
    let matcher = &rule.matcher;

    if let Some(tool_ids) = &matcher.tool_ids {
        if !tool_ids.contains(&action.resource.tool_id) {
            return false;
        }
    }
    if let Some(operations) = &matcher.operations {
        if !operations.contains(&action.resource.operation) {
            return false;
        }
    }
    if let Some(fragment) = &matcher.target_contains {
        if !action.resource.target.contains(fragment.as_str()) {
            return false;
        }
    }
    if let Some(tiers) = &matcher.risk_tiers {
        if !tiers.contains(&risk.tier) {
            return false;
        }
    }
    if let Some(environments) = &matcher.environments {
        match &action.context.environment {
            Some(environment) if environments.contains(environment) => {}
            _ => return false,
        }
    }
    if let Some(required) = &matcher.required_data_types {
        if !required
            .iter()
            .all(|t| action.context.data_types.contains(t))
        {
            return false;
        }
    }
    if let Some(window) = &matcher.time_window_utc {
        let at = action
            .context
            .requested_at
            .unwrap_or(action.created_at);
        if !window.contains_hour(at.hour()) {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use oars_crypto::FieldProtection;
    use oars_store::file::FilePlatformStore;
    use oars_types::{
        ActionActor, ActionContext, ActionResource, RiskTier, RuleMatch, TimeWindowUtc,
    };
    use serde_json::json;

    fn service() -> PolicyService {
        PolicyService::new(Arc::new(FilePlatformStore::in_memory(
            FieldProtection::disabled(),
        )))
    }

    fn action(operation: &str, target: &str) -> ActionRecord {
        let now = Utc::now();
        ActionRecord {
            action_id: prefixed_id("act"),
            tenant_id: "tenant_alpha".into(),
            state: ActionState::Requested,
            actor: ActionActor::default(),
            resource: ActionResource {
                tool_id: "jira".into(),
                operation: operation.into(),
                target: target.into(),
            },
            input: json!({}),
            context: ActionContext::default(),
            policy: None,
            risk: None,
            approval_id: None,
            receipt_ids: vec![],
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn rule(id: &str, priority: i32, matcher: RuleMatch, decision: PolicyDecision) -> PolicyRule {
        PolicyRule {
            id: id.into(),
            description: format!("rule {id}"),
            priority,
            matcher,
            decision,
        }
    }

    fn low_risk() -> RiskAssessment {
        RiskAssessment {
            score: 20,
            tier: RiskTier::Low,
            signals: vec![],
        }
    }

    #[tokio::test]
    async fn publish_demotes_previous_published_set() {
        let service = service();
        let first = service.create_policy("tenant_alpha", 1, vec![]).await.unwrap();
        let second = service.create_policy("tenant_alpha", 2, vec![]).await.unwrap();

        service.publish_policy("tenant_alpha", &first.policy_id).await.unwrap();
        service.publish_policy("tenant_alpha", &second.policy_id).await.unwrap();

        let first = service.get_policy("tenant_alpha", &first.policy_id).await.unwrap();
        let second = service.get_policy("tenant_alpha", &second.policy_id).await.unwrap();
        assert_eq!(first.status, PolicyStatus::Draft);
        assert_eq!(second.status, PolicyStatus::Published);
    }

    #[tokio::test]
    async fn rollback_republishes_older_set() {
        let service = service();
        let v1 = service.create_policy("tenant_alpha", 1, vec![]).await.unwrap();
        let v2 = service.create_policy("tenant_alpha", 2, vec![]).await.unwrap();
        service.publish_policy("tenant_alpha", &v1.policy_id).await.unwrap();
        service.publish_policy("tenant_alpha", &v2.policy_id).await.unwrap();

        let outcome = service.rollback_policy("tenant_alpha", &v1.policy_id).await.unwrap();
        assert_eq!(outcome.policy.status, PolicyStatus::Published);
        assert_eq!(
            outcome.previous_published_policy_id.as_deref(),
            Some(v2.policy_id.as_str())
        );

        let again = service.rollback_policy("tenant_alpha", &v1.policy_id).await;
        assert!(matches!(again, Err(OarsError::Validation(_))));
    }

    #[tokio::test]
    async fn higher_priority_rule_wins_when_both_match() {
        let service = service();
        let policy = service
            .create_policy(
                "tenant_alpha",
                1,
                vec![
                    rule("low", 10, RuleMatch::default(), PolicyDecision::Allow),
                    rule("high", 100, RuleMatch::default(), PolicyDecision::Deny),
                ],
            )
            .await
            .unwrap();
        service.publish_policy("tenant_alpha", &policy.policy_id).await.unwrap();

        let result = service
            .evaluate(&action("read", "staging"), &low_risk(), None)
            .await
            .unwrap();
        assert_eq!(result.decision, PolicyDecision::Deny);
        assert_eq!(result.rule_ids, vec!["high"]);
    }

    #[tokio::test]
    async fn predicates_combine_by_and() {
        let service = service();
        let policy = service
            .create_policy(
                "tenant_alpha",
                1,
                vec![rule(
                    "prod-writes",
                    50,
                    RuleMatch {
                        operations: Some(vec!["write".into()]),
                        target_contains: Some("prod".into()),
                        ..Default::default()
                    },
                    PolicyDecision::Approve,
                )],
            )
            .await
            .unwrap();
        service.publish_policy("tenant_alpha", &policy.policy_id).await.unwrap();

        let matched = service
            .evaluate(&action("write", "prod:db"), &low_risk(), None)
            .await
            .unwrap();
        assert_eq!(matched.decision, PolicyDecision::Approve);

        let half_matched = service
            .evaluate(&action("write", "staging:db"), &low_risk(), None)
            .await
            .unwrap();
        assert_eq!(half_matched.decision, PolicyDecision::Allow);
        assert_eq!(half_matched.rationale, "No matching rule; default allow.");
    }

    #[tokio::test]
    async fn wrapping_time_window_matches_overnight_hours() {
        let service = service();
        let policy = service
            .create_policy(
                "tenant_alpha",
                1,
                vec![rule(
                    "after-hours",
                    50,
                    RuleMatch {
                        time_window_utc: Some(TimeWindowUtc {
                            start_hour: 22,
                            end_hour: 2,
                        }),
                        ..Default::default()
                    },
                    PolicyDecision::Approve,
                )],
            )
            .await
            .unwrap();
        service.publish_policy("tenant_alpha", &policy.policy_id).await.unwrap();

        for (hour, expected) in [(23u32, PolicyDecision::Approve), (1, PolicyDecision::Approve), (2, PolicyDecision::Allow), (12, PolicyDecision::Allow)] {
            let mut act = action("read", "staging");
            act.context.requested_at =
                Some(Utc.with_ymd_and_hms(2026, 3, 10, hour, 30, 0).unwrap());
            let result = service.evaluate(&act, &low_risk(), None).await.unwrap();
            assert_eq!(result.decision, expected, "hour {hour}");
        }
    }

    #[tokio::test]
    async fn required_data_types_must_all_be_present() {
        let service = service();
        let policy = service
            .create_policy(
                "tenant_alpha",
                1,
                vec![rule(
                    "pii-export",
                    50,
                    RuleMatch {
                        required_data_types: Some(vec!["pii".into(), "financial".into()]),
                        ..Default::default()
                    },
                    PolicyDecision::Quarantine,
                )],
            )
            .await
            .unwrap();
        service.publish_policy("tenant_alpha", &policy.policy_id).await.unwrap();

        let mut both = action("read", "staging");
        both.context.data_types = vec!["pii".into(), "financial".into(), "logs".into()];
        assert_eq!(
            service.evaluate(&both, &low_risk(), None).await.unwrap().decision,
            PolicyDecision::Quarantine
        );

        let mut partial = action("read", "staging");
        partial.context.data_types = vec!["pii".into()];
        assert_eq!(
            service.evaluate(&partial, &low_risk(), None).await.unwrap().decision,
            PolicyDecision::Allow
        );
    }

    #[tokio::test]
    async fn default_policy_applies_without_published_set() {
        let service = service();

        let denied = service
            .evaluate(&action("drop_database", "prod:db"), &low_risk(), None)
            .await
            .unwrap();
        assert_eq!(denied.decision, PolicyDecision::Deny);

        let high = RiskAssessment {
            score: 95,
            tier: RiskTier::Critical,
            signals: vec![],
        };
        let approval = service
            .evaluate(&action("change_permissions", "prod:finance"), &high, None)
            .await
            .unwrap();
        assert_eq!(approval.decision, PolicyDecision::Approve);

        let allowed = service
            .evaluate(&action("read", "staging"), &low_risk(), None)
            .await
            .unwrap();
        assert_eq!(allowed.decision, PolicyDecision::Allow);
    }

    #[test]
    fn decision_state_mapping() {
        assert_eq!(decision_to_state(PolicyDecision::Deny), ActionState::Denied);
        assert_eq!(
            decision_to_state(PolicyDecision::Approve),
            ActionState::ApprovalRequired
        );
        assert_eq!(
            decision_to_state(PolicyDecision::Quarantine),
            ActionState::Quarantined
        );
        assert_eq!(decision_to_state(PolicyDecision::Allow), ActionState::Approved);
    }
}
