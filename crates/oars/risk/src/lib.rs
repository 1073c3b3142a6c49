//! OARS risk service.
//!
//! A pure scoring function over the requested resource. Deterministic by
//! construction: equal inputs always produce equal scores, tiers, and
//! signal lists, so risk snapshots on receipts are reproducible.

#![deny(unsafe_code)]

use oars_types::{ActionResource, RiskAssessment, RiskTier};

const BASE_SCORE: u32 = 20;

/// Operations that can destroy or exfiltrate data, or change who holds
/// power over it.
const DESTRUCTIVE_OPERATIONS: [&str; 6] = [
    "delete",
    "drop_database",
    "export_all",
    "transfer_funds",
    "change_permissions",
    "rotate_keys",
];

/// Operations that mutate state but are routine.
const MUTATING_OPERATIONS: [&str; 4] = ["update", "write", "create_ticket", "send_email"];

/// Score one resource request.
pub fn evaluate(resource: &ActionResource) -> RiskAssessment {
    let mut score = BASE_SCORE;
    let mut signals = Vec::new();

    if DESTRUCTIVE_OPERATIONS.contains(&resource.operation.as_str()) {
        score += 60;
        signals.push("destructive_operation".to_string());
    } else if MUTATING_OPERATIONS.contains(&resource.operation.as_str()) {
        score += 25;
        signals.push("mutating_operation".to_string());
    }

    if resource.target.contains("prod") {
        score += 15;
        signals.push("production_target".to_string());
    }
    if resource.target.contains("finance") {
        score += 20;
        signals.push("finance_target".to_string());
    }

    let score = score.min(100);
    RiskAssessment {
        score,
        tier: tier_for(score),
        signals,
    }
}

fn tier_for(score: u32) -> RiskTier {
    match score {
        90..=u32::MAX => RiskTier::Critical,
        70..=89 => RiskTier::High,
        40..=69 => RiskTier::Medium,
        _ => RiskTier::Low,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn resource(operation: &str, target: &str) -> ActionResource {
        ActionResource {
            tool_id: "jira".into(),
            operation: operation.into(),
            target: target.into(),
        }
    }

    #[test]
    fn read_on_staging_is_low() {
        let risk = evaluate(&resource("read", "staging:db"));
        assert_eq!(risk.score, 20);
        assert_eq!(risk.tier, RiskTier::Low);
        assert!(risk.signals.is_empty());
    }

    #[test]
    fn create_ticket_is_medium() {
        let risk = evaluate(&resource("create_ticket", "project:SEC"));
        assert_eq!(risk.score, 45);
        assert_eq!(risk.tier, RiskTier::Medium);
        assert_eq!(risk.signals, vec!["mutating_operation"]);
    }

    #[test]
    fn permission_change_on_prod_finance_is_critical() {
        let risk = evaluate(&resource("change_permissions", "prod:finance"));
        assert_eq!(risk.score, 100);
        assert_eq!(risk.tier, RiskTier::Critical);
        assert_eq!(
            risk.signals,
            vec!["destructive_operation", "production_target", "finance_target"]
        );
    }

    #[test]
    fn drop_database_alone_is_high() {
        let risk = evaluate(&resource("drop_database", "staging:db"));
        assert_eq!(risk.score, 80);
        assert_eq!(risk.tier, RiskTier::High);
    }

    #[test]
    fn tier_boundaries() {
        assert_eq!(tier_for(89), RiskTier::High);
        assert_eq!(tier_for(90), RiskTier::Critical);
        assert_eq!(tier_for(69), RiskTier::Medium);
        assert_eq!(tier_for(70), RiskTier::High);
        assert_eq!(tier_for(39), RiskTier::Low);
        assert_eq!(tier_for(40), RiskTier::Medium);
    }

    proptest! {
        #[test]
        fn score_is_always_bounded_and_deterministic(
            operation in "[a-z_]{1,20}",
            target in "[a-z:_]{0,30}",
        ) {
            let first = evaluate(&resource(&operation, &target));
            let second = evaluate(&resource(&operation, &target));
            prop_assert!(first.score <= 100);
            prop_assert_eq!(first.score, second.score);
            prop_assert_eq!(first.signals, second.signals);
        }
    }
}
