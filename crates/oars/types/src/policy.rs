use crate::action::{PolicyDecision, RiskTier};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyStatus {
    Draft,
    Published,
}

/// UTC-hour window; `start_hour >= end_hour` wraps across midnight.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeWindowUtc {
    pub start_hour: u32,
    pub end_hour: u32,
}

impl TimeWindowUtc {
    /// Whether the given UTC hour falls inside `[start, end)`, wrapping
    /// when the window crosses midnight.
    pub fn contains_hour(&self, hour: u32) -> bool {
        if self.start_hour < self.end_hour {
            hour >= self.start_hour && hour < self.end_hour
        } else {
            hour >= self.start_hour || hour < self.end_hour
        }
    }
}

/// Match predicates for one rule; absent fields match everything and
/// present fields combine by AND.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleMatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_ids: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operations: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_contains: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk_tiers: Option<Vec<RiskTier>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environments: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required_data_types: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_window_utc: Option<TimeWindowUtc>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyRule {
    pub id: String,
    pub description: String,
    pub priority: i32,
    #[serde(rename = "match")]
    pub matcher: RuleMatch,
    pub decision: PolicyDecision,
}

/// A versioned set of rules; at most one published set per tenant.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicySet {
    pub policy_id: String,
    pub tenant_id: String,
    pub version: u32,
    pub status: PolicyStatus,
    /// Ordered by descending priority.
    pub rules: Vec<PolicyRule>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Result of evaluating an action against the tenant's policy.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyEvaluation {
    pub decision: PolicyDecision,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_set_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_version: Option<u32>,
    pub rule_ids: Vec<String>,
    pub rationale: String,
}

/// Result of rolling a tenant back to an older policy set.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackOutcome {
    pub policy: PolicySet,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_published_policy_id: Option<String>,
}
