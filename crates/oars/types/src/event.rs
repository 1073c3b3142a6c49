use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSeverity {
    Info,
    Warning,
    Critical,
}

/// A domain event published into the ledger, the store, and SIEM targets.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityEvent {
    pub event_id: String,
    pub tenant_id: String,
    pub event_type: String,
    pub severity: EventSeverity,
    pub actor: String,
    pub occurred_at: DateTime<Utc>,
    pub payload: Value,
}

/// Routes matching events to an alert channel.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertRoutingRule {
    pub rule_id: String,
    pub tenant_id: String,
    /// Event-type prefix match; empty matches everything.
    #[serde(default)]
    pub event_type_prefix: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_severity: Option<EventSeverity>,
    pub channel: String,
    pub enabled: bool,
    pub updated_at: DateTime<Utc>,
}

/// An alert raised by routing rules or built-in outcomes.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub alert_id: String,
    pub tenant_id: String,
    pub name: String,
    pub severity: EventSeverity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_id: Option<String>,
    pub channel: String,
    pub created_at: DateTime<Utc>,
    pub payload: Value,
}
