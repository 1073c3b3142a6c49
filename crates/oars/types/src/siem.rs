use crate::event::SecurityEvent;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Downstream SIEM target configuration. Each variant carries only what its
/// wire protocol needs; dispatch is by tag.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SiemTargetConfig {
    #[serde(rename_all = "camelCase")]
    GenericWebhook {
        id: String,
        url: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        auth_header: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    SplunkHec {
        id: String,
        url: String,
        token: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        index: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    DatadogLogs {
        id: String,
        site: String,
        api_key: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        service: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    SentinelLogAnalytics {
        id: String,
        workspace_id: String,
        shared_key: String,
        log_type: String,
    },
}

impl SiemTargetConfig {
    pub fn id(&self) -> &str {
        match self {
            SiemTargetConfig::GenericWebhook { id, .. }
            | SiemTargetConfig::SplunkHec { id, .. }
            | SiemTargetConfig::DatadogLogs { id, .. }
            | SiemTargetConfig::SentinelLogAnalytics { id, .. } => id,
        }
    }
}

/// Per-target delivery counters.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetMetrics {
    pub success_count: u64,
    pub failure_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// A failed delivery waiting for retry.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryQueueItem {
    pub target_id: String,
    pub event: SecurityEvent,
    pub attempts: u32,
    pub next_attempt_at: DateTime<Utc>,
    pub last_error: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadLetterStatus {
    Open,
    Replayed,
    Resolved,
}

/// An event that exhausted its retries for one target.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiemDeadLetter {
    pub id: String,
    pub tenant_id: String,
    pub target_id: String,
    pub event_id: String,
    pub event: SecurityEvent,
    pub attempts: u32,
    pub last_error: String,
    pub failed_at: DateTime<Utc>,
    pub replay_count: u32,
    pub status: DeadLetterStatus,
    pub updated_at: DateTime<Utc>,
}
