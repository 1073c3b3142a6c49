//! Per-target wire rendering.
//!
//! Each variant knows its own endpoint shape, auth headers, and envelope;
//! Sentinel additionally signs every request with the workspace shared key
//! per the Log Analytics HTTP Data Collector scheme.

use crate::transport::DeliveryRequest;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use oars_crypto::hmac_sha256;
use oars_types::{SecurityEvent, SiemTargetConfig};
use serde_json::json;

/// Render one event for one target.
pub fn build_delivery(
    target: &SiemTargetConfig,
    event: &SecurityEvent,
) -> Result<DeliveryRequest, String> {
    match target {
        SiemTargetConfig::GenericWebhook { url, auth_header, .. } => {
            let mut headers = vec![("content-type".to_string(), "application/json".to_string())];
            if let Some(auth) = auth_header {
                headers.push(("authorization".to_string(), auth.clone()));
            }
            Ok(DeliveryRequest {
                url: url.clone(),
                headers,
                body: serde_json::to_value(event).map_err(|e| e.to_string())?,
            })
        }
        SiemTargetConfig::SplunkHec { url, token, index, .. } => {
            let mut body = json!({
                "event": event,
                "sourcetype": "oars:security_event",
                "time": event.occurred_at.timestamp(),
            });
            if let Some(index) = index {
                body["index"] = json!(index);
            }
            Ok(DeliveryRequest {
                url: format!("{}/services/collector/event", url.trim_end_matches('/')),
                headers: vec![
                    ("authorization".to_string(), format!("Splunk {token}")),
                    ("content-type".to_string(), "application/json".to_string()),
                ],
                body,
            })
        }
        SiemTargetConfig::DatadogLogs { site, api_key, service, .. } => {
            let body = json!([{
                "ddsource": "oars",
                "service": service.clone().unwrap_or_else(|| "oars".to_string()),
                "ddtags": format!("tenant:{}", event.tenant_id),
                "message": serde_json::to_string(event).map_err(|e| e.to_string())?,
            }]);
            Ok(DeliveryRequest {
                url: format!("https://http-intake.logs.{site}/api/v2/logs"),
                headers: vec![
                    ("dd-api-key".to_string(), api_key.clone()),
                    ("content-type".to_string(), "application/json".to_string()),
                ],
                body,
            })
        }
        SiemTargetConfig::SentinelLogAnalytics {
            workspace_id,
            shared_key,
            log_type,
            ..
        } => {
            let body = serde_json::to_value(event).map_err(|e| e.to_string())?;
            let content = serde_json::to_string(&body).map_err(|e| e.to_string())?;
            let date = Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string();
            let string_to_sign = format!(
                "POST\n{}\napplication/json\nx-ms-date:{}\n/api/logs",
                content.len(),
                date
            );
            let key = BASE64
                .decode(shared_key)
                .map_err(|e| format!("sentinel shared key is not base64: {e}"))?;
            let signature = BASE64.encode(hmac_sha256(&key, string_to_sign.as_bytes()));
            Ok(DeliveryRequest {
                url: format!(
                    "https://{workspace_id}.ods.opinsights.azure.com/api/logs?api-version=2016-04-01"
                ),
                headers: vec![
                    (
                        "authorization".to_string(),
                        format!("SharedKey {workspace_id}:{signature}"),
                    ),
                    ("log-type".to_string(), log_type.clone()),
                    ("x-ms-date".to_string(), date),
                    ("content-type".to_string(), "application/json".to_string()),
                ],
                body,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oars_types::{prefixed_id, EventSeverity};

    fn event() -> SecurityEvent {
        SecurityEvent {
            event_id: prefixed_id("evt"),
            tenant_id: "tenant_alpha".into(),
            event_type: "action.executed".into(),
            severity: EventSeverity::Info,
            actor: "agent_finops".into(),
            occurred_at: Utc::now(),
            payload: json!({"actionId": "act_1"}),
        }
    }

    #[test]
    fn webhook_carries_auth_header_when_configured() {
        let target = SiemTargetConfig::GenericWebhook {
            id: "hook1".into(),
            url: "https://siem.example.com/ingest".into(),
            auth_header: Some("Bearer tok".into()),
        };
        let request = build_delivery(&target, &event()).unwrap();
        assert_eq!(request.url, "https://siem.example.com/ingest");
        assert!(request
            .headers
            .iter()
            .any(|(k, v)| k == "authorization" && v == "Bearer tok"));
    }

    #[test]
    fn splunk_wraps_event_and_appends_collector_path() {
        let target = SiemTargetConfig::SplunkHec {
            id: "splunk".into(),
            url: "https://hec.example.com:8088/".into(),
            token: "tok".into(),
            index: Some("security".into()),
        };
        let request = build_delivery(&target, &event()).unwrap();
        assert_eq!(request.url, "https://hec.example.com:8088/services/collector/event");
        assert_eq!(request.body["index"], "security");
        assert!(request.body["event"]["eventType"].is_string());
    }

    #[test]
    fn sentinel_signs_with_shared_key() {
        let target = SiemTargetConfig::SentinelLogAnalytics {
            id: "sentinel".into(),
            workspace_id: "ws1".into(),
            shared_key: BASE64.encode(b"secret-key"),
            log_type: "OarsSecurityEvent".into(),
        };
        let request = build_delivery(&target, &event()).unwrap();
        let auth = request
            .headers
            .iter()
            .find(|(k, _)| k == "authorization")
            .map(|(_, v)| v.clone())
            .unwrap();
        assert!(auth.starts_with("SharedKey ws1:"));
        assert!(request.headers.iter().any(|(k, _)| k == "x-ms-date"));
    }

    #[test]
    fn sentinel_rejects_invalid_shared_key() {
        let target = SiemTargetConfig::SentinelLogAnalytics {
            id: "sentinel".into(),
            workspace_id: "ws1".into(),
            shared_key: "!!not-base64!!".into(),
            log_type: "Oars".into(),
        };
        assert!(build_delivery(&target, &event()).is_err());
    }
}
