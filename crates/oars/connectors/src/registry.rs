//! Connector contract and registry.

use async_trait::async_trait;
use oars_types::ActionRecord;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Result of one connector dispatch.
#[derive(Clone, Debug)]
pub struct ConnectorResult {
    pub success: bool,
    pub output: Value,
    pub error: Option<String>,
}

impl ConnectorResult {
    pub fn ok(output: Value) -> Self {
        Self {
            success: true,
            output,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: Value::Null,
            error: Some(error.into()),
        }
    }
}

/// Pluggable tool implementation.
#[async_trait]
pub trait Connector: Send + Sync {
    fn tool_id(&self) -> &str;

    async fn execute(&self, action: &ActionRecord) -> ConnectorResult;
}

/// Registry keyed by tool id with an optional visibility allow-list.
pub struct ConnectorRegistry {
    connectors: HashMap<String, Arc<dyn Connector>>,
    allow_list: Option<Vec<String>>,
}

impl ConnectorRegistry {
    pub fn new(allow_list: Option<Vec<String>>) -> Self {
        Self {
            connectors: HashMap::new(),
            allow_list,
        }
    }

    /// Registry preloaded with the built-in simulator connectors.
    pub fn with_builtins(allow_list: Option<Vec<String>>) -> Self {
        let mut registry = Self::new(allow_list);
        for tool_id in ["jira", "slack", "iam", "confluence", "database"] {
            registry.register(Arc::new(SimulatedConnector::new(tool_id)));
        }
        registry
    }

    pub fn register(&mut self, connector: Arc<dyn Connector>) {
        self.connectors
            .insert(connector.tool_id().to_string(), connector);
    }

    /// Look up a connector, honoring the allow-list.
    pub fn get(&self, tool_id: &str) -> Option<Arc<dyn Connector>> {
        if let Some(allowed) = &self.allow_list {
            if !allowed.iter().any(|id| id == tool_id) {
                return None;
            }
        }
        self.connectors.get(tool_id).cloned()
    }

    /// Tool ids visible through the allow-list, sorted.
    pub fn visible_tool_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .connectors
            .keys()
            .filter(|id| {
                self.allow_list
                    .as_ref()
                    .map(|allowed| allowed.iter().any(|a| a == *id))
                    .unwrap_or(true)
            })
            .cloned()
            .collect();
        ids.sort();
        ids
    }
}

/// Deterministic stand-in for real connector business logic.
pub struct SimulatedConnector {
    tool_id: String,
}

impl SimulatedConnector {
    pub fn new(tool_id: impl Into<String>) -> Self {
        Self {
            tool_id: tool_id.into(),
        }
    }
}

#[async_trait]
impl Connector for SimulatedConnector {
    fn tool_id(&self) -> &str {
        &self.tool_id
    }

    async fn execute(&self, action: &ActionRecord) -> ConnectorResult {
        let mut output = json!({
            "toolId": self.tool_id,
            "operation": action.resource.operation,
            "target": action.resource.target,
            "status": "completed",
        });
        match self.tool_id.as_str() {
            "jira" => {
                output["ticketKey"] = json!(format!(
                    "{}-{}",
                    action
                        .resource
                        .target
                        .rsplit(':')
                        .next()
                        .unwrap_or("OPS"),
                    action.action_id.len()
                ));
            }
            "slack" => {
                output["messageTs"] = json!(action.created_at.timestamp().to_string());
            }
            "iam" => {
                output["appliedTo"] = json!(action.resource.target);
            }
            "database" => {
                output["rowsAffected"] = json!(0);
            }
            _ => {}
        }
        ConnectorResult::ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allow_list_hides_unlisted_connectors() {
        let registry = ConnectorRegistry::with_builtins(Some(vec!["jira".into(), "slack".into()]));
        assert!(registry.get("jira").is_some());
        assert!(registry.get("iam").is_none());
        assert_eq!(registry.visible_tool_ids(), vec!["jira", "slack"]);
    }

    #[test]
    fn no_allow_list_exposes_everything_registered() {
        let registry = ConnectorRegistry::with_builtins(None);
        assert_eq!(
            registry.visible_tool_ids(),
            vec!["confluence", "database", "iam", "jira", "slack"]
        );
    }
}
