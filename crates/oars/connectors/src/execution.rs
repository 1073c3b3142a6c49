//! Execution service: guards, dispatch, and output sanitization.

use crate::registry::ConnectorRegistry;
use crate::sandbox::is_forbidden_target;
use chrono::{DateTime, Utc};
use oars_types::ActionRecord;
use oars_vault::VaultSecretService;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{info, warn};

const REDACTED_KEYS: [&str; 3] = ["password", "secret", "token"];

/// What came back from dispatching one approved action.
#[derive(Clone, Debug)]
pub struct ExecutionOutcome {
    pub success: bool,
    pub output: Value,
    pub error: Option<String>,
    pub executed_at: DateTime<Utc>,
}

impl ExecutionOutcome {
    fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: Value::Null,
            error: Some(error.into()),
            executed_at: Utc::now(),
        }
    }
}

pub struct ExecutionService {
    registry: Arc<ConnectorRegistry>,
    vault: Arc<VaultSecretService>,
}

impl ExecutionService {
    pub fn new(registry: Arc<ConnectorRegistry>, vault: Arc<VaultSecretService>) -> Self {
        Self { registry, vault }
    }

    /// Execute an approved action. Guard failures and connector errors
    /// come back as failed outcomes, never as panics or raised errors.
    pub async fn execute(&self, action: &ActionRecord) -> ExecutionOutcome {
        // Simulator path for exercising the failure pipeline end to end.
        if action.resource.operation.contains("fail") {
            return ExecutionOutcome::failure(format!(
                "synthetic failure for operation {}",
                action.resource.operation
            ));
        }

        if is_forbidden_target(&action.resource.target) {
            warn!(
                action = %action.action_id,
                target = %action.resource.target,
                "execution refused by target sandbox"
            );
            return ExecutionOutcome::failure(format!(
                "forbidden target: {}",
                action.resource.target
            ));
        }

        if action.resource.tool_id == "database" {
            match self
                .vault
                .has_secret(&action.tenant_id, "database", "connection")
                .await
            {
                Ok(true) => {}
                Ok(false) => {
                    return ExecutionOutcome::failure(
                        "missing vault secret (database, connection) for tenant",
                    );
                }
                Err(error) => {
                    return ExecutionOutcome::failure(format!("vault lookup failed: {error}"));
                }
            }
        }

        let Some(connector) = self.registry.get(&action.resource.tool_id) else {
            return ExecutionOutcome::failure(format!(
                "no connector registered for tool {}",
                action.resource.tool_id
            ));
        };

        let result = connector.execute(action).await;
        let mut output = sanitize(result.output);
        if let Value::Object(map) = &mut output {
            map.insert(
                "referenceId".to_string(),
                json!(format!("exec_{}", action.action_id)),
            );
        } else if result.success {
            output = json!({
                "result": output,
                "referenceId": format!("exec_{}", action.action_id),
            });
        }

        info!(
            action = %action.action_id,
            tool = %action.resource.tool_id,
            success = result.success,
            "connector dispatch finished"
        );
        ExecutionOutcome {
            success: result.success,
            output,
            error: result.error,
            executed_at: Utc::now(),
        }
    }
}

/// Redact credential-shaped keys anywhere in the output document.
fn sanitize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, inner) in map {
                let lowered = key.to_ascii_lowercase();
                if REDACTED_KEYS.contains(&lowered.as_str()) {
                    out.insert(key, json!("[REDACTED]"));
                } else {
                    out.insert(key, sanitize(inner));
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sanitize).collect()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Connector, ConnectorResult};
    use async_trait::async_trait;
    use oars_crypto::FieldProtection;
    use oars_store::file::FilePlatformStore;
    use oars_types::{prefixed_id, ActionActor, ActionContext, ActionResource, ActionState};

    fn action(tool: &str, operation: &str, target: &str) -> ActionRecord {
        let now = Utc::now();
        ActionRecord {
            action_id: prefixed_id("act"),
            tenant_id: "tenant_alpha".into(),
            state: ActionState::Approved,
            actor: ActionActor::default(),
            resource: ActionResource {
                tool_id: tool.into(),
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

    fn vault() -> Arc<VaultSecretService> {
        Arc::new(VaultSecretService::new(Arc::new(
            FilePlatformStore::in_memory(FieldProtection::disabled()),
        )))
    }

    fn service() -> ExecutionService {
        ExecutionService::new(Arc::new(ConnectorRegistry::with_builtins(None)), vault())
    }

    #[tokio::test]
    async fn successful_dispatch_attaches_reference_id() {
        let service = service();
        let action = action("jira", "create_ticket", "project:SEC");
        let outcome = service.execute(&action).await;
        assert!(outcome.success);
        assert_eq!(
            outcome.output["referenceId"],
            format!("exec_{}", action.action_id)
        );
    }

    #[tokio::test]
    async fn fail_operations_take_the_synthetic_path() {
        let service = service();
        let outcome = service.execute(&action("jira", "always_fail", "project:SEC")).await;
        assert!(!outcome.success);
        assert!(outcome.error.as_deref().unwrap().contains("synthetic failure"));
    }

    #[tokio::test]
    async fn forbidden_targets_are_refused() {
        let service = service();
        let outcome = service
            .execute(&action("slack", "send_message", "http://169.254.169.254/latest"))
            .await;
        assert!(!outcome.success);
        assert!(outcome.error.as_deref().unwrap().contains("forbidden target"));
    }

    #[tokio::test]
    async fn database_requires_connection_secret() {
        let vault = vault();
        let service =
            ExecutionService::new(Arc::new(ConnectorRegistry::with_builtins(None)), vault.clone());

        let refused = service.execute(&action("database", "update", "db:reports")).await;
        assert!(!refused.success);
        assert!(refused.error.as_deref().unwrap().contains("missing vault secret"));

        vault
            .put_secret(
                "tenant_alpha",
                "database",
                "connection",
                json!("postgres://db"),
                "admin_1",
            )
            .await
            .unwrap();
        let allowed = service.execute(&action("database", "update", "db:reports")).await;
        assert!(allowed.success);
    }

    #[tokio::test]
    async fn unknown_connector_is_a_failure_not_a_panic() {
        let service = service();
        let outcome = service.execute(&action("github", "create_issue", "repo:x")).await;
        assert!(!outcome.success);
        assert!(outcome.error.as_deref().unwrap().contains("no connector"));
    }

    #[tokio::test]
    async fn credential_keys_are_redacted_from_output() {
        struct Leaky;

        #[async_trait]
        impl Connector for Leaky {
            fn tool_id(&self) -> &str {
                "leaky"
            }
            async fn execute(&self, _action: &ActionRecord) -> ConnectorResult {
                ConnectorResult::ok(json!({
                    "status": "ok",
                    "password": "hunter2",
                    "nested": {"Token": "t", "detail": "fine"},
                }))
            }
        }

        let mut registry = ConnectorRegistry::new(None);
        registry.register(Arc::new(Leaky));
        let service = ExecutionService::new(Arc::new(registry), vault());

        let outcome = service.execute(&action("leaky", "read", "x")).await;
        assert_eq!(outcome.output["password"], "[REDACTED]");
        assert_eq!(outcome.output["nested"]["Token"], "[REDACTED]");
        assert_eq!(outcome.output["nested"]["detail"], "fine");
    }
}
