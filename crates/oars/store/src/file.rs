//! File-backed platform store.
//!
//! The whole store is one JSON document. Every operation locks the
//! document, applies its change, and rewrites the file through a temp-file
//! rename, so a crash mid-write never leaves a torn document. Suitable for
//! single-node deployments and tests; multi-worker deployments use the
//! Postgres variant.

use crate::traits::*;
use crate::{StoreError, StoreResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use oars_crypto::FieldProtection;
use oars_types::{
    ActionRecord, Alert, AlertRoutingRule, Approval, ApprovalWorkflow, ControlMapping,
    EvidenceEdge, EvidenceNode, IdempotencyRecord, LedgerRetentionPolicy, Page, PolicySet,
    PolicyStatus, Receipt, ScimGroup, ScimGroupMapping, ScimUser, SecurityEvent, ServiceAccount,
    SiemDeadLetter, TenantMember, TenantRecord, VaultSecret,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// Serialized shape of the store document.
#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreDocument {
    #[serde(default)]
    actions: Vec<ActionRecord>,
    #[serde(default)]
    receipts: Vec<Receipt>,
    #[serde(default)]
    approvals: Vec<Approval>,
    #[serde(default)]
    workflows: Vec<ApprovalWorkflow>,
    #[serde(default)]
    policies: Vec<PolicySet>,
    #[serde(default)]
    secrets: Vec<VaultSecret>,
    #[serde(default)]
    retention_policies: Vec<LedgerRetentionPolicy>,
    #[serde(default)]
    dead_letters: Vec<SiemDeadLetter>,
    #[serde(default)]
    idempotency: Vec<IdempotencyRecord>,
    #[serde(default)]
    events: Vec<SecurityEvent>,
    #[serde(default)]
    alerts: Vec<Alert>,
    #[serde(default)]
    alert_rules: Vec<AlertRoutingRule>,
    #[serde(default)]
    tenants: Vec<TenantRecord>,
    #[serde(default)]
    members: Vec<TenantMember>,
    #[serde(default)]
    service_accounts: Vec<ServiceAccount>,
    #[serde(default)]
    scim_users: Vec<ScimUser>,
    #[serde(default)]
    scim_groups: Vec<ScimGroup>,
    #[serde(default)]
    scim_mappings: Vec<ScimGroupMapping>,
    #[serde(default)]
    evidence_nodes: Vec<EvidenceNode>,
    #[serde(default)]
    evidence_edges: Vec<EvidenceEdge>,
    #[serde(default)]
    control_mappings: Vec<ControlMapping>,
}

/// File-backed store adapter. Cheap to share behind an `Arc`.
pub struct FilePlatformStore {
    path: Option<PathBuf>,
    protection: FieldProtection,
    state: Mutex<StoreDocument>,
}

impl FilePlatformStore {
    /// Open (or create) the store document at `path`.
    pub async fn open(
        path: impl AsRef<Path>,
        protection: FieldProtection,
    ) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let document = if tokio::fs::try_exists(&path)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?
        {
            let raw = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?;
            serde_json::from_str(&raw).map_err(|e| StoreError::Serialization(e.to_string()))?
        } else {
            StoreDocument::default()
        };

        Ok(Self {
            path: Some(path),
            protection,
            state: Mutex::new(document),
        })
    }

    /// In-memory store with no backing file; used by tests and the inline
    /// development profile.
    pub fn in_memory(protection: FieldProtection) -> Self {
        Self {
            path: None,
            protection,
            state: Mutex::new(StoreDocument::default()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    async fn persist(&self, document: &StoreDocument) -> StoreResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let serialized = serde_json::to_string(document)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?;
        }
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, serialized.as_bytes())
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    fn protect_action(&self, mut action: ActionRecord) -> ActionRecord {
        action.input = self.protection.protect(&action.input);
        action
    }

    fn restore_action(&self, mut action: ActionRecord) -> ActionRecord {
        action.input = self.protection.restore(&action.input);
        action
    }

    fn protect_secret(&self, mut secret: VaultSecret) -> VaultSecret {
        // The whole value is secret material, not just sensitive subkeys.
        let wrapped = serde_json::json!({ "secret": secret.value });
        secret.value = self.protection.protect(&wrapped);
        secret
    }

    fn restore_secret(&self, mut secret: VaultSecret) -> VaultSecret {
        let restored = self.protection.restore(&secret.value);
        if let Some(inner) = restored.get("secret") {
            secret.value = inner.clone();
        } else {
            secret.value = restored;
        }
        secret
    }
}

fn page_of<T: Clone>(mut items: Vec<T>, window: QueryWindow) -> Page<T> {
    let total = items.len();
    let items = if window.limit == 0 {
        items.split_off(window.offset.min(items.len()))
    } else {
        items
            .into_iter()
            .skip(window.offset)
            .take(window.limit)
            .collect()
    };
    Page { items, total }
}

#[async_trait]
impl ActionStore for FilePlatformStore {
    async fn create_action(&self, action: ActionRecord) -> StoreResult<()> {
        let mut doc = self.state.lock().await;
        if doc.actions.iter().any(|a| a.action_id == action.action_id) {
            return Err(StoreError::Conflict(format!(
                "action {} already exists",
                action.action_id
            )));
        }
        doc.actions.push(self.protect_action(action));
        self.persist(&doc).await
    }

    async fn update_action(&self, action: ActionRecord) -> StoreResult<()> {
        let mut doc = self.state.lock().await;
        let slot = doc
            .actions
            .iter_mut()
            .find(|a| a.action_id == action.action_id && a.tenant_id == action.tenant_id)
            .ok_or_else(|| {
                StoreError::NotFound(format!("action {} not found", action.action_id))
            })?;
        *slot = self.protect_action(action);
        self.persist(&doc).await
    }

    async fn get_action(
        &self,
        tenant_id: &str,
        action_id: &str,
    ) -> StoreResult<Option<ActionRecord>> {
        let doc = self.state.lock().await;
        Ok(doc
            .actions
            .iter()
            .find(|a| a.tenant_id == tenant_id && a.action_id == action_id)
            .cloned()
            .map(|a| self.restore_action(a)))
    }

    async fn list_actions(
        &self,
        tenant_id: &str,
        window: QueryWindow,
    ) -> StoreResult<Page<ActionRecord>> {
        let doc = self.state.lock().await;
        let mut items: Vec<_> = doc
            .actions
            .iter()
            .filter(|a| a.tenant_id == tenant_id)
            .cloned()
            .map(|a| self.restore_action(a))
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(page_of(items, window))
    }
}

#[async_trait]
impl ReceiptStore for FilePlatformStore {
    async fn insert_receipt(&self, receipt: Receipt) -> StoreResult<()> {
        let mut doc = self.state.lock().await;
        if doc.receipts.iter().any(|r| r.receipt_id == receipt.receipt_id) {
            return Err(StoreError::Conflict(format!(
                "receipt {} already exists",
                receipt.receipt_id
            )));
        }
        doc.receipts.push(receipt);
        self.persist(&doc).await
    }

    async fn get_receipt(
        &self,
        tenant_id: &str,
        receipt_id: &str,
    ) -> StoreResult<Option<Receipt>> {
        let doc = self.state.lock().await;
        Ok(doc
            .receipts
            .iter()
            .find(|r| r.tenant_id == tenant_id && r.receipt_id == receipt_id)
            .cloned())
    }

    async fn list_receipts_for_action(
        &self,
        tenant_id: &str,
        action_id: &str,
    ) -> StoreResult<Vec<Receipt>> {
        let doc = self.state.lock().await;
        let mut receipts: Vec<_> = doc
            .receipts
            .iter()
            .filter(|r| r.tenant_id == tenant_id && r.action_id == action_id)
            .cloned()
            .collect();
        receipts.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(receipts)
    }

    async fn list_receipts(
        &self,
        tenant_id: &str,
        window: QueryWindow,
    ) -> StoreResult<Page<Receipt>> {
        let doc = self.state.lock().await;
        let mut items: Vec<_> = doc
            .receipts
            .iter()
            .filter(|r| r.tenant_id == tenant_id)
            .cloned()
            .collect();
        items.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(page_of(items, window))
    }
}

#[async_trait]
impl ApprovalStore for FilePlatformStore {
    async fn insert_approval(&self, approval: Approval) -> StoreResult<()> {
        let mut doc = self.state.lock().await;
        if doc
            .approvals
            .iter()
            .any(|a| a.approval_id == approval.approval_id)
        {
            return Err(StoreError::Conflict(format!(
                "approval {} already exists",
                approval.approval_id
            )));
        }
        if doc
            .approvals
            .iter()
            .any(|a| a.action_id == approval.action_id && a.status.is_open())
        {
            return Err(StoreError::Conflict(format!(
                "action {} already has an open approval",
                approval.action_id
            )));
        }
        doc.approvals.push(approval);
        self.persist(&doc).await
    }

    async fn update_approval(&self, approval: Approval) -> StoreResult<()> {
        let mut doc = self.state.lock().await;
        let slot = doc
            .approvals
            .iter_mut()
            .find(|a| a.approval_id == approval.approval_id)
            .ok_or_else(|| {
                StoreError::NotFound(format!("approval {} not found", approval.approval_id))
            })?;
        *slot = approval;
        self.persist(&doc).await
    }

    async fn get_approval(
        &self,
        tenant_id: &str,
        approval_id: &str,
    ) -> StoreResult<Option<Approval>> {
        let doc = self.state.lock().await;
        Ok(doc
            .approvals
            .iter()
            .find(|a| a.tenant_id == tenant_id && a.approval_id == approval_id)
            .cloned())
    }

    async fn find_open_by_action(
        &self,
        tenant_id: &str,
        action_id: &str,
    ) -> StoreResult<Option<Approval>> {
        let doc = self.state.lock().await;
        Ok(doc
            .approvals
            .iter()
            .find(|a| {
                a.tenant_id == tenant_id && a.action_id == action_id && a.status.is_open()
            })
            .cloned())
    }

    async fn list_open_approvals(&self, tenant_id: &str) -> StoreResult<Vec<Approval>> {
        let doc = self.state.lock().await;
        Ok(doc
            .approvals
            .iter()
            .filter(|a| a.tenant_id == tenant_id && a.status.is_open())
            .cloned()
            .collect())
    }

    async fn list_approvals(
        &self,
        tenant_id: &str,
        window: QueryWindow,
    ) -> StoreResult<Page<Approval>> {
        let doc = self.state.lock().await;
        let mut items: Vec<_> = doc
            .approvals
            .iter()
            .filter(|a| a.tenant_id == tenant_id)
            .cloned()
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(page_of(items, window))
    }
}

#[async_trait]
impl WorkflowStore for FilePlatformStore {
    async fn upsert_workflow(&self, workflow: ApprovalWorkflow) -> StoreResult<()> {
        let mut doc = self.state.lock().await;
        doc.workflows.retain(|w| w.tenant_id != workflow.tenant_id);
        doc.workflows.push(workflow);
        self.persist(&doc).await
    }

    async fn get_workflow(&self, tenant_id: &str) -> StoreResult<Option<ApprovalWorkflow>> {
        let doc = self.state.lock().await;
        Ok(doc
            .workflows
            .iter()
            .find(|w| w.tenant_id == tenant_id)
            .cloned())
    }
}

#[async_trait]
impl PolicyStore for FilePlatformStore {
    async fn insert_policy(&self, policy: PolicySet) -> StoreResult<()> {
        let mut doc = self.state.lock().await;
        if doc.policies.iter().any(|p| p.policy_id == policy.policy_id) {
            return Err(StoreError::Conflict(format!(
                "policy {} already exists",
                policy.policy_id
            )));
        }
        doc.policies.push(policy);
        self.persist(&doc).await
    }

    async fn update_policy(&self, policy: PolicySet) -> StoreResult<()> {
        let mut doc = self.state.lock().await;
        let slot = doc
            .policies
            .iter_mut()
            .find(|p| p.policy_id == policy.policy_id)
            .ok_or_else(|| {
                StoreError::NotFound(format!("policy {} not found", policy.policy_id))
            })?;
        *slot = policy;
        self.persist(&doc).await
    }

    async fn get_policy(
        &self,
        tenant_id: &str,
        policy_id: &str,
    ) -> StoreResult<Option<PolicySet>> {
        let doc = self.state.lock().await;
        Ok(doc
            .policies
            .iter()
            .find(|p| p.tenant_id == tenant_id && p.policy_id == policy_id)
            .cloned())
    }

    async fn find_published_policy(&self, tenant_id: &str) -> StoreResult<Option<PolicySet>> {
        let doc = self.state.lock().await;
        Ok(doc
            .policies
            .iter()
            .find(|p| p.tenant_id == tenant_id && p.status == PolicyStatus::Published)
            .cloned())
    }

    async fn set_published_policy(
        &self,
        tenant_id: &str,
        policy_id: &str,
    ) -> StoreResult<Option<String>> {
        let mut doc = self.state.lock().await;
        if !doc
            .policies
            .iter()
            .any(|p| p.tenant_id == tenant_id && p.policy_id == policy_id)
        {
            return Err(StoreError::NotFound(format!(
                "policy {policy_id} not found"
            )));
        }

        let now = Utc::now();
        let mut demoted = None;
        for policy in doc
            .policies
            .iter_mut()
            .filter(|p| p.tenant_id == tenant_id)
        {
            if policy.policy_id == policy_id {
                policy.status = PolicyStatus::Published;
                policy.updated_at = now;
            } else if policy.status == PolicyStatus::Published {
                policy.status = PolicyStatus::Draft;
                policy.updated_at = now;
                demoted = Some(policy.policy_id.clone());
            }
        }
        self.persist(&doc).await?;
        Ok(demoted)
    }

    async fn list_policies(
        &self,
        tenant_id: &str,
        window: QueryWindow,
    ) -> StoreResult<Page<PolicySet>> {
        let doc = self.state.lock().await;
        let mut items: Vec<_> = doc
            .policies
            .iter()
            .filter(|p| p.tenant_id == tenant_id)
            .cloned()
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(page_of(items, window))
    }
}

#[async_trait]
impl VaultStore for FilePlatformStore {
    async fn put_secret(&self, secret: VaultSecret) -> StoreResult<()> {
        let mut doc = self.state.lock().await;
        doc.secrets.retain(|s| {
            !(s.tenant_id == secret.tenant_id
                && s.tool_id == secret.tool_id
                && s.name == secret.name)
        });
        doc.secrets.push(self.protect_secret(secret));
        self.persist(&doc).await
    }

    async fn get_secret(
        &self,
        tenant_id: &str,
        tool_id: &str,
        name: &str,
    ) -> StoreResult<Option<VaultSecret>> {
        let doc = self.state.lock().await;
        Ok(doc
            .secrets
            .iter()
            .find(|s| s.tenant_id == tenant_id && s.tool_id == tool_id && s.name == name)
            .cloned()
            .map(|s| self.restore_secret(s)))
    }

    async fn delete_secret(
        &self,
        tenant_id: &str,
        tool_id: &str,
        name: &str,
    ) -> StoreResult<bool> {
        let mut doc = self.state.lock().await;
        let before = doc.secrets.len();
        doc.secrets.retain(|s| {
            !(s.tenant_id == tenant_id && s.tool_id == tool_id && s.name == name)
        });
        let removed = doc.secrets.len() != before;
        if removed {
            self.persist(&doc).await?;
        }
        Ok(removed)
    }

    async fn list_secrets(&self, tenant_id: &str) -> StoreResult<Vec<VaultSecret>> {
        let doc = self.state.lock().await;
        Ok(doc
            .secrets
            .iter()
            .filter(|s| s.tenant_id == tenant_id)
            .cloned()
            .map(|s| self.restore_secret(s))
            .collect())
    }
}

#[async_trait]
impl RetentionStore for FilePlatformStore {
    async fn upsert_retention(&self, policy: LedgerRetentionPolicy) -> StoreResult<()> {
        let mut doc = self.state.lock().await;
        doc.retention_policies
            .retain(|p| p.tenant_id != policy.tenant_id);
        doc.retention_policies.push(policy);
        self.persist(&doc).await
    }

    async fn get_retention(
        &self,
        tenant_id: &str,
    ) -> StoreResult<Option<LedgerRetentionPolicy>> {
        let doc = self.state.lock().await;
        Ok(doc
            .retention_policies
            .iter()
            .find(|p| p.tenant_id == tenant_id)
            .cloned())
    }
}

#[async_trait]
impl DeadLetterStore for FilePlatformStore {
    async fn insert_dead_letter(&self, dead_letter: SiemDeadLetter) -> StoreResult<()> {
        let mut doc = self.state.lock().await;
        if doc.dead_letters.iter().any(|d| d.id == dead_letter.id) {
            return Err(StoreError::Conflict(format!(
                "dead letter {} already exists",
                dead_letter.id
            )));
        }
        doc.dead_letters.push(dead_letter);
        self.persist(&doc).await
    }

    async fn update_dead_letter(&self, dead_letter: SiemDeadLetter) -> StoreResult<()> {
        let mut doc = self.state.lock().await;
        let slot = doc
            .dead_letters
            .iter_mut()
            .find(|d| d.id == dead_letter.id)
            .ok_or_else(|| {
                StoreError::NotFound(format!("dead letter {} not found", dead_letter.id))
            })?;
        *slot = dead_letter;
        self.persist(&doc).await
    }

    async fn get_dead_letter(
        &self,
        tenant_id: &str,
        id: &str,
    ) -> StoreResult<Option<SiemDeadLetter>> {
        let doc = self.state.lock().await;
        Ok(doc
            .dead_letters
            .iter()
            .find(|d| d.tenant_id == tenant_id && d.id == id)
            .cloned())
    }

    async fn list_dead_letters(
        &self,
        tenant_id: &str,
        window: QueryWindow,
    ) -> StoreResult<Page<SiemDeadLetter>> {
        let doc = self.state.lock().await;
        let mut items: Vec<_> = doc
            .dead_letters
            .iter()
            .filter(|d| d.tenant_id == tenant_id)
            .cloned()
            .collect();
        items.sort_by(|a, b| b.failed_at.cmp(&a.failed_at));
        Ok(page_of(items, window))
    }
}

#[async_trait]
impl IdempotencyStore for FilePlatformStore {
    async fn put_idempotency(&self, record: IdempotencyRecord) -> StoreResult<()> {
        let mut doc = self.state.lock().await;
        let duplicate = doc.idempotency.iter().any(|r| {
            r.tenant_id == record.tenant_id
                && r.subject == record.subject
                && r.endpoint == record.endpoint
                && r.key == record.key
        });
        if duplicate {
            return Err(StoreError::Conflict(format!(
                "idempotency key {} already captured",
                record.key
            )));
        }
        doc.idempotency.push(record);
        self.persist(&doc).await
    }

    async fn get_idempotency(
        &self,
        tenant_id: &str,
        subject: &str,
        endpoint: &str,
        key: &str,
    ) -> StoreResult<Option<IdempotencyRecord>> {
        let doc = self.state.lock().await;
        Ok(doc
            .idempotency
            .iter()
            .find(|r| {
                r.tenant_id == tenant_id
                    && r.subject == subject
                    && r.endpoint == endpoint
                    && r.key == key
            })
            .cloned())
    }

    async fn prune_idempotency(&self, older_than: DateTime<Utc>) -> StoreResult<u64> {
        let mut doc = self.state.lock().await;
        let before = doc.idempotency.len();
        doc.idempotency.retain(|r| r.created_at >= older_than);
        let pruned = (before - doc.idempotency.len()) as u64;
        if pruned > 0 {
            self.persist(&doc).await?;
        }
        Ok(pruned)
    }
}

#[async_trait]
impl EventStore for FilePlatformStore {
    async fn insert_event(&self, event: SecurityEvent) -> StoreResult<()> {
        let mut doc = self.state.lock().await;
        doc.events.push(event);
        self.persist(&doc).await
    }

    async fn list_events(
        &self,
        tenant_id: &str,
        window: QueryWindow,
    ) -> StoreResult<Page<SecurityEvent>> {
        let doc = self.state.lock().await;
        let mut items: Vec<_> = doc
            .events
            .iter()
            .filter(|e| e.tenant_id == tenant_id)
            .cloned()
            .collect();
        items.sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at));
        Ok(page_of(items, window))
    }
}

#[async_trait]
impl AlertStore for FilePlatformStore {
    async fn insert_alert(&self, alert: Alert) -> StoreResult<()> {
        let mut doc = self.state.lock().await;
        doc.alerts.push(alert);
        self.persist(&doc).await
    }

    async fn list_alerts(
        &self,
        tenant_id: &str,
        window: QueryWindow,
    ) -> StoreResult<Page<Alert>> {
        let doc = self.state.lock().await;
        let mut items: Vec<_> = doc
            .alerts
            .iter()
            .filter(|a| a.tenant_id == tenant_id)
            .cloned()
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(page_of(items, window))
    }

    async fn upsert_alert_rule(&self, rule: AlertRoutingRule) -> StoreResult<()> {
        let mut doc = self.state.lock().await;
        doc.alert_rules
            .retain(|r| !(r.tenant_id == rule.tenant_id && r.rule_id == rule.rule_id));
        doc.alert_rules.push(rule);
        self.persist(&doc).await
    }

    async fn delete_alert_rule(&self, tenant_id: &str, rule_id: &str) -> StoreResult<bool> {
        let mut doc = self.state.lock().await;
        let before = doc.alert_rules.len();
        doc.alert_rules
            .retain(|r| !(r.tenant_id == tenant_id && r.rule_id == rule_id));
        let removed = doc.alert_rules.len() != before;
        if removed {
            self.persist(&doc).await?;
        }
        Ok(removed)
    }

    async fn list_alert_rules(&self, tenant_id: &str) -> StoreResult<Vec<AlertRoutingRule>> {
        let doc = self.state.lock().await;
        Ok(doc
            .alert_rules
            .iter()
            .filter(|r| r.tenant_id == tenant_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl DirectoryStore for FilePlatformStore {
    async fn upsert_tenant(&self, tenant: TenantRecord) -> StoreResult<()> {
        let mut doc = self.state.lock().await;
        doc.tenants.retain(|t| t.tenant_id != tenant.tenant_id);
        doc.tenants.push(tenant);
        self.persist(&doc).await
    }

    async fn get_tenant(&self, tenant_id: &str) -> StoreResult<Option<TenantRecord>> {
        let doc = self.state.lock().await;
        Ok(doc.tenants.iter().find(|t| t.tenant_id == tenant_id).cloned())
    }

    async fn list_tenants(&self, window: QueryWindow) -> StoreResult<Page<TenantRecord>> {
        let doc = self.state.lock().await;
        let mut items = doc.tenants.clone();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(page_of(items, window))
    }

    async fn upsert_member(&self, member: TenantMember) -> StoreResult<()> {
        let mut doc = self.state.lock().await;
        doc.members
            .retain(|m| !(m.tenant_id == member.tenant_id && m.subject == member.subject));
        doc.members.push(member);
        self.persist(&doc).await
    }

    async fn remove_member(&self, tenant_id: &str, subject: &str) -> StoreResult<bool> {
        let mut doc = self.state.lock().await;
        let before = doc.members.len();
        doc.members
            .retain(|m| !(m.tenant_id == tenant_id && m.subject == subject));
        let removed = doc.members.len() != before;
        if removed {
            self.persist(&doc).await?;
        }
        Ok(removed)
    }

    async fn list_members(&self, tenant_id: &str) -> StoreResult<Vec<TenantMember>> {
        let doc = self.state.lock().await;
        Ok(doc
            .members
            .iter()
            .filter(|m| m.tenant_id == tenant_id)
            .cloned()
            .collect())
    }

    async fn insert_service_account(&self, account: ServiceAccount) -> StoreResult<()> {
        let mut doc = self.state.lock().await;
        if doc
            .service_accounts
            .iter()
            .any(|a| a.account_id == account.account_id)
        {
            return Err(StoreError::Conflict(format!(
                "service account {} already exists",
                account.account_id
            )));
        }
        doc.service_accounts.push(account);
        self.persist(&doc).await
    }

    async fn update_service_account(&self, account: ServiceAccount) -> StoreResult<()> {
        let mut doc = self.state.lock().await;
        let slot = doc
            .service_accounts
            .iter_mut()
            .find(|a| a.account_id == account.account_id)
            .ok_or_else(|| {
                StoreError::NotFound(format!(
                    "service account {} not found",
                    account.account_id
                ))
            })?;
        *slot = account;
        self.persist(&doc).await
    }

    async fn get_service_account(
        &self,
        tenant_id: &str,
        account_id: &str,
    ) -> StoreResult<Option<ServiceAccount>> {
        let doc = self.state.lock().await;
        Ok(doc
            .service_accounts
            .iter()
            .find(|a| a.tenant_id == tenant_id && a.account_id == account_id)
            .cloned())
    }

    async fn list_service_accounts(&self, tenant_id: &str) -> StoreResult<Vec<ServiceAccount>> {
        let doc = self.state.lock().await;
        Ok(doc
            .service_accounts
            .iter()
            .filter(|a| a.tenant_id == tenant_id)
            .cloned()
            .collect())
    }

    async fn upsert_scim_user(&self, user: ScimUser) -> StoreResult<()> {
        let mut doc = self.state.lock().await;
        doc.scim_users
            .retain(|u| !(u.tenant_id == user.tenant_id && u.user_id == user.user_id));
        doc.scim_users.push(user);
        self.persist(&doc).await
    }

    async fn get_scim_user(
        &self,
        tenant_id: &str,
        user_id: &str,
    ) -> StoreResult<Option<ScimUser>> {
        let doc = self.state.lock().await;
        Ok(doc
            .scim_users
            .iter()
            .find(|u| u.tenant_id == tenant_id && u.user_id == user_id)
            .cloned())
    }

    async fn list_scim_users(&self, tenant_id: &str) -> StoreResult<Vec<ScimUser>> {
        let doc = self.state.lock().await;
        Ok(doc
            .scim_users
            .iter()
            .filter(|u| u.tenant_id == tenant_id)
            .cloned()
            .collect())
    }

    async fn upsert_scim_group(&self, group: ScimGroup) -> StoreResult<()> {
        let mut doc = self.state.lock().await;
        doc.scim_groups
            .retain(|g| !(g.tenant_id == group.tenant_id && g.group_id == group.group_id));
        doc.scim_groups.push(group);
        self.persist(&doc).await
    }

    async fn get_scim_group(
        &self,
        tenant_id: &str,
        group_id: &str,
    ) -> StoreResult<Option<ScimGroup>> {
        let doc = self.state.lock().await;
        Ok(doc
            .scim_groups
            .iter()
            .find(|g| g.tenant_id == tenant_id && g.group_id == group_id)
            .cloned())
    }

    async fn list_scim_groups(&self, tenant_id: &str) -> StoreResult<Vec<ScimGroup>> {
        let doc = self.state.lock().await;
        Ok(doc
            .scim_groups
            .iter()
            .filter(|g| g.tenant_id == tenant_id)
            .cloned()
            .collect())
    }

    async fn upsert_scim_mapping(&self, mapping: ScimGroupMapping) -> StoreResult<()> {
        let mut doc = self.state.lock().await;
        doc.scim_mappings
            .retain(|m| !(m.tenant_id == mapping.tenant_id && m.group_id == mapping.group_id));
        doc.scim_mappings.push(mapping);
        self.persist(&doc).await
    }

    async fn list_scim_mappings(&self, tenant_id: &str) -> StoreResult<Vec<ScimGroupMapping>> {
        let doc = self.state.lock().await;
        Ok(doc
            .scim_mappings
            .iter()
            .filter(|m| m.tenant_id == tenant_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl EvidenceStore for FilePlatformStore {
    async fn upsert_evidence_node(&self, node: EvidenceNode) -> StoreResult<()> {
        let mut doc = self.state.lock().await;
        doc.evidence_nodes
            .retain(|n| !(n.tenant_id == node.tenant_id && n.node_id == node.node_id));
        doc.evidence_nodes.push(node);
        self.persist(&doc).await
    }

    async fn insert_evidence_edge(&self, edge: EvidenceEdge) -> StoreResult<()> {
        let mut doc = self.state.lock().await;
        doc.evidence_edges.push(edge);
        self.persist(&doc).await
    }

    async fn evidence_neighbors(
        &self,
        tenant_id: &str,
        node_id: &str,
    ) -> StoreResult<Vec<EvidenceEdge>> {
        let doc = self.state.lock().await;
        Ok(doc
            .evidence_edges
            .iter()
            .filter(|e| {
                e.tenant_id == tenant_id && (e.from_id == node_id || e.to_id == node_id)
            })
            .cloned()
            .collect())
    }

    async fn list_evidence_edges(
        &self,
        tenant_id: &str,
        window: QueryWindow,
    ) -> StoreResult<Page<EvidenceEdge>> {
        let doc = self.state.lock().await;
        let mut items: Vec<_> = doc
            .evidence_edges
            .iter()
            .filter(|e| e.tenant_id == tenant_id)
            .cloned()
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(page_of(items, window))
    }
}

#[async_trait]
impl ControlStore for FilePlatformStore {
    async fn upsert_control_mapping(&self, mapping: ControlMapping) -> StoreResult<()> {
        let mut doc = self.state.lock().await;
        doc.control_mappings
            .retain(|m| !(m.tenant_id == mapping.tenant_id && m.mapping_id == mapping.mapping_id));
        doc.control_mappings.push(mapping);
        self.persist(&doc).await
    }

    async fn delete_control_mapping(
        &self,
        tenant_id: &str,
        mapping_id: &str,
    ) -> StoreResult<bool> {
        let mut doc = self.state.lock().await;
        let before = doc.control_mappings.len();
        doc.control_mappings
            .retain(|m| !(m.tenant_id == tenant_id && m.mapping_id == mapping_id));
        let removed = doc.control_mappings.len() != before;
        if removed {
            self.persist(&doc).await?;
        }
        Ok(removed)
    }

    async fn list_control_mappings(&self, tenant_id: &str) -> StoreResult<Vec<ControlMapping>> {
        let doc = self.state.lock().await;
        Ok(doc
            .control_mappings
            .iter()
            .filter(|m| m.tenant_id == tenant_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oars_types::{
        prefixed_id, ActionActor, ActionContext, ActionResource, ActionState, ApprovalStatus,
    };
    use serde_json::json;

    fn sample_action(tenant: &str) -> ActionRecord {
        let now = Utc::now();
        ActionRecord {
            action_id: prefixed_id("act"),
            tenant_id: tenant.to_string(),
            state: ActionState::Requested,
            actor: ActionActor {
                agent_id: Some("agent_finops".into()),
                ..Default::default()
            },
            resource: ActionResource {
                tool_id: "jira".into(),
                operation: "create_ticket".into(),
                target: "project:SEC".into(),
            },
            input: json!({"summary": "patch", "apiKey": "supersecret"}),
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

    #[tokio::test]
    async fn action_roundtrip_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        let action = sample_action("tenant_alpha");
        let id = action.action_id.clone();

        {
            let store =
                FilePlatformStore::open(&path, FieldProtection::disabled()).await.unwrap();
            store.create_action(action).await.unwrap();
        }

        let store = FilePlatformStore::open(&path, FieldProtection::disabled()).await.unwrap();
        let loaded = store.get_action("tenant_alpha", &id).await.unwrap().unwrap();
        assert_eq!(loaded.action_id, id);
        assert_eq!(loaded.state, ActionState::Requested);
    }

    #[tokio::test]
    async fn sensitive_input_is_encrypted_on_disk_and_restored_on_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        let protection = FieldProtection::from_key_material("test-key");
        let action = sample_action("tenant_alpha");
        let id = action.action_id.clone();

        let store = FilePlatformStore::open(&path, protection).await.unwrap();
        store.create_action(action.clone()).await.unwrap();

        let raw = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(!raw.contains("supersecret"));

        let loaded = store.get_action("tenant_alpha", &id).await.unwrap().unwrap();
        assert_eq!(loaded.input, action.input);
    }

    #[tokio::test]
    async fn second_pending_approval_for_same_action_conflicts() {
        let store = FilePlatformStore::in_memory(FieldProtection::disabled());
        let now = Utc::now();
        let base = Approval {
            approval_id: prefixed_id("apr"),
            action_id: "act_1".into(),
            tenant_id: "tenant_alpha".into(),
            status: ApprovalStatus::Pending,
            stages: vec![],
            current_stage_index: 0,
            stage_started_at: now,
            stage_deadline_at: None,
            escalated_stage_ids: vec![],
            requires_step_up: false,
            decisions: vec![],
            created_at: now,
            updated_at: now,
        };
        store.insert_approval(base.clone()).await.unwrap();

        let mut second = base;
        second.approval_id = prefixed_id("apr");
        let result = store.insert_approval(second).await;
        assert!(matches!(result, Err(StoreError::Conflict(_))));
    }

    #[tokio::test]
    async fn idempotency_is_unique_per_key() {
        let store = FilePlatformStore::in_memory(FieldProtection::disabled());
        let record = IdempotencyRecord {
            tenant_id: "tenant_alpha".into(),
            subject: "agent_1".into(),
            endpoint: "/v1/actions".into(),
            key: "idem-1".into(),
            request_fingerprint: "fp".into(),
            response: json!({"ok": true}),
            created_at: Utc::now(),
        };
        store.put_idempotency(record.clone()).await.unwrap();
        assert!(matches!(
            store.put_idempotency(record).await,
            Err(StoreError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn pagination_reports_total() {
        let store = FilePlatformStore::in_memory(FieldProtection::disabled());
        for _ in 0..5 {
            store.create_action(sample_action("tenant_alpha")).await.unwrap();
        }
        store.create_action(sample_action("tenant_beta")).await.unwrap();

        let page = store
            .list_actions("tenant_alpha", QueryWindow { limit: 2, offset: 0 })
            .await
            .unwrap();
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.total, 5);
    }
}
