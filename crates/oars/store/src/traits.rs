use crate::StoreResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use oars_types::{
    ActionRecord, Alert, AlertRoutingRule, Approval, ApprovalWorkflow, ControlMapping,
    EvidenceEdge, EvidenceNode, IdempotencyRecord, LedgerRetentionPolicy, Page, PolicySet,
    Receipt, ScimGroup, ScimGroupMapping, ScimUser, SecurityEvent, ServiceAccount, SiemDeadLetter,
    TenantMember, TenantRecord, VaultSecret,
};

/// Generic query window for paged reads. `limit == 0` means unbounded.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryWindow {
    pub limit: usize,
    pub offset: usize,
}

/// Storage interface for action records.
#[async_trait]
pub trait ActionStore: Send + Sync {
    /// Insert a newly submitted action; the id must be unused.
    async fn create_action(&self, action: ActionRecord) -> StoreResult<()>;

    /// Replace an existing action record.
    async fn update_action(&self, action: ActionRecord) -> StoreResult<()>;

    async fn get_action(&self, tenant_id: &str, action_id: &str)
        -> StoreResult<Option<ActionRecord>>;

    /// List a tenant's actions newest-first.
    async fn list_actions(
        &self,
        tenant_id: &str,
        window: QueryWindow,
    ) -> StoreResult<Page<ActionRecord>>;
}

/// Storage interface for signed receipts.
#[async_trait]
pub trait ReceiptStore: Send + Sync {
    async fn insert_receipt(&self, receipt: Receipt) -> StoreResult<()>;

    async fn get_receipt(&self, tenant_id: &str, receipt_id: &str)
        -> StoreResult<Option<Receipt>>;

    /// Receipts for one action, oldest-first by timestamp.
    async fn list_receipts_for_action(
        &self,
        tenant_id: &str,
        action_id: &str,
    ) -> StoreResult<Vec<Receipt>>;

    async fn list_receipts(
        &self,
        tenant_id: &str,
        window: QueryWindow,
    ) -> StoreResult<Page<Receipt>>;
}

/// Storage interface for approvals and tenant workflow templates.
#[async_trait]
pub trait ApprovalStore: Send + Sync {
    async fn insert_approval(&self, approval: Approval) -> StoreResult<()>;

    async fn update_approval(&self, approval: Approval) -> StoreResult<()>;

    async fn get_approval(&self, tenant_id: &str, approval_id: &str)
        -> StoreResult<Option<Approval>>;

    /// The in-flight (pending or escalated) approval bound to an action.
    async fn find_open_by_action(
        &self,
        tenant_id: &str,
        action_id: &str,
    ) -> StoreResult<Option<Approval>>;

    /// All in-flight approvals for the tenant.
    async fn list_open_approvals(&self, tenant_id: &str) -> StoreResult<Vec<Approval>>;

    async fn list_approvals(
        &self,
        tenant_id: &str,
        window: QueryWindow,
    ) -> StoreResult<Page<Approval>>;
}

#[async_trait]
pub trait WorkflowStore: Send + Sync {
    async fn upsert_workflow(&self, workflow: ApprovalWorkflow) -> StoreResult<()>;

    async fn get_workflow(&self, tenant_id: &str) -> StoreResult<Option<ApprovalWorkflow>>;
}

/// Storage interface for policy sets.
#[async_trait]
pub trait PolicyStore: Send + Sync {
    async fn insert_policy(&self, policy: PolicySet) -> StoreResult<()>;

    async fn update_policy(&self, policy: PolicySet) -> StoreResult<()>;

    async fn get_policy(&self, tenant_id: &str, policy_id: &str)
        -> StoreResult<Option<PolicySet>>;

    /// The tenant's single published policy set, if any.
    async fn find_published_policy(&self, tenant_id: &str) -> StoreResult<Option<PolicySet>>;

    /// Publish `policy_id` and demote any other published set for the
    /// tenant, in one atomic step. Returns the demoted policy's id.
    async fn set_published_policy(
        &self,
        tenant_id: &str,
        policy_id: &str,
    ) -> StoreResult<Option<String>>;

    async fn list_policies(
        &self,
        tenant_id: &str,
        window: QueryWindow,
    ) -> StoreResult<Page<PolicySet>>;
}

/// Storage interface for tenant connector secrets.
#[async_trait]
pub trait VaultStore: Send + Sync {
    async fn put_secret(&self, secret: VaultSecret) -> StoreResult<()>;

    async fn get_secret(
        &self,
        tenant_id: &str,
        tool_id: &str,
        name: &str,
    ) -> StoreResult<Option<VaultSecret>>;

    async fn delete_secret(&self, tenant_id: &str, tool_id: &str, name: &str)
        -> StoreResult<bool>;

    async fn list_secrets(&self, tenant_id: &str) -> StoreResult<Vec<VaultSecret>>;
}

/// Storage interface for ledger retention policies.
#[async_trait]
pub trait RetentionStore: Send + Sync {
    async fn upsert_retention(&self, policy: LedgerRetentionPolicy) -> StoreResult<()>;

    async fn get_retention(&self, tenant_id: &str)
        -> StoreResult<Option<LedgerRetentionPolicy>>;
}

/// Storage interface for SIEM dead letters.
#[async_trait]
pub trait DeadLetterStore: Send + Sync {
    async fn insert_dead_letter(&self, dead_letter: SiemDeadLetter) -> StoreResult<()>;

    async fn update_dead_letter(&self, dead_letter: SiemDeadLetter) -> StoreResult<()>;

    async fn get_dead_letter(
        &self,
        tenant_id: &str,
        id: &str,
    ) -> StoreResult<Option<SiemDeadLetter>>;

    async fn list_dead_letters(
        &self,
        tenant_id: &str,
        window: QueryWindow,
    ) -> StoreResult<Page<SiemDeadLetter>>;
}

/// Storage interface for idempotency captures.
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    async fn put_idempotency(&self, record: IdempotencyRecord) -> StoreResult<()>;

    async fn get_idempotency(
        &self,
        tenant_id: &str,
        subject: &str,
        endpoint: &str,
        key: &str,
    ) -> StoreResult<Option<IdempotencyRecord>>;

    /// Remove captures older than the cutoff; returns how many were dropped.
    async fn prune_idempotency(&self, older_than: DateTime<Utc>) -> StoreResult<u64>;
}

/// Storage interface for security events.
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn insert_event(&self, event: SecurityEvent) -> StoreResult<()>;

    async fn list_events(
        &self,
        tenant_id: &str,
        window: QueryWindow,
    ) -> StoreResult<Page<SecurityEvent>>;
}

/// Storage interface for alerts and alert routing rules.
#[async_trait]
pub trait AlertStore: Send + Sync {
    async fn insert_alert(&self, alert: Alert) -> StoreResult<()>;

    async fn list_alerts(&self, tenant_id: &str, window: QueryWindow)
        -> StoreResult<Page<Alert>>;

    async fn upsert_alert_rule(&self, rule: AlertRoutingRule) -> StoreResult<()>;

    async fn delete_alert_rule(&self, tenant_id: &str, rule_id: &str) -> StoreResult<bool>;

    async fn list_alert_rules(&self, tenant_id: &str) -> StoreResult<Vec<AlertRoutingRule>>;
}

/// Storage interface for tenants, members, service accounts, and SCIM.
#[async_trait]
pub trait DirectoryStore: Send + Sync {
    async fn upsert_tenant(&self, tenant: TenantRecord) -> StoreResult<()>;
    async fn get_tenant(&self, tenant_id: &str) -> StoreResult<Option<TenantRecord>>;
    async fn list_tenants(&self, window: QueryWindow) -> StoreResult<Page<TenantRecord>>;

    async fn upsert_member(&self, member: TenantMember) -> StoreResult<()>;
    async fn remove_member(&self, tenant_id: &str, subject: &str) -> StoreResult<bool>;
    async fn list_members(&self, tenant_id: &str) -> StoreResult<Vec<TenantMember>>;

    async fn insert_service_account(&self, account: ServiceAccount) -> StoreResult<()>;
    async fn update_service_account(&self, account: ServiceAccount) -> StoreResult<()>;
    async fn get_service_account(
        &self,
        tenant_id: &str,
        account_id: &str,
    ) -> StoreResult<Option<ServiceAccount>>;
    async fn list_service_accounts(&self, tenant_id: &str) -> StoreResult<Vec<ServiceAccount>>;

    async fn upsert_scim_user(&self, user: ScimUser) -> StoreResult<()>;
    async fn get_scim_user(&self, tenant_id: &str, user_id: &str)
        -> StoreResult<Option<ScimUser>>;
    async fn list_scim_users(&self, tenant_id: &str) -> StoreResult<Vec<ScimUser>>;

    async fn upsert_scim_group(&self, group: ScimGroup) -> StoreResult<()>;
    async fn get_scim_group(
        &self,
        tenant_id: &str,
        group_id: &str,
    ) -> StoreResult<Option<ScimGroup>>;
    async fn list_scim_groups(&self, tenant_id: &str) -> StoreResult<Vec<ScimGroup>>;

    async fn upsert_scim_mapping(&self, mapping: ScimGroupMapping) -> StoreResult<()>;
    async fn list_scim_mappings(&self, tenant_id: &str) -> StoreResult<Vec<ScimGroupMapping>>;
}

/// Storage interface for the evidence graph.
#[async_trait]
pub trait EvidenceStore: Send + Sync {
    async fn upsert_evidence_node(&self, node: EvidenceNode) -> StoreResult<()>;

    async fn insert_evidence_edge(&self, edge: EvidenceEdge) -> StoreResult<()>;

    /// Every edge touching the node, in either direction.
    async fn evidence_neighbors(
        &self,
        tenant_id: &str,
        node_id: &str,
    ) -> StoreResult<Vec<EvidenceEdge>>;

    async fn list_evidence_edges(
        &self,
        tenant_id: &str,
        window: QueryWindow,
    ) -> StoreResult<Page<EvidenceEdge>>;
}

/// Storage interface for compliance control mappings.
#[async_trait]
pub trait ControlStore: Send + Sync {
    async fn upsert_control_mapping(&self, mapping: ControlMapping) -> StoreResult<()>;

    async fn delete_control_mapping(&self, tenant_id: &str, mapping_id: &str)
        -> StoreResult<bool>;

    async fn list_control_mappings(&self, tenant_id: &str) -> StoreResult<Vec<ControlMapping>>;
}

/// Unified storage bundle the platform context wires through services.
pub trait PlatformStore:
    ActionStore
    + ReceiptStore
    + ApprovalStore
    + WorkflowStore
    + PolicyStore
    + VaultStore
    + RetentionStore
    + DeadLetterStore
    + IdempotencyStore
    + EventStore
    + AlertStore
    + DirectoryStore
    + EvidenceStore
    + ControlStore
    + Send
    + Sync
{
}

impl<T> PlatformStore for T where
    T: ActionStore
        + ReceiptStore
        + ApprovalStore
        + WorkflowStore
        + PolicyStore
        + VaultStore
        + RetentionStore
        + DeadLetterStore
        + IdempotencyStore
        + EventStore
        + AlertStore
        + DirectoryStore
        + EvidenceStore
        + ControlStore
        + Send
        + Sync
{
}
