//! Tenants, members, and service accounts.

use chrono::Utc;
use oars_crypto::sha256_hex;
use oars_events::SecurityEventService;
use oars_store::{DirectoryStore, QueryWindow};
use oars_types::{
    prefixed_id, EventSeverity, OarsError, Page, Role, ServiceAccount, TenantMember,
    TenantRecord,
};
use serde_json::json;
use std::sync::Arc;

/// A freshly created service account with its one-time secret. The
/// plaintext secret is returned exactly once; only its hash is stored.
#[derive(Clone, Debug)]
pub struct NewServiceAccount {
    pub account: ServiceAccount,
    pub secret: String,
}

pub struct DirectoryService {
    store: Arc<dyn DirectoryStore>,
    events: Option<Arc<SecurityEventService>>,
}

impl DirectoryService {
    pub fn new(store: Arc<dyn DirectoryStore>) -> Self {
        Self {
            store,
            events: None,
        }
    }

    pub fn with_events(mut self, events: Arc<SecurityEventService>) -> Self {
        self.events = Some(events);
        self
    }

    pub async fn create_tenant(
        &self,
        tenant_id: &str,
        name: &str,
        actor: &str,
    ) -> Result<TenantRecord, OarsError> {
        if tenant_id.trim().is_empty() {
            return Err(OarsError::Validation("tenant id must not be empty".into()));
        }
        let tenant = TenantRecord {
            tenant_id: tenant_id.to_string(),
            name: name.to_string(),
            created_at: Utc::now(),
        };
        self.store.upsert_tenant(tenant.clone()).await?;
        self.emit(tenant_id, "tenant.created", actor, json!({"name": name}))
            .await?;
        Ok(tenant)
    }

    pub async fn list_tenants(&self, window: QueryWindow) -> Result<Page<TenantRecord>, OarsError> {
        Ok(self.store.list_tenants(window).await?)
    }

    pub async fn add_member(
        &self,
        tenant_id: &str,
        subject: &str,
        role: Role,
        actor: &str,
    ) -> Result<TenantMember, OarsError> {
        let member = TenantMember {
            tenant_id: tenant_id.to_string(),
            subject: subject.to_string(),
            role,
            added_at: Utc::now(),
        };
        self.store.upsert_member(member.clone()).await?;
        self.emit(
            tenant_id,
            "tenant.member_added",
            actor,
            json!({"subject": subject, "role": role}),
        )
        .await?;
        Ok(member)
    }

    pub async fn remove_member(
        &self,
        tenant_id: &str,
        subject: &str,
        actor: &str,
    ) -> Result<bool, OarsError> {
        let removed = self.store.remove_member(tenant_id, subject).await?;
        if removed {
            self.emit(
                tenant_id,
                "tenant.member_removed",
                actor,
                json!({"subject": subject}),
            )
            .await?;
        }
        Ok(removed)
    }

    pub async fn list_members(&self, tenant_id: &str) -> Result<Vec<TenantMember>, OarsError> {
        Ok(self.store.list_members(tenant_id).await?)
    }

    /// Mint a service account. The secret is generated here, hashed for
    /// storage, and surfaced to the caller exactly once.
    pub async fn create_service_account(
        &self,
        tenant_id: &str,
        name: &str,
        actor: &str,
    ) -> Result<NewServiceAccount, OarsError> {
        let secret = format!("oars_sk_{}", uuid::Uuid::new_v4().simple());
        let account = ServiceAccount {
            account_id: prefixed_id("sva"),
            tenant_id: tenant_id.to_string(),
            name: name.to_string(),
            secret_hash: sha256_hex(secret.as_bytes()),
            disabled: false,
            created_at: Utc::now(),
        };
        self.store.insert_service_account(account.clone()).await?;
        self.emit(
            tenant_id,
            "service_account.created",
            actor,
            json!({"accountId": account.account_id, "name": name}),
        )
        .await?;
        Ok(NewServiceAccount { account, secret })
    }

    pub async fn disable_service_account(
        &self,
        tenant_id: &str,
        account_id: &str,
        actor: &str,
    ) -> Result<ServiceAccount, OarsError> {
        let mut account = self
            .store
            .get_service_account(tenant_id, account_id)
            .await?
            .ok_or_else(|| {
                OarsError::NotFound(format!("service account {account_id} not found"))
            })?;
        account.disabled = true;
        self.store.update_service_account(account.clone()).await?;
        self.emit(
            tenant_id,
            "service_account.disabled",
            actor,
            json!({"accountId": account_id}),
        )
        .await?;
        Ok(account)
    }

    /// Check a presented secret against the stored hash.
    pub async fn verify_service_account_secret(
        &self,
        tenant_id: &str,
        account_id: &str,
        secret: &str,
    ) -> Result<bool, OarsError> {
        let Some(account) = self.store.get_service_account(tenant_id, account_id).await? else {
            return Ok(false);
        };
        Ok(!account.disabled && account.secret_hash == sha256_hex(secret.as_bytes()))
    }

    async fn emit(
        &self,
        tenant_id: &str,
        event_type: &str,
        actor: &str,
        payload: serde_json::Value,
    ) -> Result<(), OarsError> {
        if let Some(events) = &self.events {
            events
                .publish(tenant_id, event_type, EventSeverity::Info, actor, payload)
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oars_crypto::FieldProtection;
    use oars_store::file::FilePlatformStore;

    fn service() -> DirectoryService {
        DirectoryService::new(Arc::new(FilePlatformStore::in_memory(
            FieldProtection::disabled(),
        )))
    }

    #[tokio::test]
    async fn members_roundtrip() {
        let directory = service();
        directory.create_tenant("tenant_alpha", "Alpha Corp", "admin_1").await.unwrap();
        directory
            .add_member("tenant_alpha", "user_1", Role::Operator, "admin_1")
            .await
            .unwrap();

        let members = directory.list_members("tenant_alpha").await.unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].role, Role::Operator);

        assert!(directory.remove_member("tenant_alpha", "user_1", "admin_1").await.unwrap());
        assert!(!directory.remove_member("tenant_alpha", "user_1", "admin_1").await.unwrap());
    }

    #[tokio::test]
    async fn service_account_secret_is_hashed_and_verifiable_once() {
        let directory = service();
        let minted = directory
            .create_service_account("tenant_alpha", "reporter", "admin_1")
            .await
            .unwrap();
        assert!(minted.secret.starts_with("oars_sk_"));
        assert_ne!(minted.account.secret_hash, minted.secret);

        assert!(directory
            .verify_service_account_secret("tenant_alpha", &minted.account.account_id, &minted.secret)
            .await
            .unwrap());
        assert!(!directory
            .verify_service_account_secret("tenant_alpha", &minted.account.account_id, "wrong")
            .await
            .unwrap());

        directory
            .disable_service_account("tenant_alpha", &minted.account.account_id, "admin_1")
            .await
            .unwrap();
        assert!(!directory
            .verify_service_account_secret("tenant_alpha", &minted.account.account_id, &minted.secret)
            .await
            .unwrap());
    }
}
