//! SCIM provisioning mirrored onto tenant membership.
//!
//! Users and groups arrive from the IdP through the SCIM contract; group
//! to role mappings decide what membership each active group member gets.

use chrono::Utc;
use oars_events::SecurityEventService;
use oars_store::DirectoryStore;
use oars_types::{
    prefixed_id, EventSeverity, OarsError, Role, ScimGroup, ScimGroupMapping, ScimUser,
    TenantMember,
};
use serde_json::json;
use std::sync::Arc;

pub struct ScimService {
    store: Arc<dyn DirectoryStore>,
    events: Option<Arc<SecurityEventService>>,
}

impl ScimService {
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

    pub async fn provision_user(
        &self,
        tenant_id: &str,
        user_name: &str,
        emails: Vec<String>,
    ) -> Result<ScimUser, OarsError> {
        let user = ScimUser {
            user_id: prefixed_id("scu"),
            tenant_id: tenant_id.to_string(),
            user_name: user_name.to_string(),
            active: true,
            emails,
            updated_at: Utc::now(),
        };
        self.store.upsert_scim_user(user.clone()).await?;
        self.emit(tenant_id, "scim.user_provisioned", json!({"userName": user_name}))
            .await?;
        Ok(user)
    }

    /// Deactivate the user and drop their mirrored membership.
    pub async fn deprovision_user(
        &self,
        tenant_id: &str,
        user_id: &str,
    ) -> Result<ScimUser, OarsError> {
        let mut user = self
            .store
            .get_scim_user(tenant_id, user_id)
            .await?
            .ok_or_else(|| OarsError::NotFound(format!("scim user {user_id} not found")))?;
        user.active = false;
        user.updated_at = Utc::now();
        self.store.upsert_scim_user(user.clone()).await?;
        self.store.remove_member(tenant_id, &user.user_name).await?;
        self.emit(
            tenant_id,
            "scim.user_deprovisioned",
            json!({"userId": user_id, "userName": user.user_name}),
        )
        .await?;
        Ok(user)
    }

    pub async fn upsert_group(
        &self,
        tenant_id: &str,
        display_name: &str,
        member_user_ids: Vec<String>,
    ) -> Result<ScimGroup, OarsError> {
        let existing = self
            .store
            .list_scim_groups(tenant_id)
            .await?
            .into_iter()
            .find(|g| g.display_name == display_name);
        let group = ScimGroup {
            group_id: existing
                .map(|g| g.group_id)
                .unwrap_or_else(|| prefixed_id("scg")),
            tenant_id: tenant_id.to_string(),
            display_name: display_name.to_string(),
            member_user_ids,
            updated_at: Utc::now(),
        };
        self.store.upsert_scim_group(group.clone()).await?;
        self.emit(tenant_id, "scim.group_upserted", json!({"displayName": display_name}))
            .await?;
        Ok(group)
    }

    pub async fn map_group_to_role(
        &self,
        tenant_id: &str,
        group_id: &str,
        role: Role,
    ) -> Result<ScimGroupMapping, OarsError> {
        let mapping = ScimGroupMapping {
            tenant_id: tenant_id.to_string(),
            group_id: group_id.to_string(),
            role,
            updated_at: Utc::now(),
        };
        self.store.upsert_scim_mapping(mapping.clone()).await?;
        self.emit(
            tenant_id,
            "scim.mapping_upserted",
            json!({"groupId": group_id, "role": role}),
        )
        .await?;
        Ok(mapping)
    }

    /// Recompute mirrored membership: every active user in a mapped group
    /// becomes a member with the mapped role.
    pub async fn apply_mappings(&self, tenant_id: &str) -> Result<usize, OarsError> {
        let users = self.store.list_scim_users(tenant_id).await?;
        let groups = self.store.list_scim_groups(tenant_id).await?;
        let mappings = self.store.list_scim_mappings(tenant_id).await?;

        let mut applied = 0;
        for mapping in &mappings {
            let Some(group) = groups.iter().find(|g| g.group_id == mapping.group_id) else {
                continue;
            };
            for user_id in &group.member_user_ids {
                let Some(user) = users.iter().find(|u| &u.user_id == user_id && u.active) else {
                    continue;
                };
                self.store
                    .upsert_member(TenantMember {
                        tenant_id: tenant_id.to_string(),
                        subject: user.user_name.clone(),
                        role: mapping.role,
                        added_at: Utc::now(),
                    })
                    .await?;
                applied += 1;
            }
        }
        Ok(applied)
    }

    async fn emit(
        &self,
        tenant_id: &str,
        event_type: &str,
        payload: serde_json::Value,
    ) -> Result<(), OarsError> {
        if let Some(events) = &self.events {
            events
                .publish(tenant_id, event_type, EventSeverity::Info, "scim", payload)
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

    #[tokio::test]
    async fn mapped_group_members_become_tenant_members() {
        let store = Arc::new(FilePlatformStore::in_memory(FieldProtection::disabled()));
        let scim = ScimService::new(store.clone());

        let alice = scim
            .provision_user("tenant_alpha", "alice", vec!["alice@example.com".into()])
            .await
            .unwrap();
        let bob = scim.provision_user("tenant_alpha", "bob", vec![]).await.unwrap();
        let group = scim
            .upsert_group(
                "tenant_alpha",
                "auditors",
                vec![alice.user_id.clone(), bob.user_id.clone()],
            )
            .await
            .unwrap();
        scim.map_group_to_role("tenant_alpha", &group.group_id, Role::Auditor)
            .await
            .unwrap();

        let applied = scim.apply_mappings("tenant_alpha").await.unwrap();
        assert_eq!(applied, 2);
        let members = store.list_members("tenant_alpha").await.unwrap();
        assert_eq!(members.len(), 2);
        assert!(members.iter().all(|m| m.role == Role::Auditor));

        // Deprovisioning removes the mirrored membership and further
        // mapping passes skip the inactive user.
        scim.deprovision_user("tenant_alpha", &bob.user_id).await.unwrap();
        let members = store.list_members("tenant_alpha").await.unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].subject, "alice");
        assert_eq!(scim.apply_mappings("tenant_alpha").await.unwrap(), 1);
    }
}
