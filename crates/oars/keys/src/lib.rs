//! OARS signing key service.
//!
//! Per-tenant Ed25519 keys with an active / retiring / retired lifecycle.
//! All key material lives in a single JSON document written whole through
//! a temp-file rename; private keys never leave this process.

#![deny(unsafe_code)]

use chrono::{DateTime, Utc};
use oars_crypto::Ed25519Keypair;
use oars_types::{
    prefixed_id, KeyRotation, KeyStatus, SignatureBundle, TenantKey, TenantPublicKey,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::warn;

#[derive(Debug, Error)]
pub enum KeyServiceError {
    #[error("key material error: {0}")]
    Material(String),

    #[error("key document I/O error: {0}")]
    Io(String),

    #[error("key document is corrupt: {0}")]
    Corrupt(String),
}

impl From<KeyServiceError> for oars_types::OarsError {
    fn from(value: KeyServiceError) -> Self {
        oars_types::OarsError::Internal(value.to_string())
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct KeyDocument {
    #[serde(default)]
    keys: Vec<TenantKey>,
}

/// Tenant signing key lifecycle and sign/verify operations.
pub struct SigningKeyService {
    path: Option<PathBuf>,
    state: Mutex<KeyDocument>,
}

impl SigningKeyService {
    /// Open the key document at `path`, creating it lazily on first write.
    /// A tenant found with more than one active key (corruption from a
    /// crashed rotation) keeps the newest active and demotes the rest.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, KeyServiceError> {
        let path = path.as_ref().to_path_buf();
        let mut document = if tokio::fs::try_exists(&path)
            .await
            .map_err(|e| KeyServiceError::Io(e.to_string()))?
        {
            let raw = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| KeyServiceError::Io(e.to_string()))?;
            serde_json::from_str(&raw).map_err(|e| KeyServiceError::Corrupt(e.to_string()))?
        } else {
            KeyDocument::default()
        };

        if repair_duplicate_actives(&mut document) {
            warn!(path = %path.display(), "repaired duplicate active signing keys");
            persist(&path, &document).await?;
        }

        Ok(Self {
            path: Some(path),
            state: Mutex::new(document),
        })
    }

    /// Ephemeral service with no backing file, for tests.
    pub fn ephemeral() -> Self {
        Self {
            path: None,
            state: Mutex::new(KeyDocument::default()),
        }
    }

    /// The tenant's active key, created on first use.
    pub async fn get_or_create_tenant_key(
        &self,
        tenant_id: &str,
    ) -> Result<TenantPublicKey, KeyServiceError> {
        let mut doc = self.state.lock().await;
        if let Some(key) = find_active(&doc, tenant_id) {
            return Ok(TenantPublicKey::from(key));
        }

        let key = mint_key(tenant_id)?;
        let public = TenantPublicKey::from(&key);
        doc.keys.push(key);
        if let Some(path) = &self.path {
            persist(path, &doc).await?;
        }
        Ok(public)
    }

    /// Rotate the tenant's key: the current active (if any) becomes
    /// retiring and a fresh active key is minted.
    pub async fn rotate_tenant_key(
        &self,
        tenant_id: &str,
    ) -> Result<KeyRotation, KeyServiceError> {
        let mut doc = self.state.lock().await;
        let rotated_at = Utc::now();

        let mut previous_active_key_id = None;
        for key in doc
            .keys
            .iter_mut()
            .filter(|k| k.tenant_id == tenant_id && k.status == KeyStatus::Active)
        {
            key.status = KeyStatus::Retiring;
            key.rotated_at = Some(rotated_at);
            previous_active_key_id = Some(key.key_id.clone());
        }

        let key = mint_key(tenant_id)?;
        let new_key_id = key.key_id.clone();
        doc.keys.push(key);
        if let Some(path) = &self.path {
            persist(path, &doc).await?;
        }

        Ok(KeyRotation {
            new_key_id,
            previous_active_key_id,
            rotated_at,
        })
    }

    /// Sign `data` with the tenant's active key, creating one if needed.
    pub async fn sign(
        &self,
        tenant_id: &str,
        data: &[u8],
    ) -> Result<SignatureBundle, KeyServiceError> {
        let mut doc = self.state.lock().await;
        if find_active(&doc, tenant_id).is_none() {
            let key = mint_key(tenant_id)?;
            doc.keys.push(key);
            if let Some(path) = &self.path {
                persist(path, &doc).await?;
            }
        }

        let key = find_active(&doc, tenant_id)
            .ok_or_else(|| KeyServiceError::Corrupt("active key vanished".to_string()))?;
        let pair = Ed25519Keypair::from_private_pem(&key.private_key_pem)
            .map_err(|e| KeyServiceError::Material(e.to_string()))?;
        Ok(SignatureBundle {
            signature: pair.sign_base64(data),
            key_id: key.key_id.clone(),
        })
    }

    /// Verify `signature` over `data` against any historical key by id.
    /// Unknown key ids verify false; this never errors.
    pub async fn verify(&self, data: &[u8], signature: &str, key_id: &str) -> bool {
        let doc = self.state.lock().await;
        match doc.keys.iter().find(|k| k.key_id == key_id) {
            Some(key) => oars_crypto::verify_with_public_pem(&key.public_key_pem, data, signature),
            None => false,
        }
    }

    /// Fetch the public half of a key by id, any status.
    pub async fn get_public_key(&self, key_id: &str) -> Option<TenantPublicKey> {
        let doc = self.state.lock().await;
        doc.keys
            .iter()
            .find(|k| k.key_id == key_id)
            .map(TenantPublicKey::from)
    }

    /// All of a tenant's keys, newest first. Private material included;
    /// callers outside this crate should prefer `list_tenant_public_keys`.
    pub async fn list_tenant_keys(&self, tenant_id: &str) -> Vec<TenantKey> {
        let doc = self.state.lock().await;
        let mut keys: Vec<_> = doc
            .keys
            .iter()
            .filter(|k| k.tenant_id == tenant_id)
            .cloned()
            .collect();
        keys.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        keys
    }

    pub async fn list_tenant_public_keys(&self, tenant_id: &str) -> Vec<TenantPublicKey> {
        let doc = self.state.lock().await;
        let mut keys: Vec<_> = doc
            .keys
            .iter()
            .filter(|k| k.tenant_id == tenant_id)
            .map(TenantPublicKey::from)
            .collect();
        keys.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        keys
    }
}

fn find_active<'a>(doc: &'a KeyDocument, tenant_id: &str) -> Option<&'a TenantKey> {
    doc.keys
        .iter()
        .find(|k| k.tenant_id == tenant_id && k.status == KeyStatus::Active)
}

fn mint_key(tenant_id: &str) -> Result<TenantKey, KeyServiceError> {
    let pair = Ed25519Keypair::generate();
    Ok(TenantKey {
        key_id: prefixed_id("key"),
        tenant_id: tenant_id.to_string(),
        private_key_pem: pair
            .private_pem()
            .map_err(|e| KeyServiceError::Material(e.to_string()))?,
        public_key_pem: pair
            .public_pem()
            .map_err(|e| KeyServiceError::Material(e.to_string()))?,
        status: KeyStatus::Active,
        created_at: Utc::now(),
        rotated_at: None,
    })
}

/// Keep the newest active per tenant, demote the rest to retiring.
/// Returns whether anything changed.
fn repair_duplicate_actives(doc: &mut KeyDocument) -> bool {
    let mut changed = false;
    let tenants: Vec<String> = doc
        .keys
        .iter()
        .map(|k| k.tenant_id.clone())
        .collect::<std::collections::BTreeSet<_>>()
        .into_iter()
        .collect();

    for tenant in tenants {
        let newest_active: Option<(String, DateTime<Utc>)> = doc
            .keys
            .iter()
            .filter(|k| k.tenant_id == tenant && k.status == KeyStatus::Active)
            .map(|k| (k.key_id.clone(), k.created_at))
            .max_by_key(|(_, created_at)| *created_at);

        let Some((keep_id, _)) = newest_active else {
            continue;
        };
        for key in doc
            .keys
            .iter_mut()
            .filter(|k| k.tenant_id == tenant && k.status == KeyStatus::Active)
        {
            if key.key_id != keep_id {
                key.status = KeyStatus::Retiring;
                changed = true;
            }
        }
    }
    changed
}

async fn persist(path: &Path, doc: &KeyDocument) -> Result<(), KeyServiceError> {
    let serialized =
        serde_json::to_string(doc).map_err(|e| KeyServiceError::Corrupt(e.to_string()))?;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| KeyServiceError::Io(e.to_string()))?;
    }
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, serialized.as_bytes())
        .await
        .map_err(|e| KeyServiceError::Io(e.to_string()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| KeyServiceError::Io(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn creates_one_active_key_per_tenant() {
        let service = SigningKeyService::ephemeral();
        let first = service.get_or_create_tenant_key("tenant_alpha").await.unwrap();
        let second = service.get_or_create_tenant_key("tenant_alpha").await.unwrap();
        assert_eq!(first.key_id, second.key_id);

        let keys = service.list_tenant_keys("tenant_alpha").await;
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].status, KeyStatus::Active);
    }

    #[tokio::test]
    async fn rotation_retires_previous_key_and_keeps_it_verifiable() {
        let service = SigningKeyService::ephemeral();
        let bundle = service.sign("tenant_alpha", b"payload").await.unwrap();

        let rotation = service.rotate_tenant_key("tenant_alpha").await.unwrap();
        assert_eq!(
            rotation.previous_active_key_id.as_deref(),
            Some(bundle.key_id.as_str())
        );
        assert_ne!(rotation.new_key_id, bundle.key_id);

        // Old signature still verifies through the retiring key.
        assert!(service.verify(b"payload", &bundle.signature, &bundle.key_id).await);

        // New signatures come from the new key.
        let fresh = service.sign("tenant_alpha", b"payload").await.unwrap();
        assert_eq!(fresh.key_id, rotation.new_key_id);

        let actives: Vec<_> = service
            .list_tenant_keys("tenant_alpha")
            .await
            .into_iter()
            .filter(|k| k.status == KeyStatus::Active)
            .collect();
        assert_eq!(actives.len(), 1);
    }

    #[tokio::test]
    async fn verify_with_unknown_key_is_false_not_an_error() {
        let service = SigningKeyService::ephemeral();
        assert!(!service.verify(b"data", "c2ln", "key_missing").await);
    }

    #[tokio::test]
    async fn document_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys").join("tenant-keys.json");

        let bundle = {
            let service = SigningKeyService::open(&path).await.unwrap();
            service.sign("tenant_alpha", b"payload").await.unwrap()
        };

        let service = SigningKeyService::open(&path).await.unwrap();
        assert!(service.verify(b"payload", &bundle.signature, &bundle.key_id).await);
    }

    #[tokio::test]
    async fn load_repairs_duplicate_active_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tenant-keys.json");

        // Forge a document with two actives for one tenant.
        let older = mint_key("tenant_alpha").unwrap();
        let mut newer = mint_key("tenant_alpha").unwrap();
        newer.created_at = older.created_at + chrono::Duration::seconds(5);
        let newer_id = newer.key_id.clone();
        let doc = KeyDocument {
            keys: vec![older, newer],
        };
        persist(&path, &doc).await.unwrap();

        let service = SigningKeyService::open(&path).await.unwrap();
        let keys = service.list_tenant_keys("tenant_alpha").await;
        let actives: Vec<_> = keys.iter().filter(|k| k.status == KeyStatus::Active).collect();
        assert_eq!(actives.len(), 1);
        assert_eq!(actives[0].key_id, newer_id);
    }
}
