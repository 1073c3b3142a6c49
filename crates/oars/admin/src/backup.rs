//! Backup manifests for disaster recovery.
//!
//! A backup run digests the store document, the ledger file, and any
//! other configured artifacts; verification re-hashes them against the
//! manifest. Manifests are persisted as JSON files in the backup
//! directory.

use oars_crypto::sha256_hex;
use oars_types::{prefixed_id, BackupFile, BackupManifest, OarsError};
use std::path::{Path, PathBuf};
use tracing::info;

pub struct BackupService {
    manifest_dir: PathBuf,
}

impl BackupService {
    pub fn new(manifest_dir: impl AsRef<Path>) -> Self {
        Self {
            manifest_dir: manifest_dir.as_ref().to_path_buf(),
        }
    }

    /// Digest the given artifacts into a persisted manifest.
    pub async fn create_backup(&self, files: &[PathBuf]) -> Result<BackupManifest, OarsError> {
        let mut entries = Vec::with_capacity(files.len());
        for path in files {
            let bytes = tokio::fs::read(path)
                .await
                .map_err(|e| OarsError::Internal(format!("backup read {}: {e}", path.display())))?;
            entries.push(BackupFile {
                path: path.display().to_string(),
                sha256: sha256_hex(&bytes),
                bytes: bytes.len() as u64,
            });
        }

        let manifest = BackupManifest {
            backup_id: prefixed_id("bak"),
            created_at: chrono::Utc::now(),
            files: entries,
        };

        tokio::fs::create_dir_all(&self.manifest_dir)
            .await
            .map_err(|e| OarsError::Internal(e.to_string()))?;
        let manifest_path = self
            .manifest_dir
            .join(format!("{}.json", manifest.backup_id));
        let serialized = serde_json::to_string_pretty(&manifest)
            .map_err(|e| OarsError::Internal(e.to_string()))?;
        tokio::fs::write(&manifest_path, serialized)
            .await
            .map_err(|e| OarsError::Internal(e.to_string()))?;

        info!(backup = %manifest.backup_id, files = manifest.files.len(), "backup manifest written");
        Ok(manifest)
    }

    pub async fn list_backups(&self) -> Result<Vec<BackupManifest>, OarsError> {
        if !self.manifest_dir.exists() {
            return Ok(Vec::new());
        }
        let mut manifests = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.manifest_dir)
            .await
            .map_err(|e| OarsError::Internal(e.to_string()))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| OarsError::Internal(e.to_string()))?
        {
            if entry.path().extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let raw = tokio::fs::read_to_string(entry.path())
                .await
                .map_err(|e| OarsError::Internal(e.to_string()))?;
            if let Ok(manifest) = serde_json::from_str::<BackupManifest>(&raw) {
                manifests.push(manifest);
            }
        }
        manifests.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(manifests)
    }

    /// Re-hash every artifact in the manifest; names of files that are
    /// missing or drifted come back as failures.
    pub async fn verify_backup(&self, manifest: &BackupManifest) -> Result<Vec<String>, OarsError> {
        let mut failures = Vec::new();
        for file in &manifest.files {
            match tokio::fs::read(&file.path).await {
                Ok(bytes) if sha256_hex(&bytes) == file.sha256 => {}
                Ok(_) => failures.push(format!("{}: digest mismatch", file.path)),
                Err(error) => failures.push(format!("{}: {error}", file.path)),
            }
        }
        Ok(failures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn backup_roundtrip_detects_drift() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("store.json");
        tokio::fs::write(&artifact, b"{\"actions\":[]}").await.unwrap();

        let service = BackupService::new(dir.path().join("backups"));
        let manifest = service.create_backup(&[artifact.clone()]).await.unwrap();
        assert_eq!(manifest.files.len(), 1);

        assert!(service.verify_backup(&manifest).await.unwrap().is_empty());

        tokio::fs::write(&artifact, b"{\"actions\":[1]}").await.unwrap();
        let failures = service.verify_backup(&manifest).await.unwrap();
        assert_eq!(failures.len(), 1);
        assert!(failures[0].contains("digest mismatch"));

        let listed = service.list_backups().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].backup_id, manifest.backup_id);
    }
}
