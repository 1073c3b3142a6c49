//! Shared fixtures for the OARS end-to-end scenario tests.

#![deny(unsafe_code)]

use oars_platform::{BackplaneDriver, BackplaneMode, PlatformConfig, PlatformContext};
use oars_types::{OarsError, Role, TokenClaims};
use std::path::Path;

/// A platform config rooted in a scratch directory: file store, no SIEM
/// targets, scheduler off, encryption on.
pub fn test_config(data_dir: &Path) -> PlatformConfig {
    PlatformConfig {
        data_dir: data_dir.to_path_buf(),
        immutable_ledger_path: data_dir.join("ledger.ndjson"),
        siem_retry_auto_start: false,
        siem_retry_queue_path: Some(data_dir.join("siem-retry.json")),
        event_file_sink: Some(data_dir.join("events.ndjson")),
        data_encryption_key: Some("integration-test-key".to_string()),
        ..PlatformConfig::default()
    }
}

/// Same, but with the file-backed queue backplane enabled.
pub fn queued_config(data_dir: &Path) -> PlatformConfig {
    PlatformConfig {
        backplane_mode: BackplaneMode::Queue,
        backplane_driver: BackplaneDriver::File,
        ..test_config(data_dir)
    }
}

pub async fn build_platform(config: PlatformConfig) -> Result<PlatformContext, OarsError> {
    PlatformContext::build(config).await
}

/// Agent claims entitled to one tenant with action-write scope.
pub fn agent_claims(tenant_id: &str, subject: &str) -> TokenClaims {
    TokenClaims {
        token_id: format!("tok_{subject}"),
        subject: subject.to_string(),
        tenant_ids: vec![tenant_id.to_string()],
        scopes: vec!["actions:write".to_string()],
        role: Role::Agent,
        delegation_chain: vec![],
        service_account_id: None,
    }
}
