//! Platform configuration from environment variables.

use oars_identity::MtlsSettings;
use oars_types::{OarsError, SiemTargetConfig, WorkloadIdentity};
use std::path::PathBuf;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreKind {
    File,
    Postgres,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackplaneMode {
    Inline,
    Queue,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackplaneDriver {
    File,
    Postgres,
}

#[derive(Clone, Debug)]
pub struct PlatformConfig {
    pub data_dir: PathBuf,

    pub store: StoreKind,
    pub database_url: Option<String>,

    pub backplane_mode: BackplaneMode,
    pub backplane_driver: BackplaneDriver,
    pub backplane_retry_delay_seconds: u64,
    pub backplane_lock_timeout_seconds: u64,
    pub backplane_max_attempts: u32,
    pub backplane_poll_interval_ms: u64,
    pub backplane_claim_limit: usize,

    pub siem_targets: Vec<SiemTargetConfig>,
    pub siem_retry_interval_seconds: u64,
    pub siem_retry_max_attempts: u32,
    pub siem_retry_max_queue_size: usize,
    pub siem_retry_queue_path: Option<PathBuf>,
    pub siem_retry_auto_start: bool,

    pub immutable_ledger_path: PathBuf,
    pub data_encryption_key: Option<String>,
    pub event_file_sink: Option<PathBuf>,
    pub connector_allow_list: Option<Vec<String>>,

    pub jwt_secret: Option<String>,
    pub jwt_issuer: Option<String>,
    pub jwt_audience: Option<String>,
    pub allow_dev_tokens_in_production: bool,
    pub disable_dev_tokens: bool,

    pub mtls: MtlsSettings,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        let data_dir = PathBuf::from("./data");
        Self {
            immutable_ledger_path: data_dir.join("ledger.ndjson"),
            data_dir,
            store: StoreKind::File,
            database_url: None,
            backplane_mode: BackplaneMode::Inline,
            backplane_driver: BackplaneDriver::File,
            backplane_retry_delay_seconds: 30,
            backplane_lock_timeout_seconds: 300,
            backplane_max_attempts: 3,
            backplane_poll_interval_ms: 500,
            backplane_claim_limit: 5,
            siem_targets: Vec::new(),
            siem_retry_interval_seconds: 30,
            siem_retry_max_attempts: 5,
            siem_retry_max_queue_size: 1000,
            siem_retry_queue_path: None,
            siem_retry_auto_start: true,
            data_encryption_key: None,
            event_file_sink: None,
            connector_allow_list: None,
            jwt_secret: None,
            jwt_issuer: None,
            jwt_audience: None,
            allow_dev_tokens_in_production: false,
            disable_dev_tokens: false,
            mtls: MtlsSettings::default(),
        }
    }
}

impl PlatformConfig {
    /// Read the full configuration from the process environment.
    pub fn from_env() -> Result<Self, OarsError> {
        let mut config = Self::default();

        if let Some(dir) = env_string("OARS_DATA_DIR") {
            config.data_dir = PathBuf::from(&dir);
            config.immutable_ledger_path = config.data_dir.join("ledger.ndjson");
        }

        match env_string("STORE").as_deref() {
            None | Some("file") => config.store = StoreKind::File,
            Some("postgres") => {
                config.store = StoreKind::Postgres;
                config.database_url = env_string("DATABASE_URL");
                if config.database_url.is_none() {
                    return Err(OarsError::Validation(
                        "STORE=postgres requires DATABASE_URL".into(),
                    ));
                }
            }
            Some(other) => {
                return Err(OarsError::Validation(format!("unknown STORE {other}")));
            }
        }

        match env_string("BACKPLANE_MODE").as_deref() {
            None | Some("inline") => config.backplane_mode = BackplaneMode::Inline,
            Some("queue") => config.backplane_mode = BackplaneMode::Queue,
            Some(other) => {
                return Err(OarsError::Validation(format!(
                    "unknown BACKPLANE_MODE {other}"
                )));
            }
        }
        match env_string("BACKPLANE_DRIVER").as_deref() {
            None | Some("file") => config.backplane_driver = BackplaneDriver::File,
            Some("postgres") => config.backplane_driver = BackplaneDriver::Postgres,
            Some(other) => {
                return Err(OarsError::Validation(format!(
                    "unknown BACKPLANE_DRIVER {other}"
                )));
            }
        }
        if let Some(value) = env_u64("BACKPLANE_RETRY_DELAY_SECONDS")? {
            config.backplane_retry_delay_seconds = value;
        }
        if let Some(value) = env_u64("BACKPLANE_LOCK_TIMEOUT_SECONDS")? {
            config.backplane_lock_timeout_seconds = value;
        }
        if let Some(value) = env_u64("BACKPLANE_MAX_ATTEMPTS")? {
            config.backplane_max_attempts = value as u32;
        }
        if let Some(value) = env_u64("BACKPLANE_POLL_INTERVAL_MS")? {
            config.backplane_poll_interval_ms = value;
        }
        if let Some(value) = env_u64("BACKPLANE_CLAIM_LIMIT")? {
            config.backplane_claim_limit = value as usize;
        }

        if let Some(raw) = env_string("SIEM_TARGETS") {
            config.siem_targets = serde_json::from_str(&raw)
                .map_err(|e| OarsError::Validation(format!("SIEM_TARGETS is invalid: {e}")))?;
        }
        if let Some(value) = env_u64("SIEM_RETRY_INTERVAL_SECONDS")? {
            config.siem_retry_interval_seconds = value;
        }
        if let Some(value) = env_u64("SIEM_RETRY_MAX_ATTEMPTS")? {
            config.siem_retry_max_attempts = value as u32;
        }
        if let Some(value) = env_u64("SIEM_RETRY_MAX_QUEUE_SIZE")? {
            config.siem_retry_max_queue_size = value as usize;
        }
        config.siem_retry_queue_path = env_string("SIEM_RETRY_QUEUE_PATH")
            .map(PathBuf::from)
            .or_else(|| Some(config.data_dir.join("siem-retry.json")));
        if let Some(value) = env_bool("SIEM_RETRY_AUTO_START")? {
            config.siem_retry_auto_start = value;
        }

        if let Some(path) = env_string("IMMUTABLE_LEDGER_PATH") {
            config.immutable_ledger_path = PathBuf::from(path);
        }
        config.data_encryption_key = env_string("DATA_ENCRYPTION_KEY");
        config.event_file_sink = env_string("SECURITY_EVENT_FILE")
            .map(PathBuf::from)
            .or_else(|| Some(config.data_dir.join("events.ndjson")));
        config.connector_allow_list = env_string("CONNECTOR_ALLOW_LIST").map(|raw| {
            raw.split(',')
                .map(|id| id.trim().to_string())
                .filter(|id| !id.is_empty())
                .collect()
        });

        config.jwt_secret = env_string("JWT_SECRET");
        config.jwt_issuer = env_string("JWT_ISSUER");
        config.jwt_audience = env_string("JWT_AUDIENCE");
        if let Some(value) = env_bool("ALLOW_DEV_TOKENS_IN_PRODUCTION")? {
            config.allow_dev_tokens_in_production = value;
        }
        if let Some(value) = env_bool("DISABLE_DEV_TOKENS")? {
            config.disable_dev_tokens = value;
        }

        config.mtls = mtls_from_env()?;
        Ok(config)
    }
}

fn mtls_from_env() -> Result<MtlsSettings, OarsError> {
    let mut settings = MtlsSettings {
        enabled: env_bool("MTLS_ENABLED")?.unwrap_or(false),
        attestation_secret: env_string("MTLS_ATTESTATION_SECRET"),
        ..Default::default()
    };
    if let Some(value) = env_u64("MTLS_MAX_CLOCK_SKEW_SECONDS")? {
        settings.max_clock_skew_seconds = value;
    }

    let raw = match env_string("MTLS_TRUSTED_IDENTITIES") {
        Some(inline) => Some(inline),
        None => match env_string("MTLS_TRUSTED_IDENTITIES_FILE") {
            Some(path) => Some(std::fs::read_to_string(&path).map_err(|e| {
                OarsError::Validation(format!("MTLS_TRUSTED_IDENTITIES_FILE {path}: {e}"))
            })?),
            None => None,
        },
    };
    if let Some(raw) = raw {
        settings.trusted = serde_json::from_str::<Vec<WorkloadIdentity>>(&raw)
            .map_err(|e| OarsError::Validation(format!("trusted identities invalid: {e}")))?;
    }
    if settings.enabled && settings.attestation_secret.is_none() {
        return Err(OarsError::Validation(
            "MTLS_ENABLED requires MTLS_ATTESTATION_SECRET".into(),
        ));
    }
    Ok(settings)
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_u64(key: &str) -> Result<Option<u64>, OarsError> {
    match env_string(key) {
        Some(raw) => raw
            .parse::<u64>()
            .map(Some)
            .map_err(|_| OarsError::Validation(format!("{key} must be an integer"))),
        None => Ok(None),
    }
}

fn env_bool(key: &str) -> Result<Option<bool>, OarsError> {
    match env_string(key) {
        Some(raw) => match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => Err(OarsError::Validation(format!("{key} must be a boolean"))),
        },
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_file_backed_and_inline() {
        let config = PlatformConfig::default();
        assert_eq!(config.store, StoreKind::File);
        assert_eq!(config.backplane_mode, BackplaneMode::Inline);
        assert_eq!(config.siem_retry_max_queue_size, 1000);
        assert_eq!(config.mtls.max_clock_skew_seconds, 300);
    }

    #[test]
    fn siem_targets_parse_from_tagged_json() {
        let raw = r#"[
            {"type": "generic_webhook", "id": "hook1", "url": "https://siem.example.com"},
            {"type": "splunk_hec", "id": "splunk", "url": "https://hec:8088", "token": "t"}
        ]"#;
        let targets: Vec<SiemTargetConfig> = serde_json::from_str(raw).unwrap();
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].id(), "hook1");
        assert_eq!(targets[1].id(), "splunk");
    }
}
