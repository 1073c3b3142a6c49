//! mTLS workload identity for service-role tokens.
//!
//! The transport terminates TLS and passes the client certificate's
//! SHA-256 fingerprint plus an HMAC attestation covering
//! `subject\nfingerprint\nissued_at`. The verifier checks the pair
//! against the trusted list and bounds clock skew.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, SecondsFormat, Utc};
use oars_crypto::{hmac_sha256, hmac_sha256_verify};
use oars_types::{OarsError, Role, TokenClaims, WorkloadIdentity};
use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_CLOCK_SKEW_SECONDS: u64 = 300;

#[derive(Clone, Debug)]
pub struct MtlsSettings {
    pub enabled: bool,
    pub trusted: Vec<WorkloadIdentity>,
    pub attestation_secret: Option<String>,
    pub max_clock_skew_seconds: u64,
}

impl Default for MtlsSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            trusted: Vec::new(),
            attestation_secret: None,
            max_clock_skew_seconds: DEFAULT_MAX_CLOCK_SKEW_SECONDS,
        }
    }
}

/// Attestation produced at the TLS edge.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MtlsAttestation {
    pub subject: String,
    pub fingerprint_sha256: String,
    pub issued_at: DateTime<Utc>,
    /// base64 HMAC-SHA256 over `attestation_message`.
    pub signature: String,
}

/// The exact bytes the attestation HMAC covers.
pub fn attestation_message(
    subject: &str,
    fingerprint_sha256: &str,
    issued_at: DateTime<Utc>,
) -> String {
    format!(
        "{}\n{}\n{}",
        subject,
        fingerprint_sha256,
        issued_at.to_rfc3339_opts(SecondsFormat::Secs, true)
    )
}

/// Produce a signed attestation; used by the edge and by tests.
pub fn sign_attestation(
    secret: &str,
    subject: &str,
    fingerprint_sha256: &str,
    issued_at: DateTime<Utc>,
) -> MtlsAttestation {
    let message = attestation_message(subject, fingerprint_sha256, issued_at);
    MtlsAttestation {
        subject: subject.to_string(),
        fingerprint_sha256: fingerprint_sha256.to_string(),
        issued_at,
        signature: BASE64.encode(hmac_sha256(secret.as_bytes(), message.as_bytes())),
    }
}

pub struct WorkloadIdentityVerifier {
    settings: MtlsSettings,
}

impl WorkloadIdentityVerifier {
    pub fn new(settings: MtlsSettings) -> Self {
        Self { settings }
    }

    /// Gate service-role tokens behind a verified workload identity.
    /// Other roles pass untouched, as does everything when mTLS is off.
    pub fn verify(
        &self,
        claims: &TokenClaims,
        attestation: Option<&MtlsAttestation>,
        now: DateTime<Utc>,
    ) -> Result<(), OarsError> {
        if !self.settings.enabled || claims.role != Role::Service {
            return Ok(());
        }

        let attestation = attestation.ok_or_else(|| {
            OarsError::MtlsRequired("service tokens require a workload identity".into())
        })?;

        if attestation.subject != claims.subject {
            return Err(OarsError::MtlsRequired(format!(
                "attestation subject {} does not match token subject {}",
                attestation.subject, claims.subject
            )));
        }

        let trusted = self.settings.trusted.iter().any(|identity| {
            identity.subject == attestation.subject
                && identity.fingerprint_sha256 == attestation.fingerprint_sha256
        });
        if !trusted {
            return Err(OarsError::MtlsRequired(format!(
                "workload identity ({}, {}) is not trusted",
                attestation.subject, attestation.fingerprint_sha256
            )));
        }

        let skew = (now - attestation.issued_at).num_seconds().unsigned_abs();
        if skew > self.settings.max_clock_skew_seconds {
            return Err(OarsError::MtlsRequired(format!(
                "attestation clock skew {skew}s exceeds limit"
            )));
        }

        let secret = self.settings.attestation_secret.as_deref().ok_or_else(|| {
            OarsError::MtlsRequired("mTLS enabled without an attestation secret".into())
        })?;
        let message = attestation_message(
            &attestation.subject,
            &attestation.fingerprint_sha256,
            attestation.issued_at,
        );
        let signature = BASE64
            .decode(&attestation.signature)
            .map_err(|_| OarsError::MtlsRequired("attestation signature is not base64".into()))?;
        if !hmac_sha256_verify(secret.as_bytes(), message.as_bytes(), &signature) {
            return Err(OarsError::MtlsRequired(
                "attestation signature does not verify".into(),
            ));
        }
        Ok(())
    }
}
