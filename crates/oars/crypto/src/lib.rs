//! OARS crypto primitives.
//!
//! One home for the hashing and key material the rest of the platform
//! leans on: deterministic canonical JSON (receipt hashing, ledger payload
//! hashing, and idempotency fingerprints all share it), SHA-256 helpers,
//! Ed25519 keypairs with PEM encoding, HMAC-SHA256, and the AES-256-GCM
//! field-protection envelope for data at rest.

#![deny(unsafe_code)]

mod canonical;
mod protect;
mod signing;

pub use canonical::{canonical_json, canonical_json_bytes};
pub use protect::{FieldProtection, ENCRYPTED_MARKER, SENSITIVE_KEYS};
pub use signing::{verify_with_public_pem, Ed25519Keypair, SigningError};

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 of raw bytes.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// SHA-256 over the canonical JSON form of a value.
pub fn hash_canonical(value: &serde_json::Value) -> String {
    sha256_hex(canonical_json(value).as_bytes())
}

/// HMAC-SHA256 of `data` under `key`.
pub fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(key).expect("hmac accepts keys of any length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// Constant-time HMAC-SHA256 verification.
pub fn hmac_sha256_verify(key: &[u8], data: &[u8], expected: &[u8]) -> bool {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(key).expect("hmac accepts keys of any length");
    mac.update(data);
    mac.verify_slice(expected).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_matches_known_vector() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn hmac_roundtrip_verifies() {
        let tag = hmac_sha256(b"k", b"payload");
        assert!(hmac_sha256_verify(b"k", b"payload", &tag));
        assert!(!hmac_sha256_verify(b"k", b"tampered", &tag));
        assert!(!hmac_sha256_verify(b"other", b"payload", &tag));
    }
}
