//! Field-level AES-256-GCM protection for persisted payloads.
//!
//! Leaf strings stored under sensitive keys are replaced by an envelope
//! object before hitting disk; reads reverse the transform. Without a
//! configured key both directions are the identity, so the store works
//! unencrypted in development.

use aes_gcm::aead::{Aead, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Key, KeyInit, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Marker key identifying an encrypted envelope.
pub const ENCRYPTED_MARKER: &str = "__oarsEncrypted";

/// Keys (case-insensitive) whose string values are protected at rest.
pub const SENSITIVE_KEYS: [&str; 9] = [
    "password",
    "secret",
    "token",
    "apikey",
    "credential",
    "connection",
    "privatekey",
    "authorization",
    "x-api-key",
];

const TAG_LEN: usize = 16;

/// Configurable envelope encryption for sensitive fields.
#[derive(Clone)]
pub struct FieldProtection {
    cipher: Option<Aes256Gcm>,
}

impl FieldProtection {
    /// Without key material, `protect` and `restore` are the identity.
    pub fn disabled() -> Self {
        Self { cipher: None }
    }

    /// Derive the AES-256 key from operator-supplied key material.
    pub fn from_key_material(material: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(material.as_bytes());
        let digest = hasher.finalize();
        let key = Key::<Aes256Gcm>::from_slice(&digest);
        Self {
            cipher: Some(Aes256Gcm::new(key)),
        }
    }

    pub fn from_optional_key(material: Option<&str>) -> Self {
        match material {
            Some(material) if !material.is_empty() => Self::from_key_material(material),
            _ => Self::disabled(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.cipher.is_some()
    }

    /// Recursively replace sensitive leaf strings with encrypted envelopes.
    pub fn protect(&self, value: &Value) -> Value {
        let Some(cipher) = &self.cipher else {
            return value.clone();
        };
        protect_value(cipher, value, false)
    }

    /// Reverse `protect`, decrypting every envelope found in the document.
    pub fn restore(&self, value: &Value) -> Value {
        let Some(cipher) = &self.cipher else {
            return value.clone();
        };
        restore_value(cipher, value)
    }
}

fn is_sensitive_key(key: &str) -> bool {
    let lowered = key.to_ascii_lowercase();
    SENSITIVE_KEYS.contains(&lowered.as_str())
}

fn protect_value(cipher: &Aes256Gcm, value: &Value, sensitive: bool) -> Value {
    match value {
        Value::String(plain) if sensitive => encrypt_leaf(cipher, plain),
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, inner) in map {
                out.insert(
                    key.clone(),
                    protect_value(cipher, inner, sensitive || is_sensitive_key(key)),
                );
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| protect_value(cipher, item, sensitive))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn restore_value(cipher: &Aes256Gcm, value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            if map.get(ENCRYPTED_MARKER).and_then(Value::as_bool) == Some(true) {
                if let Some(plain) = decrypt_envelope(cipher, map) {
                    return Value::String(plain);
                }
                // Undecryptable envelope stays as-is rather than losing data.
                return value.clone();
            }
            let mut out = Map::new();
            for (key, inner) in map {
                out.insert(key.clone(), restore_value(cipher, inner));
            }
            Value::Object(out)
        }
        Value::Array(items) => {
            Value::Array(items.iter().map(|item| restore_value(cipher, item)).collect())
        }
        other => other.clone(),
    }
}

fn encrypt_leaf(cipher: &Aes256Gcm, plain: &str) -> Value {
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let sealed = match cipher.encrypt(&nonce, plain.as_bytes()) {
        Ok(sealed) => sealed,
        // GCM encryption of in-memory buffers cannot fail in practice;
        // if it ever does, keep the plaintext rather than corrupt the doc.
        Err(_) => return Value::String(plain.to_string()),
    };
    let (ciphertext, tag) = sealed.split_at(sealed.len() - TAG_LEN);

    let mut envelope = Map::new();
    envelope.insert(ENCRYPTED_MARKER.to_string(), Value::Bool(true));
    envelope.insert("iv".to_string(), Value::String(BASE64.encode(nonce)));
    envelope.insert(
        "ciphertext".to_string(),
        Value::String(BASE64.encode(ciphertext)),
    );
    envelope.insert("tag".to_string(), Value::String(BASE64.encode(tag)));
    Value::Object(envelope)
}

fn decrypt_envelope(cipher: &Aes256Gcm, map: &Map<String, Value>) -> Option<String> {
    let iv = BASE64.decode(map.get("iv")?.as_str()?).ok()?;
    let ciphertext = BASE64.decode(map.get("ciphertext")?.as_str()?).ok()?;
    let tag = BASE64.decode(map.get("tag")?.as_str()?).ok()?;

    if iv.len() != 12 {
        return None;
    }
    let mut sealed = ciphertext;
    sealed.extend_from_slice(&tag);
    let nonce = Nonce::from_slice(&iv);
    let plain = cipher.decrypt(nonce, sealed.as_ref()).ok()?;
    String::from_utf8(plain).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn protection() -> FieldProtection {
        FieldProtection::from_key_material("unit-test-key")
    }

    #[test]
    fn roundtrip_restores_original_document() {
        let protection = protection();
        let original = json!({
            "summary": "rotate credentials",
            "password": "hunter2",
            "nested": {"apiKey": "abcd", "count": 3},
            "list": [{"token": "t1"}, {"plain": "ok"}],
        });

        let protected = protection.protect(&original);
        assert_eq!(protection.restore(&protected), original);
    }

    #[test]
    fn sensitive_leaves_do_not_survive_in_plaintext() {
        let protection = protection();
        let original = json!({"password": "hunter2", "note": "visible"});
        let protected = protection.protect(&original);

        let rendered = protected.to_string();
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("visible"));
        assert_eq!(protected["password"][ENCRYPTED_MARKER], true);
    }

    #[test]
    fn key_matching_is_case_insensitive() {
        let protection = protection();
        let protected = protection.protect(&json!({"ApiKey": "k", "X-API-Key": "k2"}));
        assert_eq!(protected["ApiKey"][ENCRYPTED_MARKER], true);
        assert_eq!(protected["X-API-Key"][ENCRYPTED_MARKER], true);
    }

    #[test]
    fn disabled_protection_is_identity() {
        let protection = FieldProtection::disabled();
        let original = json!({"password": "hunter2"});
        assert_eq!(protection.protect(&original), original);
        assert_eq!(protection.restore(&original), original);
    }

    #[test]
    fn sensitive_subtrees_are_protected_recursively() {
        let protection = protection();
        let protected = protection.protect(&json!({"credential": {"user": "u", "pass": "p"}}));
        // Every string leaf under a sensitive key is enveloped.
        assert_eq!(protected["credential"]["user"][ENCRYPTED_MARKER], true);
        assert_eq!(protected["credential"]["pass"][ENCRYPTED_MARKER], true);
    }
}
