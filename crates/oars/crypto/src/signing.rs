//! Ed25519 keypair wrapper with PEM encoding.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use ed25519_dalek::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey};
use pkcs8::LineEnding;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SigningError {
    #[error("key encoding failed: {0}")]
    Encoding(String),

    #[error("key decoding failed: {0}")]
    Decoding(String),

    #[error("signature is not valid base64: {0}")]
    SignatureFormat(String),
}

/// An Ed25519 keypair held in process memory; private material never
/// leaves this type except as PKCS#8 PEM for the key store document.
pub struct Ed25519Keypair {
    signing_key: SigningKey,
}

impl Ed25519Keypair {
    /// Generate a fresh keypair from the OS RNG.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    pub fn from_private_pem(pem: &str) -> Result<Self, SigningError> {
        let signing_key = SigningKey::from_pkcs8_pem(pem)
            .map_err(|e| SigningError::Decoding(e.to_string()))?;
        Ok(Self { signing_key })
    }

    pub fn private_pem(&self) -> Result<String, SigningError> {
        self.signing_key
            .to_pkcs8_pem(LineEnding::LF)
            .map(|pem| pem.to_string())
            .map_err(|e| SigningError::Encoding(e.to_string()))
    }

    pub fn public_pem(&self) -> Result<String, SigningError> {
        self.signing_key
            .verifying_key()
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| SigningError::Encoding(e.to_string()))
    }

    /// Detached signature over `data`, base64-encoded.
    pub fn sign_base64(&self, data: &[u8]) -> String {
        BASE64.encode(self.signing_key.sign(data).to_bytes())
    }

    /// Verify a base64 signature against this keypair's public key.
    pub fn verify_base64(&self, data: &[u8], signature_b64: &str) -> bool {
        verify_with_public_key(&self.signing_key.verifying_key(), data, signature_b64)
    }
}

/// Verify a base64 signature with a SPKI PEM public key. Malformed key or
/// signature material verifies false rather than erroring.
pub fn verify_with_public_pem(public_pem: &str, data: &[u8], signature_b64: &str) -> bool {
    match VerifyingKey::from_public_key_pem(public_pem) {
        Ok(key) => verify_with_public_key(&key, data, signature_b64),
        Err(_) => false,
    }
}

fn verify_with_public_key(key: &VerifyingKey, data: &[u8], signature_b64: &str) -> bool {
    let Ok(decoded) = BASE64.decode(signature_b64) else {
        return false;
    };
    let Ok(sig_bytes) = <[u8; 64]>::try_from(decoded.as_slice()) else {
        return false;
    };
    key.verify(data, &Signature::from_bytes(&sig_bytes)).is_ok()
}
