//! AES-256-GCM envelope used to deliver provider API keys to the execution
//! plane on `init` (spec §6.3).
//!
//! The gateway never persists the plaintext keys nor sends them in clear
//! over the WebSocket. Instead it derives a key from the same bearer token
//! the execution plane already holds (domain-separated with a fixed AAD),
//! so only a holder of that token can decrypt the envelope.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

const NONCE_SIZE: usize = 12;

/// Domain-separation string mixed into the key derivation, fixed per the
/// wire contract (not configurable — changing it breaks every execution
/// plane that derives the same key independently).
const INIT_API_KEYS_AAD: &str = "semibot:init:api_keys";

/// `{alg, iv, tag, ciphertext}` envelope sent inside `init` frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretEnvelope {
    pub alg: String,
    pub iv: String,
    pub tag: String,
    pub ciphertext: String,
}

/// Derive the 32-byte key the execution plane can reproduce from its own
/// bearer token: SHA-256 of the token concatenated with the fixed AAD.
#[must_use]
pub fn derive_init_key(bearer_token: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(bearer_token.as_bytes());
    hasher.update(INIT_API_KEYS_AAD.as_bytes());
    hasher.finalize().into()
}

/// Encrypt one provider API key for delivery in an `init` frame.
///
/// # Errors
///
/// Returns an error if AES-GCM encryption fails (should not happen for a
/// well-formed key).
pub fn encrypt_secret(key: &[u8; 32], plaintext: &[u8]) -> Result<SecretEnvelope> {
    let cipher = Aes256Gcm::new_from_slice(key).expect("valid key length");

    let mut iv_bytes = [0u8; NONCE_SIZE];
    rand::rng().fill_bytes(&mut iv_bytes);
    let nonce = Nonce::from_slice(&iv_bytes);

    let mut sealed = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| anyhow::anyhow!("encryption failed: {e}"))?;
    // aes-gcm appends the 16-byte authentication tag to the ciphertext;
    // the wire envelope carries it as its own field.
    let tag = sealed.split_off(sealed.len() - 16);

    Ok(SecretEnvelope {
        alg: "aes-256-gcm".to_string(),
        iv: BASE64.encode(iv_bytes),
        tag: BASE64.encode(tag),
        ciphertext: BASE64.encode(sealed),
    })
}

/// Decrypt a [`SecretEnvelope`]. Exposed for tests and for any future
/// tooling that needs to verify what was sent; the execution plane is the
/// normal consumer of this shape.
///
/// # Errors
///
/// Returns an error if the envelope fields are not valid base64, the
/// algorithm tag doesn't match, or decryption/authentication fails.
pub fn decrypt_secret(key: &[u8; 32], envelope: &SecretEnvelope) -> Result<Vec<u8>> {
    anyhow::ensure!(envelope.alg == "aes-256-gcm", "unsupported alg: {}", envelope.alg);

    let cipher = Aes256Gcm::new_from_slice(key).expect("valid key length");
    let iv_bytes = BASE64.decode(&envelope.iv).context("invalid iv encoding")?;
    let nonce = Nonce::from_slice(&iv_bytes);

    let mut sealed = BASE64
        .decode(&envelope.ciphertext)
        .context("invalid ciphertext encoding")?;
    let tag = BASE64.decode(&envelope.tag).context("invalid tag encoding")?;
    sealed.extend_from_slice(&tag);

    cipher
        .decrypt(nonce, sealed.as_ref())
        .map_err(|e| anyhow::anyhow!("decryption failed: {e}"))
}
