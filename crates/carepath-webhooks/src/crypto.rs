//! Cryptographic operations for webhook secrets and payload signing.
//!
//! - AES-256-GCM encryption/decryption for subscription secrets at rest
//! - HMAC-SHA256 signatures over the exact request body bytes
//! - Signing secret generation from the OS CSPRNG

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;

use crate::error::WebhookError;

/// Nonce size for AES-GCM (96 bits / 12 bytes).
const NONCE_SIZE: usize = 12;

/// Required length of the secret encryption key.
pub const ENCRYPTION_KEY_LEN: usize = 32;

/// Prefix of generated signing secrets.
pub const SECRET_PREFIX: &str = "whsec_";

/// Prefix of the signature header value.
pub const SIGNATURE_PREFIX: &str = "sha256=";

type HmacSha256 = Hmac<Sha256>;

// ---------------------------------------------------------------------------
// AES-256-GCM encryption/decryption (for secrets at rest)
// ---------------------------------------------------------------------------

fn cipher(key: &[u8]) -> Result<Aes256Gcm, WebhookError> {
    if key.len() != ENCRYPTION_KEY_LEN {
        return Err(WebhookError::EncryptionFailed(format!(
            "Invalid key length: expected {ENCRYPTION_KEY_LEN} bytes, got {}",
            key.len()
        )));
    }
    Aes256Gcm::new_from_slice(key).map_err(|e| WebhookError::EncryptionFailed(e.to_string()))
}

/// Encrypt a plaintext secret to a base64-encoded string for storage.
///
/// Format: base64(nonce || ciphertext || auth_tag)
pub fn encrypt_secret(plaintext: &str, key: &[u8]) -> Result<String, WebhookError> {
    let cipher = cipher(key)?;

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext.as_bytes())
        .map_err(|e| WebhookError::EncryptionFailed(e.to_string()))?;

    let mut result = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    result.extend_from_slice(&nonce_bytes);
    result.extend_from_slice(&ciphertext);

    Ok(BASE64.encode(&result))
}

/// Decrypt a base64-encoded secret from storage back to plaintext.
pub fn decrypt_secret(encoded: &str, key: &[u8]) -> Result<String, WebhookError> {
    let cipher = cipher(key)?;

    let encrypted = BASE64
        .decode(encoded)
        .map_err(|e| WebhookError::EncryptionFailed(format!("Base64 decode failed: {e}")))?;

    if encrypted.len() < NONCE_SIZE + 1 {
        return Err(WebhookError::EncryptionFailed(
            "Invalid encrypted data format".to_string(),
        ));
    }

    let nonce = Nonce::from_slice(&encrypted[..NONCE_SIZE]);
    let plaintext = cipher
        .decrypt(nonce, &encrypted[NONCE_SIZE..])
        .map_err(|e| WebhookError::EncryptionFailed(e.to_string()))?;

    String::from_utf8(plaintext).map_err(|e| WebhookError::EncryptionFailed(e.to_string()))
}

/// Decode a hex-encoded 32-byte encryption key.
pub fn parse_encryption_key(hex_key: &str) -> Result<Vec<u8>, WebhookError> {
    let key = hex::decode(hex_key.trim())
        .map_err(|e| WebhookError::EncryptionFailed(format!("Key is not valid hex: {e}")))?;
    if key.len() != ENCRYPTION_KEY_LEN {
        return Err(WebhookError::EncryptionFailed(format!(
            "Invalid key length: expected {ENCRYPTION_KEY_LEN} bytes, got {}",
            key.len()
        )));
    }
    Ok(key)
}

// ---------------------------------------------------------------------------
// Secret generation
// ---------------------------------------------------------------------------

/// Generate a fresh signing secret: `whsec_` followed by 32 random bytes in hex.
pub fn generate_secret() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    format!("{SECRET_PREFIX}{}", hex::encode(bytes))
}

// ---------------------------------------------------------------------------
// HMAC-SHA256 payload signing
// ---------------------------------------------------------------------------

/// Compute the HMAC-SHA256 signature of `body` keyed by `secret`.
///
/// Returns the lowercase hex digest. The same inputs always yield the same
/// signature, so a retried delivery can be verified exactly like the first
/// attempt.
pub fn sign_payload(secret: &str, body: &[u8]) -> String {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Header value carrying the signature: `sha256=<hex>`.
pub fn signature_header_value(secret: &str, body: &[u8]) -> String {
    format!("{SIGNATURE_PREFIX}{}", sign_payload(secret, body))
}

/// Verify a signature using constant-time comparison.
///
/// Accepts the bare hex digest or the `sha256=` header form.
pub fn verify_signature(expected: &str, secret: &str, body: &[u8]) -> bool {
    let expected_hex = expected.strip_prefix(SIGNATURE_PREFIX).unwrap_or(expected);
    let computed = sign_payload(secret, body);
    constant_time_eq(expected_hex.as_bytes(), computed.as_bytes())
}

/// SECURITY: Uses the `subtle` crate for proper constant-time comparison.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    use subtle::ConstantTimeEq;
    a.ct_eq(b).into()
}
