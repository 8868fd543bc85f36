//! AES-256-GCM sealing for credential blobs.
//!
//! A LinkedAccount's `security_credentials` JSON is sealed before it touches
//! SQLite. Each seal uses a fresh random nonce; the stored value is
//! `base64(nonce || ciphertext)` so a row is self-contained. The master key is
//! held in memory only, loaded from configuration.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

/// Master key size in bytes (256 bits).
const KEY_SIZE: usize = 32;

/// GCM nonce size in bytes (96 bits).
const NONCE_SIZE: usize = 12;

/// Decode and validate a base64-encoded master key.
pub fn validate_key(key_base64: &str) -> Result<Vec<u8>> {
    let key_bytes = BASE64
        .decode(key_base64)
        .context("Failed to decode base64 encryption key")?;

    if key_bytes.len() != KEY_SIZE {
        return Err(anyhow!(
            "Encryption key must be {} bytes (256 bits), got {}",
            KEY_SIZE,
            key_bytes.len()
        ));
    }

    Ok(key_bytes)
}

/// Seal plaintext into a self-contained base64 blob.
pub fn seal(plaintext: &str, key: &[u8]) -> Result<String> {
    if key.len() != KEY_SIZE {
        return Err(anyhow!("Encryption key must be {} bytes", KEY_SIZE));
    }

    let cipher =
        Aes256Gcm::new_from_slice(key).map_err(|e| anyhow!("Failed to create cipher: {}", e))?;

    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext.as_bytes())
        .map_err(|e| anyhow!("Encryption failed: {}", e))?;

    let mut framed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    framed.extend_from_slice(&nonce);
    framed.extend_from_slice(&ciphertext);

    Ok(BASE64.encode(framed))
}

/// Open a sealed blob produced by [`seal`].
///
/// Fails on a wrong key, a truncated blob, or any tampering (GCM is
/// authenticated).
pub fn open(sealed: &str, key: &[u8]) -> Result<String> {
    if key.len() != KEY_SIZE {
        return Err(anyhow!("Encryption key must be {} bytes", KEY_SIZE));
    }

    let framed = BASE64.decode(sealed).context("Failed to decode sealed blob")?;
    if framed.len() <= NONCE_SIZE {
        return Err(anyhow!(
            "Sealed blob too short: {} bytes, need more than {}",
            framed.len(),
            NONCE_SIZE
        ));
    }

    let (nonce_bytes, ciphertext) = framed.split_at(NONCE_SIZE);
    let cipher =
        Aes256Gcm::new_from_slice(key).map_err(|e| anyhow!("Failed to create cipher: {}", e))?;

    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|e| anyhow!("Decryption failed (wrong key or tampered data): {}", e))?;

    String::from_utf8(plaintext).context("Decrypted data is not valid UTF-8")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_key() {
        assert!(validate_key(&BASE64.encode([0u8; 32])).is_ok());
        assert!(validate_key(&BASE64.encode([0u8; 16])).is_err());
        assert!(validate_key(&BASE64.encode([0u8; 64])).is_err());
        assert!(validate_key("not-valid-base64!@#$").is_err());
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let key = [7u8; 32];
        let plaintext = r#"{"access_token":"tok_123","refresh_token":"r_456"}"#;

        let sealed = seal(plaintext, &key).unwrap();
        assert_ne!(sealed, plaintext);
        assert_eq!(open(&sealed, &key).unwrap(), plaintext);
    }

    #[test]
    fn test_fresh_nonce_per_seal() {
        let key = [7u8; 32];
        let sealed1 = seal("same", &key).unwrap();
        let sealed2 = seal("same", &key).unwrap();
        assert_ne!(sealed1, sealed2);
        assert_eq!(open(&sealed1, &key).unwrap(), "same");
        assert_eq!(open(&sealed2, &key).unwrap(), "same");
    }

    #[test]
    fn test_wrong_key_fails() {
        let sealed = seal("secret", &[1u8; 32]).unwrap();
        assert!(open(&sealed, &[2u8; 32]).is_err());
    }

    #[test]
    fn test_tampered_blob_fails() {
        let key = [7u8; 32];
        let sealed = seal("secret", &key).unwrap();

        let mut bytes = BASE64.decode(&sealed).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        let tampered = BASE64.encode(bytes);

        assert!(open(&tampered, &key).is_err());
    }

    #[test]
    fn test_truncated_blob_fails() {
        let key = [7u8; 32];
        assert!(open(&BASE64.encode([0u8; 8]), &key).is_err());
    }
}
