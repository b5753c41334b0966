//! SecretBox: at-rest encryption for env-var values and SSH private keys
//!
//! AES-256-GCM keyed by SHA-256 of the configured root secret under a fixed
//! domain-separation label. Stored form is `base64(nonce || ciphertext || tag)`
//! with a 96-bit random nonce per encryption. Changing the root secret
//! invalidates all existing ciphertexts; rotation is not supported.

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::errors::{PloyerError, Result};

const NONCE_SIZE: usize = 12;
const KEY_LABEL: &[u8] = b"ployer.secretbox.v1";

#[derive(Clone)]
pub struct SecretBox {
    key: [u8; 32],
}

impl SecretBox {
    /// Derive the box key from the process-wide root secret.
    pub fn from_root_secret(root: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(KEY_LABEL);
        hasher.update(root.as_bytes());
        let digest = hasher.finalize();

        let mut key = [0u8; 32];
        key.copy_from_slice(&digest);
        Self { key }
    }

    /// Encrypt a plaintext string. Each call uses a fresh random nonce, so
    /// encrypting the same value twice yields different ciphertexts.
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let cipher = Aes256Gcm::new((&self.key).into());

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| PloyerError::Crypto(format!("encryption failed: {}", e)))?;

        let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);

        Ok(BASE64.encode(sealed))
    }

    /// Decrypt a stored ciphertext. Fails closed on any tampering: a wrong
    /// tag, truncated data or bad encoding all return `Crypto`.
    pub fn decrypt(&self, sealed_b64: &str) -> Result<String> {
        let sealed = BASE64
            .decode(sealed_b64)
            .map_err(|e| PloyerError::Crypto(format!("invalid base64: {}", e)))?;

        if sealed.len() < NONCE_SIZE {
            return Err(PloyerError::Crypto("ciphertext too short".to_string()));
        }

        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);

        let cipher = Aes256Gcm::new((&self.key).into());
        let plaintext = cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| PloyerError::Crypto("decryption failed".to_string()))?;

        String::from_utf8(plaintext)
            .map_err(|e| PloyerError::Crypto(format!("invalid UTF-8: {}", e)))
    }
}

impl std::fmt::Debug for SecretBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print key material
        f.debug_struct("SecretBox").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let secrets = SecretBox::from_root_secret("root");
        let sealed = secrets.encrypt("DATABASE_URL=postgres://x").unwrap();
        assert_eq!(secrets.decrypt(&sealed).unwrap(), "DATABASE_URL=postgres://x");
    }

    #[test]
    fn test_nonce_uniqueness() {
        let secrets = SecretBox::from_root_secret("root");
        let a = secrets.encrypt("same").unwrap();
        let b = secrets.encrypt("same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_wrong_root_secret_fails() {
        let sealed = SecretBox::from_root_secret("one").encrypt("v").unwrap();
        let result = SecretBox::from_root_secret("two").decrypt(&sealed);
        assert!(matches!(result, Err(PloyerError::Crypto(_))));
    }
}
