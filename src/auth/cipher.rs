//! Symmetric encryption for OAuth tokens at rest.
//!
//! Uses AES-256-GCM with a fresh random 96-bit nonce per call. The nonce is
//! returned alongside the ciphertext and must be stored with it.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use thiserror::Error;
use zeroize::Zeroize;

/// Length of an AES-GCM nonce in bytes.
pub const IV_LEN: usize = 12;

/// Length of an AES-256 key in bytes.
pub const KEY_LEN: usize = 32;

/// Cipher errors
#[derive(Debug, Error)]
pub enum CipherError {
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Encryption failed")]
    EncryptionFailed,

    #[error("Decryption failed - invalid ciphertext, IV, or wrong key")]
    DecryptionFailed,
}

/// Result type for cipher operations
pub type CipherResult<T> = Result<T, CipherError>;

/// Ciphertext plus the nonce it was sealed with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    pub ciphertext: Vec<u8>,
    pub iv: Vec<u8>,
}

/// AEAD cipher with an injected key.
pub struct SecretCipher {
    cipher: Aes256Gcm,
}

impl SecretCipher {
    /// Build a cipher from raw key bytes.
    pub fn new(key: &[u8]) -> CipherResult<Self> {
        if key.len() != KEY_LEN {
            return Err(CipherError::InvalidKey(format!(
                "expected {} bytes, got {}",
                KEY_LEN,
                key.len()
            )));
        }
        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|_| CipherError::InvalidKey("rejected by AES-256-GCM".to_string()))?;
        Ok(Self { cipher })
    }

    /// Build a cipher from a base64-encoded key.
    pub fn from_base64(encoded: &str) -> CipherResult<Self> {
        let mut key = BASE64
            .decode(encoded.trim())
            .map_err(|e| CipherError::InvalidKey(e.to_string()))?;
        let cipher = Self::new(&key);
        key.zeroize();
        cipher
    }

    /// Encrypt `plaintext` under a newly generated nonce.
    pub fn encrypt(&self, plaintext: &[u8]) -> CipherResult<Sealed> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| CipherError::EncryptionFailed)?;

        Ok(Sealed {
            ciphertext,
            iv: nonce.to_vec(),
        })
    }

    /// Decrypt and authenticate `ciphertext` sealed under `iv`.
    pub fn decrypt(&self, ciphertext: &[u8], iv: &[u8]) -> CipherResult<Vec<u8>> {
        if iv.len() != IV_LEN {
            return Err(CipherError::DecryptionFailed);
        }
        let nonce = Nonce::from_slice(iv);
        self.cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| CipherError::DecryptionFailed)
    }

    /// Encrypt a UTF-8 secret.
    pub fn encrypt_str(&self, secret: &str) -> CipherResult<Sealed> {
        self.encrypt(secret.as_bytes())
    }

    /// Decrypt into a UTF-8 string. Non-UTF-8 plaintext counts as a failed decrypt.
    pub fn decrypt_str(&self, ciphertext: &[u8], iv: &[u8]) -> CipherResult<String> {
        let plaintext = self.decrypt(ciphertext, iv)?;
        String::from_utf8(plaintext).map_err(|e| {
            let mut bytes = e.into_bytes();
            bytes.zeroize();
            CipherError::DecryptionFailed
        })
    }
}

impl std::fmt::Debug for SecretCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretCipher").finish_non_exhaustive()
    }
}

/// Generate a random key, base64 encoded. Used by tests and key bootstrap.
pub fn generate_key_base64() -> String {
    use rand::RngCore;

    let mut key = [0u8; KEY_LEN];
    rand::rngs::OsRng.fill_bytes(&mut key);
    let encoded = BASE64.encode(key);
    key.zeroize();
    encoded
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn cipher() -> SecretCipher {
        SecretCipher::from_base64(&generate_key_base64()).unwrap()
    }

    #[test]
    fn test_roundtrip_empty() {
        let c = cipher();
        let sealed = c.encrypt(b"").unwrap();
        assert_eq!(c.decrypt(&sealed.ciphertext, &sealed.iv).unwrap(), b"");
    }

    #[test]
    fn test_fresh_iv_per_call() {
        let c = cipher();
        let a = c.encrypt(b"same plaintext").unwrap();
        let b = c.encrypt(b"same plaintext").unwrap();
        assert_eq!(a.iv.len(), IV_LEN);
        assert_ne!(a.iv, b.iv);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn test_wrong_key_fails() {
        let sealed = cipher().encrypt(b"access-token").unwrap();
        let other = cipher();
        assert!(matches!(
            other.decrypt(&sealed.ciphertext, &sealed.iv),
            Err(CipherError::DecryptionFailed)
        ));
    }

    #[test]
    fn test_flipped_iv_fails() {
        let c = cipher();
        let mut sealed = c.encrypt(b"access-token").unwrap();
        sealed.iv[0] ^= 0x01;
        assert!(c.decrypt(&sealed.ciphertext, &sealed.iv).is_err());
    }

    #[test]
    fn test_flipped_ciphertext_fails() {
        let c = cipher();
        let mut sealed = c.encrypt(b"access-token").unwrap();
        let last = sealed.ciphertext.len() - 1;
        sealed.ciphertext[last] ^= 0x80;
        assert!(c.decrypt(&sealed.ciphertext, &sealed.iv).is_err());
    }

    #[test]
    fn test_short_iv_rejected() {
        let c = cipher();
        let sealed = c.encrypt(b"x").unwrap();
        assert!(c.decrypt(&sealed.ciphertext, &sealed.iv[..8]).is_err());
    }

    #[test]
    fn test_bad_key_length() {
        assert!(matches!(
            SecretCipher::new(&[0u8; 16]),
            Err(CipherError::InvalidKey(_))
        ));
        assert!(SecretCipher::from_base64("not base64!").is_err());
    }

    proptest! {
        #[test]
        fn prop_decrypt_inverts_encrypt(data in proptest::collection::vec(any::<u8>(), 0..512)) {
            let c = cipher();
            let sealed = c.encrypt(&data).unwrap();
            prop_assert_eq!(c.decrypt(&sealed.ciphertext, &sealed.iv).unwrap(), data);
        }
    }
}
