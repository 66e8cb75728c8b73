//! Authenticated encryption at rest for token material.
//!
//! Uses XChaCha20-Poly1305 (the AEAD already in this stack's dependency
//! tree) as the "equivalent authenticated cipher" to AES-GCM-256: a
//! 256-bit key, a 192-bit random nonce per encryption (wide enough that
//! nonce collision across the lifetime of a key is not a practical
//! concern, unlike the 96-bit nonce in plain ChaCha20-Poly1305/AES-GCM).

use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("invalid encryption key: {0}")]
    InvalidKey(String),
    #[error("ciphertext rejected: authentication failed")]
    Decrypt,
}

pub struct Cipher {
    cipher: XChaCha20Poly1305,
}

impl Cipher {
    /// `key_hex` must decode to exactly 32 bytes.
    pub fn from_hex_key(key_hex: &str) -> Result<Self, CryptoError> {
        let bytes = hex::decode(key_hex.trim())
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        if bytes.len() != 32 {
            return Err(CryptoError::InvalidKey(format!(
                "expected 32 bytes, got {}",
                bytes.len()
            )));
        }
        let cipher = XChaCha20Poly1305::new_from_slice(&bytes)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        Ok(Self { cipher })
    }

    /// Returns `nonce || ciphertext`, hex-encoded, ready to store as-is.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| CryptoError::Decrypt)?;
        let mut combined = nonce.to_vec();
        combined.extend_from_slice(&ciphertext);
        Ok(hex::encode(combined))
    }

    pub fn decrypt(&self, stored: &str) -> Result<String, CryptoError> {
        let raw = hex::decode(stored).map_err(|_| CryptoError::Decrypt)?;
        if raw.len() < 24 {
            return Err(CryptoError::Decrypt);
        }
        let (nonce_bytes, ciphertext) = raw.split_at(24);
        let nonce = XNonce::from_slice(nonce_bytes);
        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| CryptoError::Decrypt)?;
        String::from_utf8(plaintext).map_err(|_| CryptoError::Decrypt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> String {
        hex::encode([7u8; 32])
    }

    #[test]
    fn round_trips() {
        let cipher = Cipher::from_hex_key(&test_key()).unwrap();
        let ciphertext = cipher.encrypt("super-secret-token").unwrap();
        assert_ne!(ciphertext, "super-secret-token");
        let plaintext = cipher.decrypt(&ciphertext).unwrap();
        assert_eq!(plaintext, "super-secret-token");
    }

    #[test]
    fn rejects_tampered_ciphertext() {
        let cipher = Cipher::from_hex_key(&test_key()).unwrap();
        let mut ciphertext = cipher.encrypt("token").unwrap();
        ciphertext.push_str("00");
        assert!(cipher.decrypt(&ciphertext).is_err());
    }

    #[test]
    fn rejects_short_key() {
        assert!(Cipher::from_hex_key("aabbcc").is_err());
    }

    #[test]
    fn two_encryptions_of_same_plaintext_differ() {
        let cipher = Cipher::from_hex_key(&test_key()).unwrap();
        let a = cipher.encrypt("token").unwrap();
        let b = cipher.encrypt("token").unwrap();
        assert_ne!(a, b);
    }
}
