//! At-rest encryption for stored OAuth tokens.

use crate::errors::{AppError, AppResult};
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine;

const KEYRING_SERVICE: &str = "pnl-sheets-sync";
const KEYRING_KEY_ENTRY: &str = "token-encryption-key";
const CIPHERTEXT_PREFIX: &str = "enc:v1:";

#[derive(Clone)]
pub struct TokenCipher {
    key: [u8; 32],
}

impl std::fmt::Debug for TokenCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCipher").field("key", &"[REDACTED]").finish()
    }
}

impl TokenCipher {
    pub fn from_key(key: [u8; 32]) -> Self {
        Self { key }
    }

    pub fn from_base64(encoded: &str) -> AppResult<Self> {
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|error| AppError::Invalid(format!("token encryption key is not base64: {error}")))?;
        if decoded.len() != 32 {
            return Err(AppError::Invalid(format!(
                "token encryption key must be 32 bytes, got {}",
                decoded.len()
            )));
        }
        let mut key = [0u8; 32];
        key.copy_from_slice(&decoded);
        Ok(Self { key })
    }

    /// Uses the configured key when present, otherwise the key held in the OS
    /// keyring, generating and storing one on first use. Without a durable
    /// keyring backend a configured key is mandatory: a key generated into
    /// keyring's in-memory store would be gone after a restart, and every
    /// stored token with it.
    pub fn load_or_create(configured: Option<&str>) -> AppResult<Self> {
        if let Some(encoded) = configured {
            return Self::from_base64(encoded);
        }
        if !cfg!(feature = "native-keyring") {
            return Err(AppError::Invalid(
                "TOKEN_ENCRYPTION_KEY must be set when built without the native-keyring feature".to_string(),
            ));
        }
        Self::from_keyring()
    }

    fn from_keyring() -> AppResult<Self> {
        let entry = keyring::Entry::new(KEYRING_SERVICE, KEYRING_KEY_ENTRY)
            .map_err(|error| AppError::Io(error.to_string()))?;

        match entry.get_password() {
            Ok(value) => {
                return Self::from_base64(&value).map_err(|error| {
                    AppError::Invalid(format!(
                        "token encryption key in the OS keyring is unusable: {}",
                        error.message()
                    ))
                });
            }
            Err(keyring::Error::NoEntry) => {}
            Err(error) => return Err(AppError::Io(format!("OS keyring unavailable: {error}"))),
        }

        let key: [u8; 32] = rand::random();
        let encoded = base64::engine::general_purpose::STANDARD.encode(key);
        entry
            .set_password(&encoded)
            .map_err(|error| AppError::Io(error.to_string()))?;
        tracing::info!("generated token encryption key in OS keyring");
        Ok(Self { key })
    }

    pub fn encrypt(&self, plaintext: &str) -> AppResult<String> {
        let cipher =
            Aes256Gcm::new_from_slice(&self.key).map_err(|error| AppError::Internal(error.to_string()))?;
        let nonce_bytes: [u8; 12] = rand::random();
        let nonce = Nonce::from_slice(&nonce_bytes);
        let encrypted = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|error| AppError::Internal(error.to_string()))?;

        let engine = base64::engine::general_purpose::STANDARD;
        Ok(format!(
            "{}{}:{}",
            CIPHERTEXT_PREFIX,
            engine.encode(nonce_bytes),
            engine.encode(encrypted)
        ))
    }

    pub fn decrypt(&self, stored: &str) -> AppResult<String> {
        let body = stored
            .strip_prefix(CIPHERTEXT_PREFIX)
            .ok_or_else(|| AppError::Internal("stored token is not encrypted".to_string()))?;
        let (nonce_b64, ciphertext_b64) = body
            .split_once(':')
            .ok_or_else(|| AppError::Internal("stored token envelope is malformed".to_string()))?;

        let engine = base64::engine::general_purpose::STANDARD;
        let nonce_bytes = engine
            .decode(nonce_b64)
            .map_err(|error| AppError::Internal(error.to_string()))?;
        if nonce_bytes.len() != 12 {
            return Err(AppError::Internal("stored token nonce has wrong length".to_string()));
        }
        let ciphertext = engine
            .decode(ciphertext_b64)
            .map_err(|error| AppError::Internal(error.to_string()))?;

        let cipher =
            Aes256Gcm::new_from_slice(&self.key).map_err(|error| AppError::Internal(error.to_string()))?;
        let plaintext = cipher
            .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_ref())
            .map_err(|_| AppError::Internal("stored token could not be decrypted with the current key".to_string()))?;
        String::from_utf8(plaintext).map_err(|error| AppError::Internal(error.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::TokenCipher;
    use base64::Engine;

    #[test]
    fn encrypted_tokens_do_not_contain_plaintext() {
        let cipher = TokenCipher::from_key([7u8; 32]);
        let sealed = cipher.encrypt("ya29.secret-access-token").expect("encrypt");
        assert!(sealed.starts_with("enc:v1:"));
        assert!(!sealed.contains("secret-access-token"));
        assert_eq!(cipher.decrypt(&sealed).expect("decrypt"), "ya29.secret-access-token");
    }

    #[test]
    fn nonces_differ_between_encryptions() {
        let cipher = TokenCipher::from_key([1u8; 32]);
        let first = cipher.encrypt("same").expect("encrypt");
        let second = cipher.encrypt("same").expect("encrypt");
        assert_ne!(first, second);
    }

    #[test]
    fn wrong_key_fails_to_decrypt() {
        let sealed = TokenCipher::from_key([1u8; 32]).encrypt("token").expect("encrypt");
        let result = TokenCipher::from_key([2u8; 32]).decrypt(&sealed);
        assert!(result.is_err());
    }

    #[test]
    fn configured_key_must_be_32_bytes() {
        let short = base64::engine::general_purpose::STANDARD.encode([0u8; 16]);
        assert!(TokenCipher::from_base64(&short).is_err());
        let full = base64::engine::general_purpose::STANDARD.encode([0u8; 32]);
        assert!(TokenCipher::load_or_create(Some(&full)).is_ok());
    }

    #[cfg(not(feature = "native-keyring"))]
    #[test]
    fn missing_key_without_durable_keyring_is_a_startup_error() {
        let first = TokenCipher::load_or_create(None);
        let second = TokenCipher::load_or_create(None);
        assert!(matches!(first, Err(crate::errors::AppError::Invalid(_))));
        assert!(matches!(second, Err(crate::errors::AppError::Invalid(_))));
    }

    #[test]
    fn configured_key_is_stable_across_loads() {
        let encoded = base64::engine::general_purpose::STANDARD.encode([4u8; 32]);
        let sealed = TokenCipher::load_or_create(Some(&encoded))
            .expect("first load")
            .encrypt("1//refresh")
            .expect("encrypt");
        let reopened = TokenCipher::load_or_create(Some(&encoded)).expect("second load");
        assert_eq!(reopened.decrypt(&sealed).expect("decrypt"), "1//refresh");
    }
}
