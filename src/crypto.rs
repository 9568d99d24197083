//! Sealing of RCON credentials at rest.
//!
//! Passwords are AES-256-GCM encrypted under a 32-byte master key supplied
//! as base64 in `ENCRYPTION_KEY`. The stored form is a base64-wrapped JSON
//! envelope `{algorithm, iv, data, authTag}` so the pieces stay inspectable
//! by admin tooling.

use aes_gcm::aead::{Aead, AeadCore, OsRng};
use aes_gcm::{Aes256Gcm, Key, KeyInit, Nonce};
use base64::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const ALGORITHM: &str = "aes-256-gcm";
const TAG_LEN: usize = 16;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid encryption key: {0}")]
    InvalidKey(String),

    #[error("sealed credential is malformed: {0}")]
    Malformed(String),

    #[error("credential decryption failed")]
    Decrypt,
}

#[derive(Deserialize, Serialize)]
struct SealedBlob {
    algorithm: String,
    iv: String,
    data: String,
    #[serde(rename = "authTag")]
    auth_tag: String,
}

pub struct CredentialCipher {
    cipher: Aes256Gcm,
}

impl CredentialCipher {
    pub fn from_base64_key(key_b64: &str) -> Result<Self, CryptoError> {
        let bytes = BASE64_STANDARD
            .decode(key_b64.trim())
            .map_err(|err| CryptoError::InvalidKey(err.to_string()))?;

        if bytes.len() != 32 {
            return Err(CryptoError::InvalidKey(format!(
                "expected 32 key bytes, got {}",
                bytes.len()
            )));
        }

        let key = Key::<Aes256Gcm>::from_slice(&bytes);
        Ok(Self {
            cipher: Aes256Gcm::new(key),
        })
    }

    /// Reads `ENCRYPTION_KEY`; absent means credentials stay sealed and the
    /// scraper skips servers that need them.
    pub fn from_env() -> Result<Option<Self>, CryptoError> {
        match std::env::var("ENCRYPTION_KEY") {
            Ok(key) => Self::from_base64_key(&key).map(Some),
            Err(_) => Ok(None),
        }
    }

    pub fn seal(&self, plaintext: &str) -> Result<String, CryptoError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let sealed = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| CryptoError::Decrypt)?;

        let (data, tag) = sealed.split_at(sealed.len() - TAG_LEN);
        let blob = SealedBlob {
            algorithm: ALGORITHM.to_string(),
            iv: BASE64_STANDARD.encode(nonce),
            data: BASE64_STANDARD.encode(data),
            auth_tag: BASE64_STANDARD.encode(tag),
        };

        let json =
            serde_json::to_vec(&blob).map_err(|err| CryptoError::Malformed(err.to_string()))?;
        Ok(BASE64_STANDARD.encode(json))
    }

    pub fn open(&self, sealed: &str) -> Result<String, CryptoError> {
        let json = BASE64_STANDARD
            .decode(sealed.trim())
            .map_err(|err| CryptoError::Malformed(err.to_string()))?;
        let blob: SealedBlob =
            serde_json::from_slice(&json).map_err(|err| CryptoError::Malformed(err.to_string()))?;

        if blob.algorithm != ALGORITHM {
            return Err(CryptoError::Malformed(format!(
                "unsupported algorithm {}",
                blob.algorithm
            )));
        }

        let iv = BASE64_STANDARD
            .decode(&blob.iv)
            .map_err(|err| CryptoError::Malformed(err.to_string()))?;
        let mut payload = BASE64_STANDARD
            .decode(&blob.data)
            .map_err(|err| CryptoError::Malformed(err.to_string()))?;
        let tag = BASE64_STANDARD
            .decode(&blob.auth_tag)
            .map_err(|err| CryptoError::Malformed(err.to_string()))?;

        if iv.len() != 12 || tag.len() != TAG_LEN {
            return Err(CryptoError::Malformed("bad iv or tag length".to_string()));
        }

        payload.extend_from_slice(&tag);

        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(&iv), payload.as_slice())
            .map_err(|_| CryptoError::Decrypt)?;

        String::from_utf8(plaintext).map_err(|err| CryptoError::Malformed(err.to_string()))
    }
}
