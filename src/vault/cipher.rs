use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use rand::RngCore;
use thiserror::Error;
use zeroize::Zeroize;

use crate::models::token::SessionToken;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

#[derive(Debug, Error)]
pub enum DecryptionError {
    #[error("ciphertext too short ({0} bytes)")]
    Truncated(usize),

    #[error("authentication failed (wrong key or corrupted payload)")]
    Authentication,

    #[error("decrypted payload is not valid UTF-8")]
    NotUtf8,

    #[error("decrypted payload is not a well-formed token")]
    Malformed,
}

/// AES-256-GCM over a single process-wide key.
///
/// Blob layout: `nonce (12 bytes) || ciphertext || tag (16 bytes)`. A fresh
/// nonce is drawn for every call, so encrypting the same token twice never
/// yields the same bytes.
pub struct TokenCipher {
    key: [u8; 32],
}

impl TokenCipher {
    pub fn new(key_hex: &str) -> anyhow::Result<Self> {
        let key = parse_key(key_hex)?;
        Ok(Self { key })
    }

    pub fn encrypt(&self, token: &SessionToken) -> anyhow::Result<Vec<u8>> {
        let cipher = Aes256Gcm::new_from_slice(&self.key)
            .map_err(|e| anyhow::anyhow!("invalid key length: {:?}", e))?;
        let nonce_bytes = generate_nonce();
        let nonce = Nonce::from_slice(&nonce_bytes);
        let sealed = cipher
            .encrypt(nonce, token.expose().as_bytes())
            .map_err(|e| anyhow::anyhow!("token encryption failed: {}", e))?;

        let mut blob = Vec::with_capacity(NONCE_LEN + sealed.len());
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&sealed);
        Ok(blob)
    }

    /// Decrypt a stored blob back into a token.
    ///
    /// The result is re-validated, so a blob that decrypts to something other
    /// than a well-formed token is reported rather than dispatched.
    pub fn decrypt(&self, blob: &[u8]) -> Result<SessionToken, DecryptionError> {
        if blob.len() < NONCE_LEN + TAG_LEN {
            return Err(DecryptionError::Truncated(blob.len()));
        }
        let (nonce_bytes, sealed) = blob.split_at(NONCE_LEN);
        let cipher =
            Aes256Gcm::new_from_slice(&self.key).map_err(|_| DecryptionError::Authentication)?;
        let mut plaintext = cipher
            .decrypt(Nonce::from_slice(nonce_bytes), sealed)
            .map_err(|_| DecryptionError::Authentication)?;

        let result = match std::str::from_utf8(&plaintext) {
            Ok(s) => SessionToken::parse(Some(s)).map_err(|_| DecryptionError::Malformed),
            Err(_) => Err(DecryptionError::NotUtf8),
        };
        plaintext.zeroize();
        result
    }
}

impl Drop for TokenCipher {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

fn generate_nonce() -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

/// Parse `ENCRYPTION_KEY`: exactly 64 hex characters (32 bytes).
pub fn parse_key(hex: &str) -> anyhow::Result<[u8; 32]> {
    if hex.len() != 64 {
        anyhow::bail!(
            "ENCRYPTION_KEY must be 64 hex chars (32 bytes), got {} chars",
            hex.len()
        );
    }
    let bytes = hex::decode(hex)
        .map_err(|e| anyhow::anyhow!("ENCRYPTION_KEY is not valid hex: {}", e))?;
    let mut key = [0u8; 32];
    key.copy_from_slice(&bytes);
    Ok(key)
}

/// A fresh random key, hex encoded, suitable for `ENCRYPTION_KEY`.
pub fn generate_key_hex() -> String {
    let mut key = [0u8; 32];
    OsRng.fill_bytes(&mut key);
    let encoded = hex::encode(key);
    key.zeroize();
    encoded
}
