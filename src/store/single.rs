//! A token source holding exactly one token, taken from `SESSION_TOKEN`.
//!
//! Lets the batch runner replay a single token without a database file.
//! The token is sealed under a per-process key, so it goes through the same
//! decrypt-then-dispatch path as stored rows.

use async_trait::async_trait;

use super::{EncryptedRow, TokenSource};
use crate::errors::AppError;
use crate::models::token::SessionToken;
use crate::vault::TokenCipher;

/// Row id reported for the lone token.
pub const SINGLE_TOKEN_ID: i64 = 0;

pub struct SingleTokenSource {
    payload: Vec<u8>,
}

impl SingleTokenSource {
    pub fn new(token: &SessionToken, cipher: &TokenCipher) -> anyhow::Result<Self> {
        Ok(Self {
            payload: cipher.encrypt(token)?,
        })
    }
}

#[async_trait]
impl TokenSource for SingleTokenSource {
    async fn list_encrypted_batch(
        &self,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<EncryptedRow>, AppError> {
        if offset > 0 || limit <= 0 {
            return Ok(Vec::new());
        }
        Ok(vec![(SINGLE_TOKEN_ID, self.payload.clone())])
    }

    async fn deduplicate(&self) -> Result<u64, AppError> {
        Ok(0)
    }
}
