pub mod dedupe;
pub mod single;
pub mod sqlite;

use async_trait::async_trait;

use crate::errors::AppError;

/// A stored row as the runner sees it: row id and ciphertext.
pub type EncryptedRow = (i64, Vec<u8>);

/// The slice of the token store the batch runner needs: paging over stored
/// ciphertexts and the duplicate sweep that precedes each pass.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Rows ordered by insertion, `limit` at most, skipping `offset`.
    async fn list_encrypted_batch(&self, offset: i64, limit: i64)
        -> Result<Vec<EncryptedRow>, AppError>;

    /// Remove all but the earliest row per fingerprint; returns rows removed.
    async fn deduplicate(&self) -> Result<u64, AppError>;
}
