use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;

use super::dedupe::duplicate_ids;
use super::{EncryptedRow, TokenSource};
use crate::errors::AppError;
use crate::models::token::SessionToken;
use crate::vault::TokenCipher;

/// Token table on a single SQLite file.
///
/// The pool is capped at one connection: every operation in this process runs
/// on that connection, one statement or transaction at a time. Other processes
/// sharing the file are serialized by SQLite's own locking (WAL + busy timeout).
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    cipher: Arc<TokenCipher>,
}

impl SqliteStore {
    pub async fn connect(path: &Path, cipher: Arc<TokenCipher>) -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        Ok(Self { pool, cipher })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Run pending migrations from the migrations/ directory.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Validate, encrypt and insert a token. Returns the new row id.
    pub async fn add(&self, raw: &str) -> Result<i64, AppError> {
        let token = SessionToken::parse(Some(raw))?;
        let fingerprint = token.fingerprint();
        let payload = self.cipher.encrypt(&token)?;

        // Check and insert are a single statement, so SQLite runs them in one
        // write transaction: a concurrent add of the same token cannot slip in
        // between the two.
        let result = sqlx::query(
            r#"INSERT INTO tokens (encrypted_payload, fingerprint)
               SELECT ?1, ?2
               WHERE NOT EXISTS (SELECT 1 FROM tokens WHERE fingerprint = ?2)"#,
        )
        .bind(&payload)
        .bind(&fingerprint)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            tracing::info!(token = %token, "add rejected: duplicate token");
            return Err(AppError::DuplicateToken);
        }

        let id = result.last_insert_rowid();
        tracing::info!(id, token = %token, "token added");
        Ok(id)
    }

    /// Validate and delete a token by fingerprint.
    pub async fn remove(&self, raw: &str) -> Result<(), AppError> {
        let token = SessionToken::parse(Some(raw))?;

        let result = sqlx::query("DELETE FROM tokens WHERE fingerprint = ?")
            .bind(token.fingerprint())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            tracing::info!(token = %token, "remove rejected: token not found");
            return Err(AppError::TokenNotFound);
        }

        tracing::info!(token = %token, rows = result.rows_affected(), "token removed");
        Ok(())
    }

    /// One page of `(id, ciphertext)` rows in insertion order.
    pub async fn list_encrypted_batch(
        &self,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<EncryptedRow>, AppError> {
        let rows = sqlx::query_as::<_, (i64, Vec<u8>)>(
            "SELECT id, encrypted_payload FROM tokens ORDER BY id ASC LIMIT ? OFFSET ?",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Delete every row whose fingerprint already appears on an earlier row.
    /// Returns the number of rows removed.
    pub async fn deduplicate(&self) -> Result<u64, AppError> {
        let rows = sqlx::query_as::<_, (i64, String)>(
            "SELECT id, fingerprint FROM tokens ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        let scanned = rows.len();
        let doomed = duplicate_ids(rows);
        if doomed.is_empty() {
            tracing::debug!(scanned, "dedupe: no duplicates");
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut removed = 0u64;
        for id in &doomed {
            removed += sqlx::query("DELETE FROM tokens WHERE id = ?")
                .bind(*id)
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }
        tx.commit().await?;

        tracing::info!(scanned, removed, "dedupe: removed duplicate tokens");
        Ok(removed)
    }

    pub async fn count(&self) -> Result<i64, AppError> {
        let n = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM tokens")
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }
}

#[async_trait]
impl TokenSource for SqliteStore {
    async fn list_encrypted_batch(
        &self,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<EncryptedRow>, AppError> {
        SqliteStore::list_encrypted_batch(self, offset, limit).await
    }

    async fn deduplicate(&self) -> Result<u64, AppError> {
        SqliteStore::deduplicate(self).await
    }
}
