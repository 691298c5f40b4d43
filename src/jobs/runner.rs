//! Background job: replay every stored token against the keep-alive endpoint.
//!
//! One pass = dedupe sweep, then page through the store, decrypt each page and
//! fan the decrypted tokens out to the dispatcher. Passes repeat forever with a
//! fixed sleep in between. Per-token failures are logged and skipped; a storage
//! failure ends the pass and the next interval tries again.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use tracing::{debug, error, info, warn};

use crate::dispatch::Dispatch;
use crate::errors::AppError;
use crate::models::token::SessionToken;
use crate::store::{EncryptedRow, TokenSource};
use crate::vault::TokenCipher;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RunnerState {
    Idle = 0,
    Running = 1,
}

impl RunnerState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => RunnerState::Running,
            _ => RunnerState::Idle,
        }
    }
}

/// Counters for one pass, logged when the pass finishes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub duplicates_removed: u64,
    pub pages: usize,
    pub fetched: usize,
    pub decrypt_failures: usize,
    pub dispatched: usize,
    pub dispatch_failures: usize,
}

pub struct BatchRunner<S, D> {
    store: Arc<S>,
    dispatcher: Arc<D>,
    cipher: Arc<TokenCipher>,
    batch_size: u32,
    concurrency: usize,
    interval: Duration,
    state: AtomicU8,
}

impl<S, D> BatchRunner<S, D>
where
    S: TokenSource + 'static,
    D: Dispatch + 'static,
{
    pub fn new(
        store: Arc<S>,
        dispatcher: Arc<D>,
        cipher: Arc<TokenCipher>,
        batch_size: u32,
        concurrency: usize,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            dispatcher,
            cipher,
            batch_size: batch_size.max(1),
            concurrency: concurrency.max(1),
            interval,
            state: AtomicU8::new(RunnerState::Idle as u8),
        }
    }

    /// `Running` while a pass is in progress, `Idle` otherwise.
    pub fn state(&self) -> RunnerState {
        RunnerState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, to: RunnerState) {
        let from = RunnerState::from_u8(self.state.swap(to as u8, Ordering::SeqCst));
        debug!(?from, ?to, "runner state change");
    }

    /// Run passes forever. The first pass starts immediately.
    pub async fn run_forever(&self) {
        loop {
            match self.run_once().await {
                Ok(summary) => debug!(?summary, "pass complete"),
                Err(e) => error!("pass aborted, retrying next interval: {}", e),
            }

            info!(
                next_run_in_secs = self.interval.as_secs(),
                "runner sleeping until next pass"
            );
            tokio::time::sleep(self.interval).await;
        }
    }

    /// One full pass over the store. The runner is `Running` for its duration
    /// and back to `Idle` once it returns, whether or not it succeeded.
    pub async fn run_once(&self) -> Result<RunSummary, AppError> {
        self.set_state(RunnerState::Running);
        let result = self.pass().await;
        self.set_state(RunnerState::Idle);
        result
    }

    async fn pass(&self) -> Result<RunSummary, AppError> {
        let started: DateTime<Utc> = Utc::now();
        let mut summary = RunSummary {
            // Must finish before paging, or a duplicated token would be
            // dispatched twice in this pass.
            duplicates_removed: self.store.deduplicate().await?,
            ..RunSummary::default()
        };

        let limit = i64::from(self.batch_size);
        let mut offset = 0i64;
        loop {
            let page = self.store.list_encrypted_batch(offset, limit).await?;
            summary.pages += 1;
            summary.fetched += page.len();
            let short_page = (page.len() as i64) < limit;
            offset += page.len() as i64;

            if !page.is_empty() {
                self.process_page(page, &mut summary).await;
            }
            if short_page {
                break;
            }
        }

        info!(
            started_at = %started.to_rfc3339(),
            elapsed_ms = (Utc::now() - started).num_milliseconds(),
            duplicates_removed = summary.duplicates_removed,
            pages = summary.pages,
            fetched = summary.fetched,
            decrypt_failures = summary.decrypt_failures,
            dispatched = summary.dispatched,
            dispatch_failures = summary.dispatch_failures,
            "processed {} tokens",
            summary.dispatched
        );
        Ok(summary)
    }

    async fn process_page(&self, page: Vec<EncryptedRow>, summary: &mut RunSummary) {
        let mut tokens: Vec<SessionToken> = Vec::with_capacity(page.len());
        for (id, blob) in &page {
            match self.cipher.decrypt(blob) {
                Ok(token) => tokens.push(token),
                Err(e) => {
                    summary.decrypt_failures += 1;
                    warn!(id = *id, "skipping stored token: {}", e);
                }
            }
        }

        let results: Vec<bool> = stream::iter(tokens)
            .map(|token| {
                let dispatcher = Arc::clone(&self.dispatcher);
                async move {
                    match dispatcher.dispatch(&token).await {
                        Ok(_) => true,
                        Err(e) => {
                            warn!(token = %token, "dispatch error: {}", e);
                            false
                        }
                    }
                }
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        for ok in results {
            if ok {
                summary.dispatched += 1;
            } else {
                summary.dispatch_failures += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use crate::dispatch::DispatchError;

    const KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";
    const OTHER_KEY: &str = "ff0102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

    fn token(i: usize) -> SessionToken {
        SessionToken::parse(Some(&format!("{:064x}", i))).unwrap()
    }

    /// In-memory store that records every page request.
    struct FakeStore {
        rows: Vec<EncryptedRow>,
        pages: Mutex<Vec<(i64, i64, usize)>>,
        dedupes: AtomicUsize,
        fail_at_offset: Option<i64>,
    }

    impl FakeStore {
        fn new(blobs: Vec<Vec<u8>>) -> Self {
            Self {
                rows: blobs
                    .into_iter()
                    .enumerate()
                    .map(|(i, blob)| (i as i64 + 1, blob))
                    .collect(),
                pages: Mutex::new(Vec::new()),
                dedupes: AtomicUsize::new(0),
                fail_at_offset: None,
            }
        }
    }

    #[async_trait]
    impl TokenSource for FakeStore {
        async fn list_encrypted_batch(
            &self,
            offset: i64,
            limit: i64,
        ) -> Result<Vec<EncryptedRow>, AppError> {
            if self.fail_at_offset == Some(offset) {
                return Err(AppError::Internal(anyhow::anyhow!("store unavailable")));
            }
            let page: Vec<EncryptedRow> = self
                .rows
                .iter()
                .skip(offset as usize)
                .take(limit as usize)
                .cloned()
                .collect();
            self.pages.lock().unwrap().push((offset, limit, page.len()));
            Ok(page)
        }

        async fn deduplicate(&self) -> Result<u64, AppError> {
            assert!(
                self.pages.lock().unwrap().is_empty(),
                "dedupe must run before any page fetch"
            );
            self.dedupes.fetch_add(1, Ordering::SeqCst);
            Ok(0)
        }
    }

    /// Records dispatched tokens; fails for tokens listed in `fail`.
    #[derive(Default)]
    struct FakeDispatcher {
        seen: Mutex<Vec<String>>,
        fail: HashSet<String>,
    }

    #[async_trait]
    impl Dispatch for FakeDispatcher {
        async fn dispatch(&self, token: &SessionToken) -> Result<u16, DispatchError> {
            self.seen.lock().unwrap().push(token.expose().to_string());
            if self.fail.contains(token.expose()) {
                return Err(DispatchError::Network("connection reset".into()));
            }
            Ok(200)
        }
    }

    fn encrypt_all(cipher: &TokenCipher, n: usize) -> Vec<Vec<u8>> {
        (0..n).map(|i| cipher.encrypt(&token(i)).unwrap()).collect()
    }

    fn runner(
        store: Arc<FakeStore>,
        dispatcher: Arc<FakeDispatcher>,
        batch_size: u32,
    ) -> BatchRunner<FakeStore, FakeDispatcher> {
        BatchRunner::new(
            store,
            dispatcher,
            Arc::new(TokenCipher::new(KEY).unwrap()),
            batch_size,
            8,
            Duration::from_secs(3600),
        )
    }

    #[tokio::test]
    async fn test_250_tokens_take_three_pages() {
        let cipher = TokenCipher::new(KEY).unwrap();
        let store = Arc::new(FakeStore::new(encrypt_all(&cipher, 250)));
        let dispatcher = Arc::new(FakeDispatcher::default());

        let summary = runner(store.clone(), dispatcher.clone(), 100)
            .run_once()
            .await
            .unwrap();

        let pages = store.pages.lock().unwrap().clone();
        assert_eq!(pages, vec![(0, 100, 100), (100, 100, 100), (200, 100, 50)]);
        assert_eq!(summary.pages, 3);
        assert_eq!(summary.fetched, 250);
        assert_eq!(summary.dispatched, 250);
        assert_eq!(store.dedupes.load(Ordering::SeqCst), 1);

        let seen: HashSet<String> = dispatcher.seen.lock().unwrap().iter().cloned().collect();
        assert_eq!(seen.len(), 250);
    }

    #[tokio::test]
    async fn test_exact_multiple_ends_on_empty_page() {
        let cipher = TokenCipher::new(KEY).unwrap();
        let store = Arc::new(FakeStore::new(encrypt_all(&cipher, 200)));
        let dispatcher = Arc::new(FakeDispatcher::default());

        let summary = runner(store.clone(), dispatcher, 100).run_once().await.unwrap();
        assert_eq!(summary.pages, 3);
        assert_eq!(summary.dispatched, 200);
    }

    #[tokio::test]
    async fn test_empty_store_is_one_fetch() {
        let store = Arc::new(FakeStore::new(Vec::new()));
        let dispatcher = Arc::new(FakeDispatcher::default());

        let summary = runner(store.clone(), dispatcher.clone(), 100)
            .run_once()
            .await
            .unwrap();
        assert_eq!(summary.pages, 1);
        assert_eq!(summary.dispatched, 0);
        assert!(dispatcher.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_per_item_failures_reduce_dispatches_not_fetches() {
        let cipher = TokenCipher::new(KEY).unwrap();
        let foreign = TokenCipher::new(OTHER_KEY).unwrap();

        let mut rows = encrypt_all(&cipher, 250);
        // Three rows encrypted under another key, one corrupted row.
        rows[5] = foreign.encrypt(&token(5)).unwrap();
        rows[150] = foreign.encrypt(&token(150)).unwrap();
        rows[249] = foreign.encrypt(&token(249)).unwrap();
        rows[10] = vec![0u8; 4];

        let store = Arc::new(FakeStore::new(rows));
        let dispatcher = Arc::new(FakeDispatcher {
            fail: [token(20), token(120)]
                .iter()
                .map(|t| t.expose().to_string())
                .collect(),
            ..FakeDispatcher::default()
        });

        let summary = runner(store.clone(), dispatcher.clone(), 100)
            .run_once()
            .await
            .unwrap();

        assert_eq!(store.pages.lock().unwrap().len(), 3);
        assert_eq!(summary.fetched, 250);
        assert_eq!(summary.decrypt_failures, 4);
        assert_eq!(dispatcher.seen.lock().unwrap().len(), 246);
        assert_eq!(summary.dispatch_failures, 2);
        assert_eq!(summary.dispatched, 244);
    }

    #[tokio::test]
    async fn test_storage_error_aborts_pass() {
        let cipher = TokenCipher::new(KEY).unwrap();
        let mut store = FakeStore::new(encrypt_all(&cipher, 250));
        store.fail_at_offset = Some(100);
        let store = Arc::new(store);
        let dispatcher = Arc::new(FakeDispatcher::default());

        let result = runner(store.clone(), dispatcher.clone(), 100).run_once().await;
        assert!(result.is_err());
        // The first page was already dispatched before the failure.
        assert_eq!(dispatcher.seen.lock().unwrap().len(), 100);
    }

    #[tokio::test]
    async fn test_state_is_running_only_during_a_pass() {
        use tokio::sync::Notify;

        /// Parks the first dispatch until released.
        struct Gate {
            entered: Notify,
            release: Notify,
        }

        #[async_trait]
        impl Dispatch for Gate {
            async fn dispatch(&self, _token: &SessionToken) -> Result<u16, DispatchError> {
                self.entered.notify_one();
                self.release.notified().await;
                Ok(200)
            }
        }

        let cipher = Arc::new(TokenCipher::new(KEY).unwrap());
        let store = Arc::new(FakeStore::new(encrypt_all(&cipher, 1)));
        let gate = Arc::new(Gate {
            entered: Notify::new(),
            release: Notify::new(),
        });
        let runner = Arc::new(BatchRunner::new(
            store,
            gate.clone(),
            cipher,
            100,
            1,
            Duration::from_secs(3600),
        ));
        assert_eq!(runner.state(), RunnerState::Idle);

        let task = tokio::spawn({
            let runner = runner.clone();
            async move { runner.run_once().await }
        });
        gate.entered.notified().await;
        assert_eq!(runner.state(), RunnerState::Running);

        gate.release.notify_one();
        let summary = task.await.unwrap().unwrap();
        assert_eq!(summary.dispatched, 1);
        assert_eq!(runner.state(), RunnerState::Idle);
    }

    #[tokio::test]
    async fn test_state_returns_to_idle_after_failed_pass() {
        let cipher = TokenCipher::new(KEY).unwrap();
        let mut store = FakeStore::new(encrypt_all(&cipher, 10));
        store.fail_at_offset = Some(0);
        let runner = runner(Arc::new(store), Arc::new(FakeDispatcher::default()), 100);

        assert!(runner.run_once().await.is_err());
        assert_eq!(runner.state(), RunnerState::Idle);
    }

    #[tokio::test]
    async fn test_dispatch_concurrency_is_bounded() {
        struct Gauge {
            in_flight: AtomicUsize,
            peak: AtomicUsize,
        }

        #[async_trait]
        impl Dispatch for Gauge {
            async fn dispatch(&self, _token: &SessionToken) -> Result<u16, DispatchError> {
                let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(204)
            }
        }

        let cipher = Arc::new(TokenCipher::new(KEY).unwrap());
        let store = Arc::new(FakeStore::new(encrypt_all(&cipher, 40)));
        let gauge = Arc::new(Gauge {
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });

        let summary = BatchRunner::new(store, gauge.clone(), cipher, 100, 3, Duration::from_secs(1))
            .run_once()
            .await
            .unwrap();

        assert_eq!(summary.dispatched, 40);
        let peak = gauge.peak.load(Ordering::SeqCst);
        assert!((1..=3).contains(&peak), "peak concurrency was {}", peak);
    }
}
