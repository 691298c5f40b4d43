pub mod upstream;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::token::SessionToken;

pub use upstream::UpstreamDispatcher;

/// Failure to get any HTTP status back for a dispatch. Non-2xx statuses are
/// not errors; they are returned to the caller like any other status.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("network error: {0}")]
    Network(String),
}

/// One keep-alive call per token.
#[async_trait]
pub trait Dispatch: Send + Sync {
    /// Fire the keep-alive request for `token`, returning the HTTP status code.
    async fn dispatch(&self, token: &SessionToken) -> Result<u16, DispatchError>;
}
