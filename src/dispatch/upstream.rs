//! HTTP client for the keep-alive endpoint.
//! No retries: a failed call is logged and the next pass tries again.
use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use super::{Dispatch, DispatchError};
use crate::models::token::{mask_in, SessionToken};

pub struct UpstreamDispatcher {
    client: reqwest::Client,
    base_url: Url,
    query_param: String,
}

impl UpstreamDispatcher {
    pub fn new(
        base_url: &str,
        query_param: &str,
        timeout: Duration,
        connect_timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(timeout)
            .connect_timeout(connect_timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: Url::parse(base_url)?,
            query_param: query_param.to_string(),
        })
    }

    pub fn from_config(cfg: &crate::config::Config) -> anyhow::Result<Self> {
        Self::new(
            &cfg.dispatch_base_url,
            &cfg.dispatch_query_param,
            cfg.dispatch_timeout,
            cfg.dispatch_connect_timeout,
        )
    }

    /// Base URL with the token appended as the configured query parameter.
    pub fn url_for(&self, token: &SessionToken) -> Url {
        let mut url = self.base_url.clone();
        url.query_pairs_mut()
            .append_pair(&self.query_param, token.expose());
        url
    }
}

#[async_trait]
impl Dispatch for UpstreamDispatcher {
    async fn dispatch(&self, token: &SessionToken) -> Result<u16, DispatchError> {
        let url = self.url_for(token);
        let censored = mask_in(url.as_str(), token.expose());

        let resp = self.client.get(url).send().await.map_err(|e| {
            let timed_out = e.is_timeout();
            // reqwest embeds the full URL in its error text
            let cause = mask_in(&e.without_url().to_string(), token.expose());
            tracing::warn!(url = %censored, "dispatch failed: {}", cause);
            if timed_out {
                DispatchError::Timeout(cause)
            } else {
                DispatchError::Network(cause)
            }
        })?;

        let status = resp.status();
        if status.is_success() {
            tracing::info!(url = %censored, status = status.as_u16(), "fired request");
        } else {
            tracing::warn!(url = %censored, status = status.as_u16(), "fired request, non-success status");
        }

        Ok(status.as_u16())
    }
}
