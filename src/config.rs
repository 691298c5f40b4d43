use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;

pub const DEFAULT_DISPATCH_BASE_URL: &str =
    "https://developer.lge.com/secure/ResetDevModeSession.dev";

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_path: PathBuf,
    /// 64 hex chars; validated by `TokenCipher::new` at startup. Only optional
    /// when `session_token` is set and nothing touches the database.
    pub encryption_key: Option<String>,
    /// Single token to replay instead of the stored ones. Set via SESSION_TOKEN.
    pub session_token: Option<String>,
    /// Seconds between runner passes. Set via SCRIPT_INTERVAL. Default: 86400.
    pub interval: Duration,
    pub batch_size: u32,
    /// Upper bound on in-flight dispatches within one batch.
    pub dispatch_concurrency: usize,
    pub dispatch_base_url: String,
    pub dispatch_query_param: String,
    pub dispatch_timeout: Duration,
    pub dispatch_connect_timeout: Duration,
}

/// Load configuration from the process environment (and `.env`, if present).
pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();
    from_lookup(|name| std::env::var(name).ok())
}

/// Build a `Config` from an arbitrary variable source.
pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Config>
where
    F: Fn(&str) -> Option<String>,
{
    let non_empty = |name: &str| {
        lookup(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };
    let encryption_key = non_empty("ENCRYPTION_KEY");
    let session_token = non_empty("SESSION_TOKEN");
    if encryption_key.is_none() && session_token.is_none() {
        anyhow::bail!("ENCRYPTION_KEY is not set");
    }

    let batch_size: u32 = parse_or(&lookup, "BATCH_SIZE", 100)?;
    if batch_size == 0 {
        anyhow::bail!("BATCH_SIZE must be greater than zero");
    }

    let default_concurrency = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4);
    let dispatch_concurrency: usize =
        parse_or(&lookup, "DISPATCH_CONCURRENCY", default_concurrency)?;
    if dispatch_concurrency == 0 {
        anyhow::bail!("DISPATCH_CONCURRENCY must be greater than zero");
    }

    let dispatch_base_url =
        lookup("DISPATCH_BASE_URL").unwrap_or_else(|| DEFAULT_DISPATCH_BASE_URL.into());
    url::Url::parse(&dispatch_base_url)
        .with_context(|| format!("DISPATCH_BASE_URL is not a valid URL: {}", dispatch_base_url))?;

    Ok(Config {
        port: parse_or(&lookup, "KEEPER_PORT", 5000)?,
        database_path: lookup("DATABASE_PATH")
            .unwrap_or_else(|| "keys.db".into())
            .into(),
        encryption_key,
        session_token,
        interval: Duration::from_secs(parse_or(&lookup, "SCRIPT_INTERVAL", 86_400)?),
        batch_size,
        dispatch_concurrency,
        dispatch_base_url,
        dispatch_query_param: lookup("DISPATCH_QUERY_PARAM")
            .unwrap_or_else(|| "sessionToken".into()),
        dispatch_timeout: Duration::from_secs(parse_or(&lookup, "DISPATCH_TIMEOUT_SECS", 30)?),
        dispatch_connect_timeout: Duration::from_secs(parse_or(
            &lookup,
            "DISPATCH_CONNECT_TIMEOUT_SECS",
            10,
        )?),
    })
}

impl Config {
    /// The configured key, or an error naming the missing variable.
    pub fn require_encryption_key(&self) -> anyhow::Result<&str> {
        self.encryption_key
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("ENCRYPTION_KEY is not set"))
    }
}

fn parse_or<F, T>(lookup: &F, name: &str, default: T) -> anyhow::Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("{} has invalid value {:?}: {}", name, raw, e)),
        None => Ok(default),
    }
}
