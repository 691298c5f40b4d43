use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use keeper::api::{self, AppState};
use keeper::config::{self, Config};
use keeper::dispatch::UpstreamDispatcher;
use keeper::jobs::BatchRunner;
use keeper::models::token::SessionToken;
use keeper::store::single::SingleTokenSource;
use keeper::store::sqlite::SqliteStore;
use keeper::store::TokenSource;
use keeper::vault::{cipher::generate_key_hex, TokenCipher};

mod cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let args = cli::Cli::parse();

    let result = match args.command {
        // Needs no configuration: this is how the key is produced in the first place.
        Some(cli::Commands::Keygen) => {
            println!("{}", generate_key_hex());
            Ok(())
        }
        command => run(command).await,
    };

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    result
}

async fn run(command: Option<cli::Commands>) -> anyhow::Result<()> {
    let cfg = config::load()?;
    match command {
        Some(cli::Commands::Run { once }) => run_batch(cfg, once).await,
        Some(cli::Commands::Dedupe) => run_dedupe(cfg).await,
        Some(cli::Commands::Serve { port }) => run_server(cfg, port).await,
        Some(cli::Commands::Keygen) | None => run_server(cfg, None).await,
    }
}

fn init_tracing() {
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    let (json_layer, text_layer) = if json {
        (Some(tracing_subscriber::fmt::layer().json()), None)
    } else {
        (None, Some(tracing_subscriber::fmt::layer()))
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "keeper=info,tower_http=info".into()),
        ))
        .with(json_layer)
        .with(text_layer)
        .init();
}

/// Build the cipher from config and open (and migrate) the token store.
/// Fails fast on a missing or malformed key.
async fn open_store(cfg: &Config) -> anyhow::Result<(SqliteStore, Arc<TokenCipher>)> {
    let cipher = Arc::new(
        TokenCipher::new(cfg.require_encryption_key()?).context("invalid ENCRYPTION_KEY")?,
    );

    tracing::info!(path = %cfg.database_path.display(), "Opening token store...");
    let store = SqliteStore::connect(&cfg.database_path, cipher.clone())
        .await
        .with_context(|| format!("failed to open {}", cfg.database_path.display()))?;

    tracing::info!("Running migrations...");
    store.migrate().await?;

    Ok((store, cipher))
}

async fn run_server(cfg: Config, port: Option<u16>) -> anyhow::Result<()> {
    let (store, _cipher) = open_store(&cfg).await?;
    let state = Arc::new(AppState { store });
    let app = api::router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port.unwrap_or(cfg.port)));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("keeper web service listening on {}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("web service stopped");
    Ok(())
}

async fn run_batch(cfg: Config, once: bool) -> anyhow::Result<()> {
    match cfg.session_token.as_deref() {
        Some(raw) => {
            let token = SessionToken::parse(Some(raw))
                .map_err(|e| anyhow::anyhow!("SESSION_TOKEN is not usable: {}", e))?;
            // No database in this mode: the token is sealed under a throwaway key.
            let cipher = Arc::new(TokenCipher::new(&generate_key_hex())?);
            let source = SingleTokenSource::new(&token, &cipher)?;
            tracing::info!(token = %token, "replaying SESSION_TOKEN; stored tokens are not used");
            drive(&cfg, Arc::new(source), cipher, once).await
        }
        None => {
            let (store, cipher) = open_store(&cfg).await?;
            drive(&cfg, Arc::new(store), cipher, once).await
        }
    }
}

async fn drive<S: TokenSource + 'static>(
    cfg: &Config,
    source: Arc<S>,
    cipher: Arc<TokenCipher>,
    once: bool,
) -> anyhow::Result<()> {
    let dispatcher = UpstreamDispatcher::from_config(cfg)?;

    let runner = BatchRunner::new(
        source,
        Arc::new(dispatcher),
        cipher,
        cfg.batch_size,
        cfg.dispatch_concurrency,
        cfg.interval,
    );

    if once {
        runner.run_once().await?;
        return Ok(());
    }

    tracing::info!(
        interval_secs = cfg.interval.as_secs(),
        batch_size = cfg.batch_size,
        concurrency = cfg.dispatch_concurrency,
        "batch runner started"
    );
    tokio::select! {
        _ = runner.run_forever() => {}
        _ = shutdown_signal() => {
            tracing::info!("batch runner stopped");
        }
    }
    Ok(())
}

async fn run_dedupe(cfg: Config) -> anyhow::Result<()> {
    let (store, _cipher) = open_store(&cfg).await?;
    let removed = store.deduplicate().await?;
    println!("Removed {} duplicate token(s).", removed);
    Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received");
}
