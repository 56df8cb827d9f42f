//! upvault server binary.

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use upvault_core::TokenIssuer;
use upvault_core::config::AppConfig;
use upvault_engine::{UploadEngine, event_channels};
use upvault_server::bootstrap::{debug_sample_token, ensure_storage_dir};
use upvault_server::{AppState, Reconciler, Synchronizer, create_router};

/// upvault - authenticated resumable uploads
#[derive(Parser, Debug)]
#[command(name = "upvaultd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to an optional TOML configuration file
    #[arg(short, long, env = "UPVAULT_CONFIG")]
    config: Option<PathBuf>,

    /// Log a sample token for user 123 at startup
    #[arg(long)]
    debug: bool,

    /// Directory holding upload data (overrides storage.path)
    #[arg(long)]
    dir: Option<PathBuf>,
}

impl Args {
    fn apply(&self, config: &mut AppConfig) {
        if self.debug {
            config.server.debug = true;
        }
        if let Some(dir) = &self.dir {
            config.storage.path = dir.clone();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("upvault v{}", env!("CARGO_PKG_VERSION"));

    if let Some(path) = &args.config {
        tracing::info!(config_path = %path.display(), "Loading configuration from file");
    }
    let mut config: AppConfig = AppConfig::figment(args.config.as_deref())
        .extract()
        .context("failed to load configuration")?;
    args.apply(&mut config);
    // Refuses to start without a signing secret
    config.validate().context("invalid configuration")?;

    upvault_server::metrics::register_metrics();
    tracing::info!("Prometheus metrics registered");

    let issuer = TokenIssuer::from_config(&config.auth).context("failed to load signing secret")?;
    if config.server.debug {
        let token = debug_sample_token(&issuer)?;
        tracing::warn!(token = %token, "Debug mode: sample token for user 123");
    }

    ensure_storage_dir(&config.storage.path).await?;
    let store = upvault_engine::from_config(&config.storage)
        .await
        .context("failed to initialize upload storage")?;
    store
        .health_check()
        .await
        .context("upload storage health check failed")?;
    tracing::info!(path = %config.storage.path.display(), "Upload storage initialized");

    // Schema creation happens here; failing it is fatal
    let metadata = upvault_metadata::from_config(&config.metadata)
        .await
        .context("failed to initialize metadata store")?;
    tracing::info!("Metadata store initialized");

    let (senders, receivers) = event_channels(config.sync.channel_capacity);
    let engine =
        Arc::new(UploadEngine::new(store, senders).with_max_size(config.server.max_upload_size));

    let sync = Synchronizer::new(metadata.clone()).spawn(receivers);

    let reconcile = match config.sync.reconcile_interval() {
        Some(interval) => {
            let reconciler = Reconciler::new(
                metadata.clone(),
                engine.clone(),
                config.sync.reconcile_grace(),
            );
            tracing::info!(
                interval_secs = interval.as_secs(),
                "Reconciliation sweep scheduled"
            );
            Some(reconciler.spawn(interval))
        }
        None => {
            tracing::info!("Reconciliation sweep disabled");
            None
        }
    };

    let addr: SocketAddr = config.server.bind.parse().context("invalid bind address")?;
    let state = AppState::new(config, metadata, engine, issuer);
    let app = create_router(state);

    tracing::info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped, draining lifecycle events");
    if let Some(handle) = reconcile {
        handle.abort();
    }
    if let Err(e) = sync.shutdown().await {
        tracing::error!(error = %e, "Lifecycle synchronizer did not stop cleanly");
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
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
    tracing::info!("Shutdown signal received");
}
