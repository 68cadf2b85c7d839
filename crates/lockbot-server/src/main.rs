//! lockbot server.
//!
//! This server:
//! - Serves the REST lock API under `/api`, authenticated with team tokens
//! - Answers Slack slash commands and Events API callbacks
//! - Runs the Slack OAuth install handshake
//! - Optionally purges expired lock records in the background

use std::sync::Arc;

use clap::Parser;
use lockbot_core::store::{KvBackend, MemoryBackend};
use lockbot_core::{Clock, LockManager, StoreAdapter, SystemClock, TokenManager};
use lockbot_store_dynamodb::{DynamoBackend, DynamoConfig};
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod bot;
mod config;
mod error;
mod handlers;
mod oauth;
mod purge;
mod routes;
mod signature;

use config::{Config, StoreBackendKind};
use handlers::{AppState, SlackSettings};
use oauth::SlackOAuth;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse();
    let settings = config.settings()?;

    info!("Starting lockbot v{}", env!("CARGO_PKG_VERSION"));
    info!("  Host: {}", config.host);
    info!("  Port: {}", config.port);

    let backend: Arc<dyn KvBackend> = match config.store_backend {
        StoreBackendKind::Memory => {
            warn!("  Store: memory (locks and installations are lost on restart)");
            Arc::new(MemoryBackend::new())
        }
        StoreBackendKind::Dynamodb => {
            info!(
                "  Store: dynamodb (locks: {}, installations: {})",
                config.locks_table_name, config.installations_table_name
            );
            if let Some(ref endpoint) = config.dynamodb_endpoint_url {
                info!("  DynamoDB endpoint: {}", endpoint);
            }
            Arc::new(
                DynamoBackend::connect(DynamoConfig {
                    locks_table: config.locks_table_name.clone(),
                    installations_table: config.installations_table_name.clone(),
                    region: config.aws_region.clone(),
                    endpoint_url: config.dynamodb_endpoint_url.clone(),
                })
                .await,
            )
        }
    };
    let backend_name = backend.backend_name();

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = StoreAdapter::new(backend, settings.retry);
    let locks = LockManager::new(store.clone(), clock.clone(), settings.locks);
    let tokens = TokenManager::new(store, clock.clone(), settings.tokens);

    let oauth = match (&config.slack_client_id, &config.slack_client_secret) {
        (Some(id), Some(secret)) => {
            info!("  Slack install: enabled (redirect {})", config.redirect_uri());
            Some(SlackOAuth::new(
                config.slack_api_url.clone(),
                id.clone(),
                secret.clone(),
            ))
        }
        _ => {
            warn!("  Slack install: DISABLED (set SLACK_CLIENT_ID and SLACK_CLIENT_SECRET)");
            None
        }
    };
    if config.slack_signing_secret.is_none() {
        warn!("  Slack signatures: NOT VERIFIED (set SLACK_SIGNING_SECRET)");
    }

    let slack = SlackSettings {
        signing_secret: config.slack_signing_secret.clone(),
        oauth,
        authorize_url: config.slack_authorize_url.clone(),
        redirect_uri: config.redirect_uri(),
        scopes: config.scopes(),
        allow_chat_force: config.allow_chat_force,
    };

    if let Some(interval) = config.purge_interval() {
        info!("  Expired lock purge: every {}s", interval.as_secs());
        purge::start_expired_lock_purge(locks.clone(), interval);
    }

    let state = AppState {
        locks,
        tokens,
        clock,
        slack: Arc::new(slack),
        backend: backend_name,
    };
    let app = routes::router(state);

    // Bind and serve
    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, initiating shutdown"),
            Err(e) => {
                error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                info!("Received SIGTERM, initiating shutdown");
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
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
}
