//! Noteo server binary entrypoint.

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use noteo_common::config::{AppConfig, LogFormat};
use noteo_common::db::create_pool;
use noteo_engine::store::{MemoryStore, PgStore};
use noteo_notifier::{DeliveryQueue, QueueConfig, TelegramSender};

use noteo_api::cli::{Cli, Command, issue_token};
use noteo_api::routes::create_router;
use noteo_api::state::AppState;

/// Largest accepted request body.
const MAX_BODY_BYTES: usize = 64 * 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command() {
        Command::Token {
            recipient_id,
            hours,
        } => {
            let secret = AppConfig::jwt_secret_from_env()?;
            println!("{}", issue_token(*recipient_id, &secret, *hours)?);
            Ok(())
        }
        Command::Serve => serve().await,
    }
}

async fn serve() -> anyhow::Result<()> {
    // Load configuration
    let config = AppConfig::from_env()?;
    init_tracing(&config);

    tracing::info!("Starting Noteo server...");

    // Delivery engine
    let sender = Arc::new(TelegramSender::new(config.bot_token.clone()));
    let queue = DeliveryQueue::new(QueueConfig::from_app_config(&config), sender);

    // Build application state over the selected store
    let state = if config.uses_memory_store() {
        tracing::warn!("Using in-memory store, all data is lost on exit");
        AppState::new(Arc::new(MemoryStore::new()), queue.clone(), config.clone())
    } else {
        let pool = create_pool(&config).await?;
        sqlx::migrate!("../../migrations").run(&pool).await?;
        tracing::info!("Database migrations applied");
        AppState::new(Arc::new(PgStore::new(pool)), queue.clone(), config.clone())
    };

    queue.start()?;
    tracing::info!(
        capacity = queue.capacity(),
        on_exhausted = ?config.queue_on_exhausted,
        "Delivery queue started"
    );

    // Build router
    let app = create_router(state)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("API server listening on {}", addr);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(queue.failed()))
        .await;

    // The server no longer accepts events; drain what is buffered
    tracing::info!(
        pending = queue.len(),
        timeout_secs = config.shutdown_timeout.as_secs(),
        "Stopping delivery queue"
    );
    let drained = tokio::time::timeout(config.shutdown_timeout, queue.stop()).await;

    served?;
    match drained {
        Ok(Ok(())) => {
            tracing::info!("Noteo server shut down");
            Ok(())
        }
        Ok(Err(e)) => {
            tracing::error!(error = %e, "Delivery queue failed");
            Err(e.into())
        }
        Err(_) => {
            tracing::error!(
                pending = queue.len(),
                "Shutdown timeout exceeded, undelivered messages are lost"
            );
            anyhow::bail!("delivery queue did not drain within {:?}", config.shutdown_timeout)
        }
    }
}

fn init_tracing(config: &AppConfig) {
    // RUST_LOG, when set, overrides NOTEO_LOG_LEVEL
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "{level},tower_http={level}",
            level = config.log_level.as_str()
        ))
    });

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match config.log_format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

/// Resolve on SIGINT, SIGTERM, or a fatal delivery queue failure.
async fn shutdown_signal(queue_failed: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received SIGINT"),
        () = terminate => tracing::info!("Received SIGTERM"),
        () = queue_failed.cancelled() => tracing::error!("Delivery queue failed, shutting down"),
    }
}
