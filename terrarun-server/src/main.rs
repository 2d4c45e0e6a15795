use anyhow::Context;
use std::sync::Arc;
use terrarun_server::api::{self, AppState};
use terrarun_server::config::{Config, StoreBackend};
use terrarun_server::db;
use terrarun_server::repository::{MemoryRepository, PgRepository, Repository};
use terrarun_server::service::sweeper;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "terrarun_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Terrarun server...");

    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    let repo: Arc<dyn Repository> = match &config.store {
        StoreBackend::Postgres { database_url } => {
            tracing::info!("Connecting to database...");

            let pool = db::create_pool(database_url)
                .await
                .context("Failed to create database pool")?;

            tracing::info!("Database connection pool created");

            db::run_migrations(&pool)
                .await
                .context("Failed to run database migrations")?;

            Arc::new(PgRepository::new(pool))
        }
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory store, state is lost on restart");
            Arc::new(MemoryRepository::new())
        }
    };

    let sweeper = sweeper::spawn_sweeper(
        Arc::clone(&repo),
        config.sweep_interval,
        config.heartbeat_timeout,
    );

    let addr = config.bind_addr.clone();
    let app = api::create_router(AppState::new(repo, config));

    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    sweeper.abort();
    tracing::info!("Server stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
