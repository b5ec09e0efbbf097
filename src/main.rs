mod auth;
mod config;
mod db;
mod error;
mod models;
mod routes;
mod services;
mod state;

use crate::config::AppConfig;
use crate::db::connection::create_pool;
use crate::db::migrate::{migrate, reconcile_stale_records};
use crate::services::executor::PgDumpExecutor;
use crate::services::orchestrator::BackupOrchestrator;
use crate::state::AppState;
use anyhow::Context;
use std::path::Path;
use std::sync::Arc;
use tokio::signal;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = AppConfig::from_env()?;
    tracing::info!("Starting backup server on port {}", config.port);

    // Ensure data and backup directories exist; an unusable backup
    // directory is startup-fatal, not a per-request error.
    std::fs::create_dir_all(&config.data_dir)?;
    std::fs::create_dir_all(&config.backups_dir)?;
    verify_writable(&config.backups_dir)
        .with_context(|| format!("Backup directory {} is not writable", config.backups_dir.display()))?;

    // Initialize metadata database
    let db_path = config.db_path.to_string_lossy().to_string();
    let pool = create_pool(&db_path)?;
    migrate(&pool)?;
    reconcile_stale_records(&pool)?;

    // Build the backup engine
    let executor = Arc::new(PgDumpExecutor::new(config.pg.clone(), config.tool_timeout));
    let orchestrator = Arc::new(BackupOrchestrator::new(
        pool.clone(),
        executor,
        config.backups_dir.clone(),
    ));
    let state = Arc::new(AppState::new(pool, config.clone(), orchestrator));

    // Build router and start HTTP server
    let app = routes::create_router(state.clone());
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutting down...");
    db::connection::close_pool(&state.db);
    tracing::info!("Server stopped");

    Ok(())
}

fn verify_writable(dir: &Path) -> anyhow::Result<()> {
    let probe = dir.join(".write-probe");
    std::fs::write(&probe, b"probe")?;
    std::fs::remove_file(&probe)?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to listen for ctrl+c");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to listen for SIGTERM")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }
}
