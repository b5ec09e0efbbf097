use crate::config::AppConfig;
use crate::db::connection::DbPool;
use crate::services::orchestrator::BackupOrchestrator;
use std::sync::Arc;

pub struct AppState {
    pub db: DbPool,
    pub config: AppConfig,
    pub orchestrator: Arc<BackupOrchestrator>,
}

impl AppState {
    pub fn new(db: DbPool, config: AppConfig, orchestrator: Arc<BackupOrchestrator>) -> Self {
        Self {
            db,
            config,
            orchestrator,
        }
    }
}
