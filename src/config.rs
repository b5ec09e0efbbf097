use std::path::PathBuf;
use std::time::Duration;

/// Connection parameters for the operational database that gets dumped
/// and restored. Consumed exclusively by the executor.
#[derive(Debug, Clone)]
pub struct PgConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
    pub backups_dir: PathBuf,
    pub admin_token: String,
    pub pg: PgConfig,
    /// Upper bound for a single pg_dump/psql invocation. None means the
    /// call blocks until the tool exits.
    pub tool_timeout: Option<Duration>,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let _ = dotenvy::dotenv();

        let admin_token = std::env::var("ADMIN_API_TOKEN")
            .map_err(|_| anyhow::anyhow!("ADMIN_API_TOKEN must be set"))?;

        let data_dir = PathBuf::from(
            std::env::var("DATA_DIR").unwrap_or_else(|_| "./data".into()),
        );

        Ok(Self {
            port: std::env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3000),
            db_path: data_dir.join("backup-metadata.db"),
            backups_dir: PathBuf::from(
                std::env::var("BACKUPS_DIR").unwrap_or_else(|_| "./data/backups".into()),
            ),
            data_dir,
            admin_token,
            pg: PgConfig {
                host: std::env::var("PGHOST").unwrap_or_else(|_| "localhost".into()),
                port: std::env::var("PGPORT")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(5432),
                database: std::env::var("PGDATABASE").unwrap_or_else(|_| "intelliquiz".into()),
                user: std::env::var("PGUSER").unwrap_or_else(|_| "postgres".into()),
                password: std::env::var("PGPASSWORD").unwrap_or_else(|_| "postgres".into()),
            },
            tool_timeout: std::env::var("BACKUP_TOOL_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs),
        })
    }
}
