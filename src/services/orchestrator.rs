use crate::auth::Initiator;
use crate::db::connection::DbPool;
use crate::error::AppError;
use crate::models::backup_record::{self, BackupRecord, BackupStatus, NewRecord};
use crate::services::executor::DumpRestoreExecutor;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Timestamp embedded in artifact filenames. Colons are not safe in
/// filenames, so the time-of-day separators become dashes.
const FILENAME_TS: &str = "%Y-%m-%dT%H-%M-%S";

/// Record timestamps: RFC 3339 UTC at second resolution. Lexicographic
/// order on these strings matches chronological order.
const RECORD_TS: &str = "%Y-%m-%dT%H:%M:%SZ";

type Clock = Box<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// The core backup state machine. Sequences create/list/get/download/
/// restore/delete, checking the caller's privilege before anything else
/// and funnelling all filesystem and process work through the executor.
///
/// Dumps may run concurrently (shared side of the lock); a restore takes
/// the exclusive side so that its safety backup and the restore itself
/// form one critical section no other operation can interleave with.
pub struct BackupOrchestrator {
    db: DbPool,
    executor: Arc<dyn DumpRestoreExecutor>,
    backups_dir: PathBuf,
    restore_lock: RwLock<()>,
    clock: Clock,
}

impl BackupOrchestrator {
    pub fn new(db: DbPool, executor: Arc<dyn DumpRestoreExecutor>, backups_dir: PathBuf) -> Self {
        Self {
            db,
            executor,
            backups_dir,
            restore_lock: RwLock::new(()),
            clock: Box::new(Utc::now),
        }
    }

    #[cfg(test)]
    fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    fn authorize(&self, initiator: &Initiator) -> Result<(), AppError> {
        if initiator.privileged {
            Ok(())
        } else {
            Err(AppError::Forbidden(
                "Backup operations require administrator privileges".into(),
            ))
        }
    }

    async fn find_record(&self, id: &str) -> Result<BackupRecord, AppError> {
        let db = self.db.clone();
        let id = id.to_string();
        let record = tokio::task::spawn_blocking(move || {
            let conn = db.get()?;
            backup_record::find_by_id(&conn, &id)
        })
        .await
        .map_err(|e| anyhow::anyhow!(e))??;
        record.ok_or_else(|| AppError::NotFound("Backup record not found".into()))
    }

    fn artifact_path(&self, record: &BackupRecord) -> PathBuf {
        self.backups_dir.join(&record.filename)
    }

    /// Backup attempt shared by create_backup and the pre-restore safety
    /// step. Inserts an in_progress row first so the attempt is visible in
    /// history even if the process dies mid-dump, then runs the dump and
    /// writes the terminal status. Returns the final record whether the
    /// dump succeeded or failed; an error means the attempt could not even
    /// be started (no row was left behind without a terminal write pending).
    async fn run_backup_attempt(&self, initiator: &Initiator) -> Result<BackupRecord, AppError> {
        let now = (self.clock)();
        let filename = format!("intelliquiz_backup_{}.sql", now.format(FILENAME_TS));
        let created_at = now.format(RECORD_TS).to_string();

        let db = self.db.clone();
        let created = {
            let filename = filename.clone();
            let created_by = initiator.id.clone();
            tokio::task::spawn_blocking(move || {
                let conn = db.get()?;
                // Filenames carry second resolution; a second request in
                // the same second would reuse the name, so it is rejected
                // until the clock advances.
                if backup_record::filename_exists(&conn, &filename)? {
                    return Ok(None);
                }
                match backup_record::create(
                    &conn,
                    &NewRecord {
                        filename: &filename,
                        created_at: &created_at,
                        created_by: &created_by,
                    },
                ) {
                    Ok(record) => Ok(Some(record)),
                    // A concurrent attempt in the same second can win the
                    // insert between the existence check and ours.
                    Err(e) if backup_record::is_unique_violation(&e) => Ok(None),
                    Err(e) => Err(e),
                }
            })
            .await
            .map_err(|e| anyhow::anyhow!(e))??
        };
        let record = created.ok_or_else(|| {
            AppError::Execution(format!(
                "A backup named {filename} already exists; retry in a moment"
            ))
        })?;

        let output_path = self.backups_dir.join(&record.filename);
        let executor = self.executor.clone();
        let dump = tokio::task::spawn_blocking(move || executor.create_dump(&output_path))
            .await
            .map_err(|e| anyhow::anyhow!(e))?;

        match &dump {
            Ok(size) => tracing::info!("Backup {} completed ({size} bytes)", record.filename),
            Err(e) => tracing::warn!("Backup {} failed: {e}", record.filename),
        }

        let db = self.db.clone();
        let id = record.id.clone();
        tokio::task::spawn_blocking(move || {
            let conn = db.get()?;
            match dump {
                Ok(size) => backup_record::mark_success(&conn, &id, size as i64),
                Err(e) => backup_record::mark_failed(&conn, &id, &e.to_string()),
            }
        })
        .await
        .map_err(|e| anyhow::anyhow!(e))??;

        self.find_record(&record.id).await
    }

    /// Creates a point-in-time dump of the operational database. The
    /// returned record carries the outcome in its status; a failed dump is
    /// first-class history, not an error.
    pub async fn create_backup(&self, initiator: &Initiator) -> Result<BackupRecord, AppError> {
        self.authorize(initiator)?;
        let _shared = self.restore_lock.read().await;
        self.run_backup_attempt(initiator).await
    }

    pub async fn list_backups(&self, initiator: &Initiator) -> Result<Vec<BackupRecord>, AppError> {
        self.authorize(initiator)?;
        let db = self.db.clone();
        let records = tokio::task::spawn_blocking(move || {
            let conn = db.get()?;
            backup_record::find_all(&conn)
        })
        .await
        .map_err(|e| anyhow::anyhow!(e))??;
        Ok(records)
    }

    pub async fn get_backup(
        &self,
        initiator: &Initiator,
        id: &str,
    ) -> Result<BackupRecord, AppError> {
        self.authorize(initiator)?;
        self.find_record(id).await
    }

    /// Opens the artifact for streaming. A record whose file has gone
    /// missing yields a distinct error from a record that never existed.
    pub async fn download_backup(
        &self,
        initiator: &Initiator,
        id: &str,
    ) -> Result<(BackupRecord, tokio::fs::File), AppError> {
        self.authorize(initiator)?;
        let record = self.find_record(id).await?;
        let path = self.artifact_path(&record);

        let file = tokio::fs::File::open(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                AppError::FileNotFound(format!(
                    "Backup file {} is missing from disk",
                    record.filename
                ))
            } else {
                AppError::Internal(anyhow::anyhow!("Failed to open {}: {e}", path.display()))
            }
        })?;

        Ok((record, file))
    }

    /// Restores the operational database from the given backup's artifact,
    /// taking a safety backup of the current state first. The safety
    /// attempt is durably recorded (success or failure) before the restore
    /// touches the database; if it cannot even be started the restore is
    /// aborted and the database left untouched.
    pub async fn restore_from_backup(
        &self,
        initiator: &Initiator,
        id: &str,
    ) -> Result<BackupRecord, AppError> {
        self.authorize(initiator)?;

        let _exclusive = self.restore_lock.try_write().map_err(|_| {
            AppError::Execution("Another restore is already in progress".into())
        })?;

        let record = self.find_record(id).await?;
        // Only a completed dump is a valid restore source: a failed or
        // interrupted attempt may have left a truncated artifact behind,
        // and replaying it would corrupt the live database.
        if record.status != BackupStatus::Success {
            return Err(AppError::Execution(format!(
                "Backup {} did not complete successfully and cannot be restored",
                record.filename
            )));
        }
        let path = self.artifact_path(&record);
        if tokio::fs::metadata(&path).await.is_err() {
            return Err(AppError::FileNotFound(format!(
                "Backup file {} is missing from disk",
                record.filename
            )));
        }

        let safety = self.run_backup_attempt(initiator).await?;
        if safety.status == BackupStatus::Success {
            tracing::info!(
                "Pre-restore safety backup {} recorded before restoring {}",
                safety.filename,
                record.filename
            );
        } else {
            tracing::warn!(
                "Pre-restore safety backup {} failed; restore of {} proceeds without a fresh checkpoint",
                safety.filename,
                record.filename
            );
        }

        let executor = self.executor.clone();
        let restore_path = path.clone();
        tokio::task::spawn_blocking(move || executor.restore_from_dump(&restore_path))
            .await
            .map_err(|e| anyhow::anyhow!(e))??;

        let restored_at = (self.clock)().format(RECORD_TS).to_string();
        let db = self.db.clone();
        let record_id = record.id.clone();
        tokio::task::spawn_blocking(move || {
            let conn = db.get()?;
            backup_record::touch_restored(&conn, &record_id, &restored_at)
        })
        .await
        .map_err(|e| anyhow::anyhow!(e))??;

        tracing::info!("Database restored from {}", record.filename);
        self.find_record(&record.id).await
    }

    /// Removes the record and its artifact. An already-absent artifact is
    /// fine: the operation means "ensure both are gone".
    pub async fn delete_backup(&self, initiator: &Initiator, id: &str) -> Result<(), AppError> {
        self.authorize(initiator)?;
        let _shared = self.restore_lock.read().await;

        let record = self.find_record(id).await?;
        let path = self.artifact_path(&record);

        let db = self.db.clone();
        let record_id = record.id.clone();
        let deleted = tokio::task::spawn_blocking(move || {
            let conn = db.get()?;
            backup_record::delete(&conn, &record_id)
        })
        .await
        .map_err(|e| anyhow::anyhow!(e))??;
        if !deleted {
            return Err(AppError::NotFound("Backup record not found".into()));
        }

        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(AppError::Internal(anyhow::anyhow!(
                    "Failed to remove {}: {e}",
                    path.display()
                )));
            }
        }

        tracing::info!("Deleted backup {}", record.filename);
        Ok(())
    }
}
