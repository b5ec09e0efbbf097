use crate::db::connection::DbPool;
use crate::models::backup_record;

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS backup_records (
  id TEXT PRIMARY KEY,
  filename TEXT NOT NULL UNIQUE,
  created_at TEXT NOT NULL,
  file_size_bytes INTEGER NOT NULL DEFAULT 0,
  status TEXT NOT NULL DEFAULT 'in_progress' CHECK(status IN ('in_progress','success','failed')),
  error_message TEXT,
  last_restored_at TEXT,
  created_by TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_backup_records_created_at ON backup_records(created_at DESC);
"#;

pub fn migrate(pool: &DbPool) -> anyhow::Result<()> {
    tracing::info!("[DB] Starting database migration...");

    let conn = pool.get()?;
    conn.execute_batch(SCHEMA)?;

    tracing::info!("[DB] Migration complete");
    Ok(())
}

/// A row stuck at in_progress means the server died mid-attempt; the dump
/// never reached a terminal state and will never finish. Mark such rows
/// failed so history never shows a permanently running attempt.
pub fn reconcile_stale_records(pool: &DbPool) -> anyhow::Result<usize> {
    let conn = pool.get()?;
    let swept = backup_record::fail_stale_in_progress(
        &conn,
        "Backup attempt interrupted by server shutdown",
    )?;
    if swept > 0 {
        tracing::warn!("[DB] Marked {swept} interrupted backup attempt(s) as failed");
    }
    Ok(swept)
}
