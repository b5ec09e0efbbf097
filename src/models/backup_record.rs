use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle of a backup attempt. A record enters `InProgress` when the
/// attempt starts and is written exactly once to a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupStatus {
    InProgress,
    Success,
    Failed,
}

impl BackupStatus {
    fn from_db(s: &str) -> rusqlite::Result<Self> {
        match s {
            "in_progress" => Ok(BackupStatus::InProgress),
            "success" => Ok(BackupStatus::Success),
            "failed" => Ok(BackupStatus::Failed),
            other => Err(rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                format!("unknown backup status: {other}").into(),
            )),
        }
    }
}

/// One row per backup attempt, successful or not. Timestamps are RFC 3339
/// UTC at second resolution, so lexicographic order matches time order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupRecord {
    pub id: String,
    pub filename: String,
    pub created_at: String,
    pub file_size_bytes: i64,
    pub status: BackupStatus,
    pub error_message: Option<String>,
    pub last_restored_at: Option<String>,
    pub created_by: String,
}

fn row_to_record(row: &Row) -> rusqlite::Result<BackupRecord> {
    let status: String = row.get("status")?;
    Ok(BackupRecord {
        id: row.get("id")?,
        filename: row.get("filename")?,
        created_at: row.get("created_at")?,
        file_size_bytes: row.get("file_size_bytes")?,
        status: BackupStatus::from_db(&status)?,
        error_message: row.get("error_message")?,
        last_restored_at: row.get("last_restored_at")?,
        created_by: row.get("created_by")?,
    })
}

/// Newest first; rowid breaks ties between records created within the
/// same second so the listing order is a stable total order.
pub fn find_all(conn: &Connection) -> anyhow::Result<Vec<BackupRecord>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM backup_records ORDER BY created_at DESC, rowid DESC",
    )?;
    let rows = stmt.query_map([], row_to_record)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub fn find_by_id(conn: &Connection, id: &str) -> anyhow::Result<Option<BackupRecord>> {
    let mut stmt = conn.prepare("SELECT * FROM backup_records WHERE id = ?")?;
    let mut rows = stmt.query_map(params![id], row_to_record)?;
    rows.next().transpose().map_err(Into::into)
}

pub fn filename_exists(conn: &Connection, filename: &str) -> anyhow::Result<bool> {
    let mut stmt = conn.prepare("SELECT 1 FROM backup_records WHERE filename = ?")?;
    Ok(stmt.exists(params![filename])?)
}

pub struct NewRecord<'a> {
    pub filename: &'a str,
    pub created_at: &'a str,
    pub created_by: &'a str,
}

/// Inserts an in_progress row. Persisted before the dump starts so an
/// in-flight or crashed attempt is still visible in history.
pub fn create(conn: &Connection, data: &NewRecord) -> anyhow::Result<BackupRecord> {
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO backup_records (id, filename, created_at, status, created_by)
         VALUES (?1, ?2, ?3, 'in_progress', ?4)",
        params![id, data.filename, data.created_at, data.created_by],
    )?;
    find_by_id(conn, &id)?
        .ok_or_else(|| anyhow::anyhow!("Failed to retrieve created backup record"))
}

/// Terminal write. The status guard makes the transition single-shot: a
/// record that already reached a terminal state is never rewritten.
pub fn mark_success(conn: &Connection, id: &str, file_size_bytes: i64) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE backup_records SET status = 'success', file_size_bytes = ?, error_message = NULL
         WHERE id = ? AND status = 'in_progress'",
        params![file_size_bytes, id],
    )?;
    Ok(())
}

pub fn mark_failed(conn: &Connection, id: &str, error_message: &str) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE backup_records SET status = 'failed', error_message = ?
         WHERE id = ? AND status = 'in_progress'",
        params![error_message, id],
    )?;
    Ok(())
}

/// Records a restore that used this record as its source. Only ever moves
/// forward: restores are serialized, so each new restore time is at or
/// after the previous one.
pub fn touch_restored(conn: &Connection, id: &str, restored_at: &str) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE backup_records SET last_restored_at = ? WHERE id = ? AND status = 'success'",
        params![restored_at, id],
    )?;
    Ok(())
}

/// True when an insert lost a race on the UNIQUE filename column. Lets
/// callers fold the constraint failure into the same rejection as a
/// pre-checked collision instead of surfacing a generic internal error.
pub fn is_unique_violation(e: &anyhow::Error) -> bool {
    matches!(
        e.downcast_ref::<rusqlite::Error>(),
        Some(rusqlite::Error::SqliteFailure(f, _))
            if f.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

pub fn delete(conn: &Connection, id: &str) -> anyhow::Result<bool> {
    let affected = conn.execute("DELETE FROM backup_records WHERE id = ?", params![id])?;
    Ok(affected > 0)
}

/// Startup sweep: flip rows a previous process left at in_progress to
/// failed. Returns the number of rows swept.
pub fn fail_stale_in_progress(conn: &Connection, reason: &str) -> anyhow::Result<usize> {
    let affected = conn.execute(
        "UPDATE backup_records SET status = 'failed', error_message = ?
         WHERE status = 'in_progress'",
        params![reason],
    )?;
    Ok(affected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::migrate::SCHEMA;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(SCHEMA).unwrap();
        conn
    }

    fn insert(conn: &Connection, filename: &str, created_at: &str) -> BackupRecord {
        create(
            conn,
            &NewRecord {
                filename,
                created_at,
                created_by: "admin",
            },
        )
        .unwrap()
    }

    #[test]
    fn create_starts_in_progress() {
        let conn = test_conn();
        let rec = insert(&conn, "intelliquiz_backup_2026-01-13T14-30-00.sql", "2026-01-13T14:30:00Z");

        assert_eq!(rec.status, BackupStatus::InProgress);
        assert_eq!(rec.file_size_bytes, 0);
        assert!(rec.error_message.is_none());
        assert!(rec.last_restored_at.is_none());
        assert_eq!(rec.created_by, "admin");
    }

    #[test]
    fn filenames_are_unique() {
        let conn = test_conn();
        insert(&conn, "intelliquiz_backup_2026-01-13T14-30-00.sql", "2026-01-13T14:30:00Z");
        let dup = create(
            &conn,
            &NewRecord {
                filename: "intelliquiz_backup_2026-01-13T14-30-00.sql",
                created_at: "2026-01-13T14:30:00Z",
                created_by: "admin",
            },
        );
        assert!(is_unique_violation(&dup.unwrap_err()));
        assert!(filename_exists(&conn, "intelliquiz_backup_2026-01-13T14-30-00.sql").unwrap());
    }

    #[test]
    fn find_all_orders_newest_first_with_stable_ties() {
        let conn = test_conn();
        insert(&conn, "a.sql", "2026-01-13T14:30:00Z");
        insert(&conn, "b.sql", "2026-01-13T14:31:00Z");
        // Same second as b: the later insertion must come first.
        insert(&conn, "c.sql", "2026-01-13T14:31:00Z");

        let all = find_all(&conn).unwrap();
        let names: Vec<_> = all.iter().map(|r| r.filename.as_str()).collect();
        assert_eq!(names, vec!["c.sql", "b.sql", "a.sql"]);
    }

    #[test]
    fn terminal_status_is_written_exactly_once() {
        let conn = test_conn();
        let rec = insert(&conn, "a.sql", "2026-01-13T14:30:00Z");

        mark_success(&conn, &rec.id, 1024).unwrap();
        // A later failure write must not overwrite the terminal state.
        mark_failed(&conn, &rec.id, "too late").unwrap();

        let rec = find_by_id(&conn, &rec.id).unwrap().unwrap();
        assert_eq!(rec.status, BackupStatus::Success);
        assert_eq!(rec.file_size_bytes, 1024);
        assert!(rec.error_message.is_none());
    }

    #[test]
    fn failed_records_keep_their_message() {
        let conn = test_conn();
        let rec = insert(&conn, "a.sql", "2026-01-13T14:30:00Z");

        mark_failed(&conn, &rec.id, "pg_dump exited with code 1").unwrap();

        let rec = find_by_id(&conn, &rec.id).unwrap().unwrap();
        assert_eq!(rec.status, BackupStatus::Failed);
        assert_eq!(rec.error_message.as_deref(), Some("pg_dump exited with code 1"));
    }

    #[test]
    fn touch_restored_only_applies_to_success_records() {
        let conn = test_conn();
        let ok = insert(&conn, "a.sql", "2026-01-13T14:30:00Z");
        let bad = insert(&conn, "b.sql", "2026-01-13T14:31:00Z");
        mark_success(&conn, &ok.id, 10).unwrap();
        mark_failed(&conn, &bad.id, "boom").unwrap();

        touch_restored(&conn, &ok.id, "2026-01-13T15:00:00Z").unwrap();
        touch_restored(&conn, &bad.id, "2026-01-13T15:00:00Z").unwrap();

        let ok = find_by_id(&conn, &ok.id).unwrap().unwrap();
        let bad = find_by_id(&conn, &bad.id).unwrap().unwrap();
        assert_eq!(ok.last_restored_at.as_deref(), Some("2026-01-13T15:00:00Z"));
        assert!(bad.last_restored_at.is_none());
    }

    #[test]
    fn delete_reports_whether_a_row_existed() {
        let conn = test_conn();
        let rec = insert(&conn, "a.sql", "2026-01-13T14:30:00Z");

        assert!(delete(&conn, &rec.id).unwrap());
        assert!(!delete(&conn, &rec.id).unwrap());
        assert!(find_by_id(&conn, &rec.id).unwrap().is_none());
    }

    #[test]
    fn stale_in_progress_rows_are_swept_to_failed() {
        let conn = test_conn();
        let stuck = insert(&conn, "a.sql", "2026-01-13T14:30:00Z");
        let done = insert(&conn, "b.sql", "2026-01-13T14:31:00Z");
        mark_success(&conn, &done.id, 10).unwrap();

        let swept = fail_stale_in_progress(&conn, "interrupted").unwrap();
        assert_eq!(swept, 1);

        let stuck = find_by_id(&conn, &stuck.id).unwrap().unwrap();
        assert_eq!(stuck.status, BackupStatus::Failed);
        assert_eq!(stuck.error_message.as_deref(), Some("interrupted"));

        let done = find_by_id(&conn, &done.id).unwrap().unwrap();
        assert_eq!(done.status, BackupStatus::Success);
    }
}
