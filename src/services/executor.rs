use crate::config::PgConfig;
use crate::error::AppError;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

/// The external tool failed to launch, exited non-zero, timed out, or
/// produced an invalid artifact.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct ExecutionError(pub String);

impl From<ExecutionError> for AppError {
    fn from(e: ExecutionError) -> Self {
        AppError::Execution(e.0)
    }
}

/// Capability interface over the dump/restore tooling. Both calls block
/// until the external process terminates; callers run them on a blocking
/// task. The executor owns no metadata and performs no retries or locking.
pub trait DumpRestoreExecutor: Send + Sync {
    /// Dumps the configured database to `output_path` and returns the size
    /// of the produced artifact in bytes.
    fn create_dump(&self, output_path: &Path) -> Result<u64, ExecutionError>;

    /// Replays the artifact at `input_path` against the configured database.
    fn restore_from_dump(&self, input_path: &Path) -> Result<(), ExecutionError>;
}

/// Production executor shelling out to the PostgreSQL client tools.
pub struct PgDumpExecutor {
    pg: PgConfig,
    timeout: Option<Duration>,
}

impl PgDumpExecutor {
    pub fn new(pg: PgConfig, timeout: Option<Duration>) -> Self {
        Self { pg, timeout }
    }

    fn find_tool(name: &str) -> Result<PathBuf, ExecutionError> {
        which::which(name).map_err(|_| {
            ExecutionError(format!(
                "{name} not found in PATH; install the PostgreSQL client tools"
            ))
        })
    }

    fn command(&self, tool: &Path) -> Command {
        let mut cmd = Command::new(tool);
        cmd.arg("--host")
            .arg(&self.pg.host)
            .arg("--port")
            .arg(self.pg.port.to_string())
            .arg("--username")
            .arg(&self.pg.user)
            .env("PGPASSWORD", &self.pg.password)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        cmd
    }
}

impl DumpRestoreExecutor for PgDumpExecutor {
    fn create_dump(&self, output_path: &Path) -> Result<u64, ExecutionError> {
        let pg_dump = Self::find_tool("pg_dump")?;

        let mut cmd = self.command(&pg_dump);
        cmd.arg("--dbname")
            .arg(&self.pg.database)
            .arg("--format")
            .arg("plain")
            .arg("--file")
            .arg(output_path);

        let child = cmd.spawn().map_err(|e| {
            ExecutionError(format!("Failed to launch pg_dump: {e}"))
        })?;
        let (status, stderr) = wait_with_deadline(child, "pg_dump", self.timeout)?;

        if !status.success() {
            // A partial file is worse than no file.
            let _ = std::fs::remove_file(output_path);
            return Err(ExecutionError(format!(
                "pg_dump exited with {status}: {}",
                stderr.trim()
            )));
        }

        let size = std::fs::metadata(output_path)
            .map_err(|_| {
                ExecutionError("pg_dump reported success but produced no file".into())
            })?
            .len();

        if size == 0 {
            let _ = std::fs::remove_file(output_path);
            return Err(ExecutionError("pg_dump produced an empty dump".into()));
        }

        Ok(size)
    }

    fn restore_from_dump(&self, input_path: &Path) -> Result<(), ExecutionError> {
        if !input_path.is_file() {
            return Err(ExecutionError(format!(
                "Dump file not found: {}",
                input_path.display()
            )));
        }

        let psql = Self::find_tool("psql")?;

        let mut cmd = self.command(&psql);
        cmd.arg("-X") // do not read psqlrc
            .arg("-q")
            .arg("-v")
            .arg("ON_ERROR_STOP=1")
            .arg("--dbname")
            .arg(&self.pg.database)
            .arg("--file")
            .arg(input_path);

        let child = cmd.spawn().map_err(|e| {
            ExecutionError(format!("Failed to launch psql: {e}"))
        })?;
        let (status, stderr) = wait_with_deadline(child, "psql", self.timeout)?;

        if !status.success() {
            return Err(ExecutionError(format!(
                "psql exited with {status}: {}",
                stderr.trim()
            )));
        }

        Ok(())
    }
}

/// Waits for a child, optionally bounded by a deadline, draining stderr on
/// a side thread so a chatty tool cannot deadlock on a full pipe. On
/// expiry the child is killed and the call fails.
fn wait_with_deadline(
    mut child: Child,
    tool: &str,
    timeout: Option<Duration>,
) -> Result<(ExitStatus, String), ExecutionError> {
    let stderr_reader = child.stderr.take().map(|mut pipe| {
        std::thread::spawn(move || {
            let mut buf = String::new();
            let _ = pipe.read_to_string(&mut buf);
            buf
        })
    });

    let status = match timeout {
        None => child
            .wait()
            .map_err(|e| ExecutionError(format!("Failed to wait for {tool}: {e}")))?,
        Some(limit) => {
            let deadline = Instant::now() + limit;
            loop {
                match child.try_wait() {
                    Ok(Some(status)) => break status,
                    Ok(None) => {
                        if Instant::now() >= deadline {
                            let _ = child.kill();
                            let _ = child.wait();
                            return Err(ExecutionError(format!(
                                "{tool} timed out after {}s",
                                limit.as_secs()
                            )));
                        }
                        std::thread::sleep(Duration::from_millis(100));
                    }
                    Err(e) => {
                        return Err(ExecutionError(format!(
                            "Failed to wait for {tool}: {e}"
                        )));
                    }
                }
            }
        }
    };

    let stderr = stderr_reader
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default();

    Ok((status, stderr))
}

#[cfg(test)]
#[cfg(unix)]
mod tests {
    use super::*;

    fn sh(script: &str) -> Child {
        Command::new("sh")
            .arg("-c")
            .arg(script)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .unwrap()
    }

    #[test]
    fn captures_exit_status_and_stderr() {
        let child = sh("echo 'relation does not exist' >&2; exit 3");
        let (status, stderr) = wait_with_deadline(child, "sh", None).unwrap();

        assert!(!status.success());
        assert_eq!(stderr.trim(), "relation does not exist");
    }

    #[test]
    fn successful_child_passes_through() {
        let child = sh("exit 0");
        let (status, stderr) = wait_with_deadline(child, "sh", Some(Duration::from_secs(5))).unwrap();

        assert!(status.success());
        assert!(stderr.is_empty());
    }

    #[test]
    fn hung_child_is_killed_on_deadline() {
        let child = sh("sleep 30");
        let start = Instant::now();
        let err = wait_with_deadline(child, "sh", Some(Duration::from_millis(300))).unwrap_err();

        assert!(err.0.contains("timed out"));
        assert!(start.elapsed() < Duration::from_secs(10));
    }
}
