use std::io;
use std::path::PathBuf;
use std::time::Duration;

use pg_backup_storage::LeaseError;
use thiserror::Error;

/// Failure of a single external program run.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("{program} not found; install the PostgreSQL client tools or set PG_BIN_DIR")]
    NotInstalled { program: String },
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("{program} exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: String,
        stderr: String,
    },
    #[error("{program} timed out after {timeout:?} and was killed")]
    TimedOut { program: String, timeout: Duration },
    #[error("collecting output of {program}: {source}")]
    Io {
        program: String,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Error)]
pub enum BackupError {
    #[error(transparent)]
    Tool(#[from] ToolError),
    #[error("dump file {0} is missing or empty")]
    EmptyOutput(PathBuf),
    #[error("compressing {path}: {source}")]
    Compression {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl BackupError {
    pub fn is_tool_missing(&self) -> bool {
        matches!(self, BackupError::Tool(ToolError::NotInstalled { .. }))
    }
}

#[derive(Debug, Error)]
pub enum RestoreError {
    #[error("backup file does not exist: {0}")]
    BackupNotFound(PathBuf),
    #[error("backup file {path} is unusable: {reason}")]
    BackupCorrupt { path: PathBuf, reason: String },
    #[error("unsupported backup format (expected .sql, .sql.gz or .backup): {0}")]
    UnsupportedFormat(PathBuf),
    #[error("checksum mismatch for {path}: sidecar says {expected}, file hashes to {actual}")]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },
    #[error("dump recreates database {embedded}, refusing to restore it as {target}")]
    DatabaseMismatch { embedded: String, target: String },
    #[error("database server not reachable: {0}")]
    ConnectionFailed(String),
    #[error("pre-restore safety backup failed, not restoring without it (use --force to skip): {0}")]
    SafetyBackupFailed(#[source] BackupError),
    #[error("restore cancelled")]
    Cancelled,
    #[error(transparent)]
    Locked(#[from] LeaseError),
    #[error(transparent)]
    Tool(#[from] ToolError),
    #[error("{step}: {cause:#}")]
    Admin {
        step: &'static str,
        cause: anyhow::Error,
    },
    #[error("reading backup file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl RestoreError {
    pub(crate) fn admin(step: &'static str) -> impl FnOnce(anyhow::Error) -> Self {
        move |cause| RestoreError::Admin { step, cause }
    }
}
