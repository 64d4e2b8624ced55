use std::fs::{self, File, OpenOptions, TryLockError};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LeaseInfo {
    pub holder: Uuid,
    pub pid: u32,
    pub database: String,
    pub acquired_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum LeaseError {
    #[error("restore of {} already in progress (holder {}, pid {}, since {})", .0.database, .0.holder, .0.pid, .0.acquired_at)]
    Held(LeaseInfo),
    #[error("restore lease {} is held by another process", .0.display())]
    Busy(PathBuf),
    #[error("lease file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Exclusive claim on "drop, recreate and load this database".
///
/// The claim is an OS advisory lock on `.restore-<db>.lock` in the backup
/// directory, held for as long as the lease lives. The file body records the
/// holder for diagnostics only. It is truncated on release and never removed,
/// so every contender locks the same inode.
#[derive(Debug)]
pub struct RestoreLease {
    file: File,
    info: LeaseInfo,
}

impl RestoreLease {
    pub fn acquire(dir: &Path, database: &str) -> Result<Self, LeaseError> {
        let path = lease_path(dir, database);
        let io_err = |source| LeaseError::Io {
            path: path.clone(),
            source,
        };

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(io_err)?;

        match file.try_lock() {
            Ok(()) => {}
            Err(TryLockError::WouldBlock) => {
                return Err(match read_lease(&path) {
                    Some(holder) => LeaseError::Held(holder),
                    None => LeaseError::Busy(path.clone()),
                });
            }
            Err(TryLockError::Error(source)) => return Err(io_err(source)),
        }

        // a body left behind means the previous holder exited without releasing
        let mut previous = Vec::new();
        file.read_to_end(&mut previous).map_err(io_err)?;
        if !previous.is_empty() {
            let previous: Option<LeaseInfo> = serde_json::from_slice(&previous).ok();
            warn!(path = %path.display(), ?previous, "taking over restore lease left by an exited holder");
        }

        let info = LeaseInfo {
            holder: Uuid::new_v4(),
            pid: std::process::id(),
            database: database.to_owned(),
            acquired_at: Utc::now(),
        };
        write_body(&mut file, &info).map_err(io_err)?;

        info!(holder = %info.holder, database, "restore lease acquired");
        Ok(Self { file, info })
    }

    pub fn info(&self) -> &LeaseInfo {
        &self.info
    }
}

impl Drop for RestoreLease {
    fn drop(&mut self) {
        if let Err(e) = self.file.set_len(0) {
            warn!(holder = %self.info.holder, error = %e, "failed to clear restore lease");
        }
        if let Err(e) = self.file.unlock() {
            warn!(holder = %self.info.holder, error = %e, "failed to release restore lease");
        }
    }
}

pub fn lease_path(dir: &Path, database: &str) -> PathBuf {
    dir.join(format!(".restore-{database}.lock"))
}

fn write_body(file: &mut File, info: &LeaseInfo) -> io::Result<()> {
    let raw = serde_json::to_vec_pretty(info).map_err(io::Error::other)?;
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(&raw)?;
    file.sync_all()
}

fn read_lease(path: &Path) -> Option<LeaseInfo> {
    let raw = fs::read(path).ok()?;
    serde_json::from_slice(&raw).ok()
}
