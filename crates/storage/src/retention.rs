use std::fs;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use anyhow::{ensure, Result};
use chrono::{DateTime, Local};
use pg_backup_core::naming::sidecar_path;
use tracing::{error, info};

use crate::catalog::BackupCatalog;

#[derive(Debug, Default)]
pub struct RetentionReport {
    pub removed: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, String)>,
}

/// Deletes every catalogued dump whose mtime is strictly older than
/// `now - retention_days`, together with its sidecar. A file that cannot be
/// removed is reported and the sweep continues.
pub fn prune_older_than(
    catalog: &BackupCatalog,
    retention_days: i64,
    now: SystemTime,
) -> Result<RetentionReport> {
    ensure!(retention_days >= 0, "retention_days must not be negative");
    let window = Duration::from_secs((retention_days as u64).saturating_mul(24 * 60 * 60));
    let cutoff: DateTime<Local> = now.checked_sub(window).unwrap_or(SystemTime::UNIX_EPOCH).into();

    let mut report = RetentionReport::default();
    for entry in catalog.list_backups()? {
        if entry.modified >= cutoff {
            continue;
        }
        match fs::remove_file(&entry.path) {
            Ok(()) => {
                info!(file = %entry.path.display(), "removed old backup");
                let sidecar = sidecar_path(&entry.path);
                if sidecar.exists() {
                    if let Err(e) = fs::remove_file(&sidecar) {
                        error!(file = %sidecar.display(), error = %e, "failed to remove sidecar");
                    }
                }
                report.removed.push(entry.path);
            }
            Err(e) => {
                error!(file = %entry.path.display(), error = %e, "failed to remove old backup");
                report.failed.push((entry.path, e.to_string()));
            }
        }
    }

    if !report.removed.is_empty() {
        info!(removed = report.removed.len(), retention_days, "cleaned up old backup files");
    }
    Ok(report)
}
