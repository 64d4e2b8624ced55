use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use anyhow::Context;
use chrono::{Local, NaiveDateTime};
use flate2::write::GzEncoder;
use flate2::Compression;
use pg_backup_core::naming::{backup_file_name, safety_backup_file_name};
use pg_backup_core::{file_hash, BackupFormat, BackupSidecar, BackupType, NewBackupSidecar};
use pg_backup_storage::{prune_older_than, write_sidecar, RetentionReport};
use tracing::{error, info, warn};

use crate::context::EngineContext;
use crate::error::BackupError;
use crate::tools::DumpSpec;

/// How `create_backup` writes dumps and how long it keeps them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackupPlan {
    pub format: BackupFormat,
    pub retention_days: i64,
    pub dump_timeout: Option<Duration>,
}

impl Default for BackupPlan {
    fn default() -> Self {
        Self {
            format: BackupFormat::CustomFormat,
            retention_days: 30,
            dump_timeout: None,
        }
    }
}

#[derive(Debug)]
pub struct BackupOutcome {
    pub path: PathBuf,
    pub sidecar: BackupSidecar,
    /// `None` when the retention sweep itself failed.
    pub retention: Option<RetentionReport>,
}

pub struct BackupCreator<'a> {
    ctx: &'a EngineContext,
    plan: BackupPlan,
}

impl<'a> BackupCreator<'a> {
    pub fn new(ctx: &'a EngineContext, plan: BackupPlan) -> Self {
        Self { ctx, plan }
    }

    /// Dumps the configured database, writes its sidecar and then prunes
    /// dumps older than the retention window.
    pub async fn create_backup(&self, backup_type: BackupType) -> Result<BackupOutcome, BackupError> {
        let (path, sidecar) = self.write_backup(backup_type).await?;

        let retention = match prune_older_than(&self.ctx.catalog, self.plan.retention_days, SystemTime::now()) {
            Ok(report) => Some(report),
            Err(e) => {
                warn!(error = %format!("{e:#}"), "retention cleanup failed");
                None
            }
        };

        Ok(BackupOutcome {
            path,
            sidecar,
            retention,
        })
    }

    /// Same dump as `create_backup` without the retention sweep, so a restore
    /// never prunes the file it is about to load.
    pub(crate) async fn write_backup(
        &self,
        backup_type: BackupType,
    ) -> Result<(PathBuf, BackupSidecar), BackupError> {
        let ts = Local::now().naive_local();
        let name = backup_file_name(self.ctx.database(), backup_type, self.plan.format, ts);
        let spec = DumpSpec {
            backup_type,
            format: self.plan.format,
            recreate_database: false,
        };

        self.log_table_stats().await;
        let sidecar = self.dump_with_sidecar(&spec, &name, ts).await?;
        Ok((self.ctx.catalog.path_for(&name), sidecar))
    }

    /// Plain SQL dump that drops and recreates the database when replayed,
    /// taken right before a restore so it can be rolled back by hand.
    pub async fn create_safety_backup(&self) -> Result<PathBuf, BackupError> {
        let ts = Local::now().naive_local();
        let name = safety_backup_file_name(ts);
        let spec = DumpSpec {
            backup_type: BackupType::Full,
            format: BackupFormat::Plain,
            recreate_database: true,
        };
        info!(file = %name, "creating safety backup");
        self.dump_with_sidecar(&spec, &name, ts).await?;
        Ok(self.ctx.catalog.path_for(&name))
    }

    async fn dump_with_sidecar(
        &self,
        spec: &DumpSpec,
        name: &str,
        ts: NaiveDateTime,
    ) -> Result<BackupSidecar, BackupError> {
        let conn = self.ctx.connection();
        let path = self.ctx.catalog.path_for(name);
        let pending = NewBackupSidecar {
            backup_file: path.display().to_string(),
            backup_type: spec.backup_type,
            format: spec.format,
            database: conn.database.clone(),
            host: conn.host.clone(),
            timestamp: ts,
            retention_days: self.plan.retention_days,
        };

        info!(
            database = %conn.database,
            backup_type = %spec.backup_type,
            format = %spec.format,
            file = %path.display(),
            "starting backup"
        );
        let start = Instant::now();
        let result = match self.dump(spec, &path).await {
            Ok(size) => file_hash(&path)
                .with_context(|| format!("hash {}", path.display()))
                .map(|checksum| (size, checksum))
                .map_err(BackupError::Other),
            Err(e) => Err(e),
        };
        let elapsed = start.elapsed().as_secs_f64();

        let sidecar = match result {
            Ok((size, checksum)) => {
                info!(file = %path.display(), size, elapsed_secs = elapsed, "backup completed");
                pending.succeeded(size, checksum, elapsed)
            }
            Err(e) => {
                error!(file = %path.display(), error = %e, "backup failed");
                remove_partial(&path);
                let sidecar = pending.failed(e.to_string(), elapsed);
                if let Err(write_err) = write_sidecar(&path, &sidecar) {
                    warn!(error = %format!("{write_err:#}"), "could not record failed backup");
                }
                return Err(e);
            }
        };

        write_sidecar(&path, &sidecar).map_err(BackupError::Other)?;
        Ok(sidecar)
    }

    /// Runs pg_dump into `path` and returns the size of the finished file.
    async fn dump(&self, spec: &DumpSpec, path: &Path) -> Result<u64, BackupError> {
        match spec.format {
            BackupFormat::Compressed => {
                let temp = tempfile::Builder::new()
                    .prefix(".pgdump-")
                    .suffix(".sql")
                    .tempfile_in(self.ctx.catalog.root())
                    .with_context(|| format!("create temp file in {}", self.ctx.catalog.root().display()))?;
                let plain = DumpSpec {
                    format: BackupFormat::Plain,
                    ..*spec
                };
                self.run_pg_dump(&plain, temp.path()).await?;
                non_empty_size(temp.path())?;

                let source = temp.path().to_owned();
                let target = path.to_owned();
                tokio::task::spawn_blocking(move || gzip_file(&source, &target))
                    .await
                    .map_err(|e| BackupError::Compression {
                        path: path.to_owned(),
                        source: io::Error::other(e),
                    })?
                    .map_err(|source| BackupError::Compression {
                        path: path.to_owned(),
                        source,
                    })?;
            }
            BackupFormat::Plain | BackupFormat::CustomFormat => {
                self.run_pg_dump(spec, path).await?;
            }
        }
        non_empty_size(path)
    }

    async fn run_pg_dump(&self, spec: &DumpSpec, output: &Path) -> Result<(), BackupError> {
        let inv = self.ctx.tools.pg_dump(spec, output, self.plan.dump_timeout);
        self.ctx.runner.run(&inv).await?.check()?;
        Ok(())
    }

    async fn log_table_stats(&self) {
        match self.ctx.admin.table_stats(self.ctx.database()).await {
            Ok(stats) => {
                let total: i64 = stats.iter().map(|s| s.live_tuples).sum();
                info!(tables = stats.len(), total_rows = total, "database statistics before backup");
                for stat in stats.iter().take(10) {
                    info!(table = %format!("{}.{}", stat.schema, stat.table), rows = stat.live_tuples);
                }
            }
            Err(e) => warn!(error = %format!("{e:#}"), "could not read table statistics"),
        }
    }
}

fn non_empty_size(path: &Path) -> Result<u64, BackupError> {
    match fs::metadata(path) {
        Ok(meta) if meta.len() > 0 => Ok(meta.len()),
        _ => Err(BackupError::EmptyOutput(path.to_owned())),
    }
}

fn gzip_file(source: &Path, target: &Path) -> io::Result<()> {
    let mut reader = BufReader::new(File::open(source)?);
    let mut encoder = GzEncoder::new(BufWriter::new(File::create(target)?), Compression::default());
    io::copy(&mut reader, &mut encoder)?;
    encoder.finish()?.flush()
}

fn remove_partial(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => info!(file = %path.display(), "removed partial backup file"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(file = %path.display(), error = %e, "could not remove partial backup file"),
    }
}
