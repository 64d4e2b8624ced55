use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{Local, NaiveDateTime};
use pg_backup_core::{BackupType, RestoreRecord, RestoreStatus, ADMIN_DATABASE};
use pg_backup_storage::RestoreLease;
use tracing::{error, info, warn};

use crate::backup::{BackupCreator, BackupPlan};
use crate::context::EngineContext;
use crate::error::RestoreError;
use crate::inspect::{embedded_create_database, validate_backup_file, verify_checksum};
use crate::strategy::{strategy_for, LoadContext};
use crate::swap;
use crate::verify::{verify_database, VerificationReport};

const CONNECTIVITY_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_RESTORE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreOptions {
    /// Skip the safety backup and the confirmation for active connections.
    pub force: bool,
    /// Replace the target database instead of loading on top of it.
    pub clean: bool,
    /// Header sniffing, connectivity check, self-recreating safety backup
    /// and extended verification.
    pub safe: bool,
    pub verify: bool,
    /// Ask before anything touches the server that the target may be
    /// overwritten. Skipped under `force`.
    pub confirm_overwrite: bool,
    /// Wall-clock limit for the load subprocess.
    pub timeout: Option<Duration>,
    pub parallel_jobs: u32,
}

impl RestoreOptions {
    pub fn standard() -> Self {
        Self {
            force: false,
            clean: true,
            safe: false,
            verify: true,
            confirm_overwrite: false,
            timeout: None,
            parallel_jobs: 4,
        }
    }

    pub fn safe() -> Self {
        Self {
            safe: true,
            timeout: Some(DEFAULT_RESTORE_TIMEOUT),
            ..Self::standard()
        }
    }
}

impl Default for RestoreOptions {
    fn default() -> Self {
        Self::standard()
    }
}

/// Asks the operator before the target is overwritten and before active
/// sessions are killed.
pub trait Confirm: Send + Sync {
    fn confirm(&self, prompt: &str) -> bool;
}

/// How the dump reached the target database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMethod {
    /// Loaded into a staging database that was then renamed into place.
    Swap,
    /// Target dropped and recreated, then loaded.
    Recreate,
    /// The dump's own `CREATE DATABASE` ran through the admin database.
    SelfCreating,
    /// Loaded straight into the existing target.
    Direct,
}

#[derive(Debug)]
pub struct RestoreReport {
    pub status: RestoreStatus,
    pub database: String,
    pub backup_file: PathBuf,
    pub method: LoadMethod,
    pub pre_restore_backup: Option<PathBuf>,
    /// `None` when verification was switched off.
    pub verification: Option<VerificationReport>,
    pub record_path: Option<PathBuf>,
    pub elapsed: Duration,
}

pub struct RestoreExecutor<'a> {
    ctx: &'a EngineContext,
    confirm: &'a dyn Confirm,
    backup_plan: BackupPlan,
}

impl<'a> RestoreExecutor<'a> {
    pub fn new(ctx: &'a EngineContext, confirm: &'a dyn Confirm, backup_plan: BackupPlan) -> Self {
        Self {
            ctx,
            confirm,
            backup_plan,
        }
    }

    /// Restores `backup_file` into the configured database and writes a
    /// restore record whatever the outcome.
    pub async fn restore(
        &self,
        backup_file: &Path,
        opts: &RestoreOptions,
    ) -> Result<RestoreReport, RestoreError> {
        let started = Instant::now();
        let ts = Local::now().naive_local();
        let conn = self.ctx.connection();
        let mut record = RestoreRecord {
            restore_timestamp: ts,
            backup_file: backup_file.display().to_string(),
            database: conn.database.clone(),
            host: conn.host.clone(),
            success: false,
            duration_seconds: 0.0,
            pre_restore_backup: None,
            status: RestoreStatus::Failed,
            error: None,
            verification: Default::default(),
        };

        info!(file = %backup_file.display(), database = %conn.database, ?opts, "starting restore");
        let result = self.run(backup_file, opts, ts, &mut record).await;
        let elapsed = started.elapsed();
        record.duration_seconds = elapsed.as_secs_f64();

        match &result {
            Ok(report) => {
                record.status = report.status;
                record.success = report.status == RestoreStatus::Succeeded;
                if let Some(verification) = &report.verification {
                    record.verification = verification.to_record_map();
                }
            }
            Err(e) => {
                error!(error = %e, "restore failed");
                record.error = Some(e.to_string());
            }
        }

        let record_path = match self.ctx.catalog.write_restore_record(&record) {
            Ok(path) => Some(path),
            Err(e) => {
                warn!(error = %format!("{e:#}"), "could not write restore record");
                None
            }
        };

        result.map(|mut report| {
            report.record_path = record_path;
            report.elapsed = elapsed;
            info!(status = ?report.status, elapsed_secs = elapsed.as_secs_f64(), "restore finished");
            report
        })
    }

    async fn run(
        &self,
        backup_file: &Path,
        opts: &RestoreOptions,
        ts: NaiveDateTime,
        record: &mut RestoreRecord,
    ) -> Result<RestoreReport, RestoreError> {
        let admin = self.ctx.admin.as_ref();
        let database = self.ctx.database().to_owned();

        // 1. the file, before anything touches the server
        let inspection = validate_backup_file(backup_file, opts.safe)?;
        for warning in &inspection.warnings {
            warn!(file = %backup_file.display(), "{warning}");
        }
        verify_checksum(backup_file, inspection.sidecar.as_ref())?;
        let embedded = embedded_create_database(backup_file, inspection.format).map_err(|source| {
            RestoreError::BackupCorrupt {
                path: backup_file.to_owned(),
                reason: format!("cannot read dump header: {source}"),
            }
        })?;
        if let Some(embedded) = &embedded {
            if embedded != &database {
                return Err(RestoreError::DatabaseMismatch {
                    embedded: embedded.clone(),
                    target: database,
                });
            }
        }

        if opts.confirm_overwrite && !opts.force {
            let conn = self.ctx.connection();
            let prompt = format!(
                "Restore {} into database {database} on {}? All current data will be replaced.",
                backup_file.display(),
                conn.host
            );
            if !self.confirm.confirm(&prompt) {
                return Err(RestoreError::Cancelled);
            }
        }

        let _lease = RestoreLease::acquire(self.ctx.catalog.root(), &database)?;

        if opts.safe {
            self.check_connectivity(opts.force).await?;
        }

        if let Some(restored) = swap::recover_interrupted(admin, &database)
            .await
            .map_err(RestoreError::admin("recover interrupted restore"))?
        {
            info!(%database, from = %restored, "recovered database from interrupted restore");
        }

        // 2. safety backup
        let pre_restore_backup = if opts.force {
            info!("force set, skipping pre-restore backup");
            None
        } else {
            let path = self.pre_restore_backup(opts.safe).await?;
            record.pre_restore_backup = Some(path.display().to_string());
            Some(path)
        };

        // 3. census
        let active = admin
            .active_connections(&database)
            .await
            .map_err(RestoreError::admin("count active connections"))?;
        if active > 0 {
            warn!(%database, active, "database has active connections");
            if !opts.force {
                let prompt = format!(
                    "{database} has {active} active connection(s) that will be terminated. Continue?"
                );
                if !self.confirm.confirm(&prompt) {
                    return Err(RestoreError::Cancelled);
                }
            }
        }

        // 4. terminate
        let terminated = admin
            .terminate_connections(&database)
            .await
            .map_err(RestoreError::admin("terminate connections"))?;
        info!(%database, terminated, "terminated connections");

        // 5. + 6. recreate and load
        let strategy = strategy_for(inspection.format);
        let load_ctx = LoadContext {
            runner: self.ctx.runner.as_ref(),
            tools: &self.ctx.tools,
            parallel_jobs: opts.parallel_jobs,
            timeout: opts.timeout,
            scratch_dir: self.ctx.catalog.root(),
        };

        // data-only comes from the sidecar, never from the file name
        let data_only = inspection
            .sidecar
            .as_ref()
            .is_some_and(|s| s.backup_type == BackupType::DataOnly);
        if opts.clean && data_only {
            info!("data-only dump, loading into the existing database");
        }
        let replace = opts.clean && !strategy.cleans_itself() && !data_only;

        let method = if embedded.is_some() {
            info!(%database, "dump recreates its own database, loading through {ADMIN_DATABASE}");
            strategy.load(&load_ctx, backup_file, ADMIN_DATABASE).await?;
            LoadMethod::SelfCreating
        } else if replace {
            match swap::staging_name(&database, ts) {
                Some(staging) => {
                    swap::prepare_staging(admin, &staging)
                        .await
                        .map_err(RestoreError::admin("create staging database"))?;
                    if let Err(e) = strategy.load(&load_ctx, backup_file, &staging).await {
                        swap::discard(admin, &staging).await;
                        return Err(e);
                    }
                    swap::promote(admin, &database, &staging, ts)
                        .await
                        .map_err(RestoreError::admin("swap restored database into place"))?;
                    LoadMethod::Swap
                }
                None => {
                    warn!(%database, "name too long for a staging copy, recreating in place");
                    admin
                        .drop_database(&database)
                        .await
                        .map_err(RestoreError::admin("drop database"))?;
                    admin
                        .create_database(&database)
                        .await
                        .map_err(RestoreError::admin("create database"))?;
                    strategy.load(&load_ctx, backup_file, &database).await?;
                    LoadMethod::Recreate
                }
            }
        } else {
            let exists = admin
                .database_exists(&database)
                .await
                .map_err(RestoreError::admin("look up database"))?;
            if !exists {
                admin
                    .create_database(&database)
                    .await
                    .map_err(RestoreError::admin("create database"))?;
            }
            strategy.load(&load_ctx, backup_file, &database).await?;
            LoadMethod::Direct
        };
        info!(%database, ?method, format = %inspection.format, "dump loaded");

        // 7. verify
        let (status, verification) = if opts.verify {
            let report = verify_database(admin, &database, opts.safe).await;
            let status = if report.passed() {
                RestoreStatus::Succeeded
            } else {
                warn!(failed = ?report.failures.keys().collect::<Vec<_>>(), "verification failed");
                RestoreStatus::VerificationFailed
            };
            (status, Some(report))
        } else {
            (RestoreStatus::Succeeded, None)
        };

        Ok(RestoreReport {
            status,
            database,
            backup_file: backup_file.to_owned(),
            method,
            pre_restore_backup,
            verification,
            record_path: None,
            elapsed: Duration::ZERO,
        })
    }

    async fn check_connectivity(&self, force: bool) -> Result<(), RestoreError> {
        let outcome = tokio::time::timeout(CONNECTIVITY_TIMEOUT, self.ctx.admin.server_version()).await;
        let reason = match outcome {
            Ok(Ok(version)) => {
                info!(%version, "database server reachable");
                return Ok(());
            }
            Ok(Err(e)) => format!("{e:#}"),
            Err(_) => format!("no answer within {CONNECTIVITY_TIMEOUT:?}"),
        };
        if force {
            warn!(%reason, "database server check failed, continuing because force is set");
            Ok(())
        } else {
            Err(RestoreError::ConnectionFailed(reason))
        }
    }

    async fn pre_restore_backup(&self, safe: bool) -> Result<PathBuf, RestoreError> {
        let creator = BackupCreator::new(self.ctx, self.backup_plan);
        let result = if safe {
            creator.create_safety_backup().await
        } else {
            creator.write_backup(BackupType::Full).await.map(|(path, _)| path)
        };
        match result {
            Ok(path) => {
                info!(file = %path.display(), "pre-restore backup written");
                Ok(path)
            }
            Err(e) => Err(RestoreError::SafetyBackupFailed(e)),
        }
    }
}
