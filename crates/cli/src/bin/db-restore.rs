use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Result};
use clap::Parser;
use pg_backup_cli::config::{minutes, AppConfig};
use pg_backup_cli::prompt::{choose, StdinConfirm};
use pg_backup_cli::report::{backup_table, restore_summary};
use pg_backup_cli::{bootstrap, build_context, RESTORE_LOG};
use pg_backup_core::RestoreStatus;
use pg_backup_engine::{EngineContext, RestoreExecutor, RestoreOptions};
use tracing::{error, info};

const SELECTION_SIZE: usize = 10;

#[derive(Parser, Debug)]
#[command(name = "db-restore")]
#[command(about = "Restore a PostgreSQL database from a backup file")]
struct Args {
    /// Backup file (.sql, .sql.gz or .backup); a bare name is looked up in the backup directory
    backup_file: Option<PathBuf>,

    /// List available backups and exit
    #[arg(long)]
    list: bool,

    /// Skip the safety backup and every confirmation
    #[arg(long)]
    force: bool,

    /// Load into the existing database instead of replacing it
    #[arg(long)]
    no_clean: bool,

    /// Restore the newest successful backup
    #[arg(long, conflicts_with = "backup_file")]
    latest: bool,

    /// Validate headers, check the server first, take a self-recreating safety backup
    #[arg(long)]
    safe: bool,

    /// Skip the post-restore row counts
    #[arg(long)]
    no_verify: bool,

    /// Kill the load if it runs longer than this
    #[arg(long)]
    timeout_minutes: Option<u64>,

    /// TOML config file; environment variables override it
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let cfg = match bootstrap(args.config.as_deref(), RESTORE_LOG) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("error: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    match run(args, cfg).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!(error = %format!("{e:#}"), "db-restore failed");
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

/// `Ok(false)` when the restore ran but did not fully succeed.
async fn run(args: Args, cfg: AppConfig) -> Result<bool> {
    let ctx = build_context(&cfg)?;

    if args.list {
        print!("{}", backup_table(&ctx.catalog.list_backups()?));
        return Ok(true);
    }

    let backup_file = select_backup(&ctx, &args)?;
    let confirm = StdinConfirm;
    let mut opts = if args.safe {
        RestoreOptions::safe()
    } else {
        RestoreOptions::standard()
    };
    opts.force = args.force;
    opts.clean = !args.no_clean;
    opts.verify = !args.no_verify;
    opts.confirm_overwrite = true;
    opts.parallel_jobs = cfg.restore.parallel_jobs;
    opts.timeout = match args.timeout_minutes {
        Some(n) => Some(minutes(n)),
        None if args.safe => Some(cfg.restore.timeout()),
        None => None,
    };

    let executor = RestoreExecutor::new(&ctx, &confirm, cfg.backup_plan());
    let report = executor.restore(&backup_file, &opts).await?;
    print!("{}", restore_summary(&report));
    Ok(report.status == RestoreStatus::Succeeded)
}

fn select_backup(ctx: &EngineContext, args: &Args) -> Result<PathBuf> {
    if let Some(path) = &args.backup_file {
        return Ok(resolve_in_catalog(ctx, path));
    }

    if args.latest {
        return match ctx.catalog.latest_successful()? {
            Some(entry) => {
                info!(file = %entry.path.display(), "restoring latest backup");
                Ok(entry.path)
            }
            None => bail!("no successful backups in {}", ctx.catalog.root().display()),
        };
    }

    let mut entries = ctx.catalog.list_backups()?;
    entries.truncate(SELECTION_SIZE);
    if entries.is_empty() {
        bail!("no backups in {}", ctx.catalog.root().display());
    }
    print!("{}", backup_table(&entries));
    match choose("Backup to restore", entries.len()) {
        Some(index) => Ok(entries.swap_remove(index).path),
        None => bail!("no backup selected"),
    }
}

/// A relative path that does not exist is tried inside the backup directory.
fn resolve_in_catalog(ctx: &EngineContext, path: &Path) -> PathBuf {
    if path.is_relative() && !path.exists() {
        let candidate = ctx.catalog.root().join(path);
        if candidate.exists() {
            return candidate;
        }
    }
    path.to_owned()
}
