use std::path::PathBuf;
use std::process::ExitCode;
use std::time::SystemTime;

use anyhow::{bail, Result};
use clap::Parser;
use pg_backup_cli::config::AppConfig;
use pg_backup_cli::report::{backup_table, format_size};
use pg_backup_cli::{bootstrap, build_context, BACKUP_LOG};
use pg_backup_core::BackupType;
use pg_backup_engine::BackupCreator;
use pg_backup_storage::prune_older_than;
use tracing::error;

#[derive(Parser, Debug)]
#[command(name = "db-backup")]
#[command(about = "Back up a PostgreSQL database with pg_dump")]
struct Args {
    /// full, schema_only or data_only
    #[arg(long = "type", default_value = "full")]
    backup_type: BackupType,

    /// List existing backups and exit
    #[arg(long)]
    list: bool,

    /// Delete backups older than the retention window and exit
    #[arg(long)]
    cleanup: bool,

    /// TOML config file; environment variables override it
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let cfg = match bootstrap(args.config.as_deref(), BACKUP_LOG) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("error: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    match run(args, cfg).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %format!("{e:#}"), "db-backup failed");
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args, cfg: AppConfig) -> Result<()> {
    let ctx = build_context(&cfg)?;

    if args.list {
        print!("{}", backup_table(&ctx.catalog.list_backups()?));
        return Ok(());
    }

    if args.cleanup {
        let report = prune_older_than(&ctx.catalog, cfg.backup.retention_days, SystemTime::now())?;
        println!(
            "Removed {} backup(s) older than {} days",
            report.removed.len(),
            cfg.backup.retention_days
        );
        for (path, err) in &report.failed {
            println!("  could not remove {}: {err}", path.display());
        }
        return Ok(());
    }

    let outcome = match BackupCreator::new(&ctx, cfg.backup_plan())
        .create_backup(args.backup_type)
        .await
    {
        Ok(outcome) => outcome,
        Err(e) if e.is_tool_missing() => {
            bail!("{e}; install the PostgreSQL client tools or set PG_BIN_DIR")
        }
        Err(e) => return Err(e.into()),
    };
    println!(
        "Backup written: {} ({})",
        outcome.path.display(),
        format_size(outcome.sidecar.file_size)
    );
    if let Some(retention) = &outcome.retention {
        if !retention.removed.is_empty() {
            println!("Removed {} expired backup(s)", retention.removed.len());
        }
    }
    Ok(())
}
