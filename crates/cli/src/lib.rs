pub mod config;
pub mod prompt;
pub mod report;

use std::fs::{self, OpenOptions};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use pg_backup_engine::{EngineContext, PgTools, PostgresAdmin, ProcessRunner};
use pg_backup_storage::BackupCatalog;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::AppConfig;

const ADMIN_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub const BACKUP_LOG: &str = "backup.log";
pub const RESTORE_LOG: &str = "restore.log";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Loads the configuration, then installs logging to the console and to
/// `log_name` inside the backup directory.
pub fn bootstrap(config_path: Option<&Path>, log_name: &str) -> Result<AppConfig> {
    let console = fmt().with_env_filter(env_filter()).with_target(false).finish();
    let cfg = tracing::subscriber::with_default(console, || AppConfig::load(config_path))?;
    init_tracing(Some(&cfg.backup.path.join(log_name)))?;
    Ok(cfg)
}

/// Console output filtered by `RUST_LOG` (`info` when unset), plus an
/// appending plain-text copy in `log_file` when given. A log file that cannot
/// be opened costs the file copy only.
pub fn init_tracing(log_file: Option<&Path>) -> Result<()> {
    let file = match log_file.map(open_log).transpose() {
        Ok(file) => file,
        Err(e) => {
            eprintln!("warning: {e:#}, logging to the console only");
            None
        }
    };
    let file_layer = file.map(|f| fmt::layer().with_ansi(false).with_writer(Arc::new(f)));

    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().with_target(false))
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))
}

fn open_log(path: &Path) -> Result<fs::File> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).with_context(|| format!("create log directory {}", dir.display()))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open log file {}", path.display()))
}

/// Wires the real process runner and Postgres admin connection.
pub fn build_context(cfg: &AppConfig) -> Result<EngineContext> {
    let catalog = BackupCatalog::new(&cfg.backup.path, &cfg.connection.database)?;
    Ok(EngineContext {
        catalog,
        tools: PgTools::new(cfg.connection.clone(), cfg.pg_bin_dir.clone()),
        runner: Arc::new(ProcessRunner),
        admin: Arc::new(PostgresAdmin::new(cfg.connection.clone(), ADMIN_CONNECT_TIMEOUT)),
    })
}
