use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use pg_backup_core::{BackupFormat, ConnectionDescriptor};
use pg_backup_engine::BackupPlan;
use serde::Deserialize;
use tracing::warn;

const DEFAULT_BACKUP_DIR: &str = "./backups";

/// Optional TOML file passed with `--config`. Every value can also come from
/// the environment, which wins.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    pub database: DatabaseConfig,
    pub backup: BackupConfig,
    pub restore: RestoreConfig,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct DatabaseConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub name: Option<String>,
    pub bin_dir: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct BackupConfig {
    pub path: Option<String>,
    pub retention_days: Option<i64>,
    pub format: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct RestoreConfig {
    pub parallel_jobs: Option<u32>,
    pub timeout_minutes: Option<u64>,
}

pub fn load_config(path: &Path) -> Result<FileConfig> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("reading config file {path:?}"))?;
    toml::from_str(&contents).with_context(|| format!("parsing config file {path:?}"))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupSettings {
    pub path: PathBuf,
    pub retention_days: i64,
    pub format: BackupFormat,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreSettings {
    pub parallel_jobs: u32,
    pub timeout_minutes: u64,
}

impl RestoreSettings {
    pub fn timeout(&self) -> Duration {
        minutes(self.timeout_minutes)
    }
}

/// Saturates instead of overflowing on absurd inputs.
pub fn minutes(n: u64) -> Duration {
    Duration::from_secs(n.saturating_mul(60))
}

/// Resolved configuration, built once in `main` and passed down by reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub connection: ConnectionDescriptor,
    pub backup: BackupSettings,
    pub restore: RestoreSettings,
    pub pg_bin_dir: Option<PathBuf>,
}

impl AppConfig {
    /// `.env`, then the optional config file, then the process environment.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        dotenvy::dotenv().ok();
        let file = match config_path {
            Some(path) => load_config(path)?,
            None => FileConfig::default(),
        };
        let cwd = std::env::current_dir().context("resolve current directory")?;
        Self::resolve(file, |key| std::env::var(key).ok(), &cwd)
    }

    /// Environment (through `env`) over file over defaults.
    pub fn resolve(
        file: FileConfig,
        env: impl Fn(&str) -> Option<String>,
        cwd: &Path,
    ) -> Result<Self> {
        let defaults = ConnectionDescriptor::default();
        let connection = ConnectionDescriptor {
            host: env("DB_HOST")
                .or(file.database.host)
                .unwrap_or(defaults.host),
            port: match env("DB_PORT") {
                Some(raw) => raw
                    .parse()
                    .with_context(|| format!("DB_PORT is not a port number: {raw:?}"))?,
                None => file.database.port.unwrap_or(defaults.port),
            },
            user: env("DB_USER")
                .or(file.database.user)
                .unwrap_or(defaults.user),
            password: env("DB_PASSWORD")
                .or(file.database.password)
                .unwrap_or(defaults.password),
            database: env("DB_NAME")
                .or(file.database.name)
                .unwrap_or(defaults.database),
        };

        let raw_path = env("BACKUP_PATH")
            .or(file.backup.path)
            .unwrap_or_else(|| DEFAULT_BACKUP_DIR.to_owned());
        let retention_days = match env("BACKUP_RETENTION_DAYS") {
            Some(raw) => raw
                .parse()
                .with_context(|| format!("BACKUP_RETENTION_DAYS is not a number: {raw:?}"))?,
            None => file.backup.retention_days.unwrap_or(30),
        };
        if retention_days < 0 {
            bail!("BACKUP_RETENTION_DAYS must not be negative");
        }
        let format = match env("BACKUP_FORMAT").or(file.backup.format) {
            Some(raw) => parse_backup_format(&raw)?,
            None => BackupFormat::CustomFormat,
        };

        let parallel_jobs = match env("RESTORE_PARALLEL_JOBS") {
            Some(raw) => raw
                .parse()
                .with_context(|| format!("RESTORE_PARALLEL_JOBS is not a number: {raw:?}"))?,
            None => file.restore.parallel_jobs.unwrap_or(4),
        };
        let timeout_minutes = match env("RESTORE_TIMEOUT_MINUTES") {
            Some(raw) => raw
                .parse()
                .with_context(|| format!("RESTORE_TIMEOUT_MINUTES is not a number: {raw:?}"))?,
            None => file.restore.timeout_minutes.unwrap_or(30),
        };

        let pg_bin_dir = env("PG_BIN_DIR")
            .or(file.database.bin_dir)
            .filter(|d| !d.trim().is_empty())
            .map(PathBuf::from);

        Ok(Self {
            connection,
            backup: BackupSettings {
                path: normalize_backup_path(&raw_path, cwd, cfg!(windows)),
                retention_days,
                format,
            },
            restore: RestoreSettings {
                parallel_jobs: parallel_jobs.max(1),
                timeout_minutes,
            },
            pg_bin_dir,
        })
    }

    pub fn backup_plan(&self) -> BackupPlan {
        BackupPlan {
            format: self.backup.format,
            retention_days: self.backup.retention_days,
            dump_timeout: None,
        }
    }
}

/// `custom`, `plain` or `gzip`.
pub fn parse_backup_format(raw: &str) -> Result<BackupFormat> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "custom" | "backup" => Ok(BackupFormat::CustomFormat),
        "plain" | "sql" => Ok(BackupFormat::Plain),
        "gzip" | "gz" | "sql.gz" => Ok(BackupFormat::Compressed),
        other => bail!("unknown BACKUP_FORMAT {other:?}, expected custom, plain or gzip"),
    }
}

/// Relative paths resolve against `cwd`. On Windows a Unix-style absolute
/// path (`/var/backups`) is almost always a leftover from another machine's
/// `.env`, so the default directory is used instead.
pub fn normalize_backup_path(raw: &str, cwd: &Path, windows: bool) -> PathBuf {
    let raw = if windows && raw.starts_with('/') {
        warn!(path = raw, default = DEFAULT_BACKUP_DIR, "ignoring Unix-style BACKUP_PATH on Windows");
        DEFAULT_BACKUP_DIR
    } else {
        raw
    };
    let path = Path::new(raw);
    if path.is_absolute() {
        path.to_owned()
    } else {
        cwd.join(path.strip_prefix("./").unwrap_or(path))
    }
}
