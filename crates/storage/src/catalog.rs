use std::fs::{self, Metadata};
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use pg_backup_core::naming::{
    format_timestamp, restore_record_file_name, RESTORE_RECORD_PREFIX, SAFETY_BACKUP_PREFIX,
};
use pg_backup_core::{BackupFormat, BackupSidecar, BackupType, RestoreRecord};
use tracing::{debug, info, warn};

use crate::sidecar::{load_sidecar, write_json};

/// Names earlier tooling wrote dumps under, kept so old files stay visible.
const LEGACY_PATTERNS: &[&str] = &[
    "ecommerce_backup_*",
    "ecommerce_data_*",
    "ecommerce_schema_*",
    "ecommerce_db_*",
];

/// Directory of dump files plus their sidecars and restore records.
#[derive(Debug, Clone)]
pub struct BackupCatalog {
    root: PathBuf,
    patterns: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct CatalogEntry {
    pub path: PathBuf,
    pub name: String,
    pub size: u64,
    pub modified: DateTime<Local>,
    pub format: BackupFormat,
    pub backup_type: BackupType,
    /// `None` when no readable sidecar exists.
    pub sidecar: Option<BackupSidecar>,
}

impl CatalogEntry {
    /// Files without a sidecar are assumed good.
    pub fn is_successful(&self) -> bool {
        self.sidecar.as_ref().map(|s| s.success).unwrap_or(true)
    }
}

impl BackupCatalog {
    pub fn new(root: impl Into<PathBuf>, database: &str) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .with_context(|| format!("create backup directory: {}", root.display()))?;
        Ok(Self {
            root,
            patterns: default_patterns(database),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, file_name: &str) -> PathBuf {
        self.root.join(file_name)
    }

    /// Every dump in the directory matching one of the catalog patterns,
    /// newest first by modification time.
    pub fn list_backups(&self) -> Result<Vec<CatalogEntry>> {
        debug!(root = %self.root.display(), patterns = ?self.patterns, "scanning backup directory");

        let mut entries = Vec::new();
        let dir = fs::read_dir(&self.root)
            .with_context(|| format!("read backup directory: {}", self.root.display()))?;
        for item in dir {
            let item = item.context("read backup directory entry")?;
            let name = item.file_name().to_string_lossy().into_owned();
            let Some(format) = BackupFormat::from_file_name(&name) else {
                continue;
            };
            if !self.patterns.iter().any(|p| wildcard_match(p, &name)) {
                continue;
            }
            let Some(meta) = present(item.metadata(), &name)? else {
                continue;
            };
            if !meta.is_file() {
                continue;
            }
            let modified = meta
                .modified()
                .with_context(|| format!("read mtime of {name}"))?;

            let path = item.path();
            let sidecar = match load_sidecar(&path) {
                Ok(found) => found,
                Err(e) => {
                    warn!(file = %name, error = %e, "ignoring unreadable sidecar");
                    None
                }
            };
            let backup_type = sidecar
                .as_ref()
                .map(|s| s.backup_type)
                .unwrap_or_else(|| BackupType::infer_from_file_name(&name));

            entries.push(CatalogEntry {
                path,
                name,
                size: meta.len(),
                modified: modified.into(),
                format,
                backup_type,
                sidecar,
            });
        }

        entries.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| b.name.cmp(&a.name)));
        info!(count = entries.len(), root = %self.root.display(), "found backup files");
        Ok(entries)
    }

    pub fn latest_successful(&self) -> Result<Option<CatalogEntry>> {
        Ok(self.list_backups()?.into_iter().find(CatalogEntry::is_successful))
    }

    /// Writes `restore_<timestamp>.json`. A second record in the same second
    /// gets a numeric suffix instead of overwriting the first.
    pub fn write_restore_record(&self, record: &RestoreRecord) -> Result<PathBuf> {
        let mut path = self.path_for(&restore_record_file_name(record.restore_timestamp));
        let mut n = 1;
        while path.exists() {
            path = self.path_for(&format!(
                "{RESTORE_RECORD_PREFIX}{}_{n}.json",
                format_timestamp(record.restore_timestamp)
            ));
            n += 1;
        }
        write_json(&path, record)?;
        info!(path = %path.display(), "restore record saved");
        Ok(path)
    }
}

pub fn default_patterns(database: &str) -> Vec<String> {
    let mut patterns = vec![
        format!("{database}_*"),
        "*_backup_*".to_owned(),
        format!("{SAFETY_BACKUP_PREFIX}*"),
    ];
    patterns.extend(LEGACY_PATTERNS.iter().map(|p| (*p).to_owned()));
    patterns
}

/// Shell-style match where `*` spans any run of characters.
fn wildcard_match(pattern: &str, name: &str) -> bool {
    let mut parts = pattern.split('*');
    let first = parts.next().unwrap_or_default();
    let Some(mut rest) = name.strip_prefix(first) else {
        return false;
    };
    let remaining: Vec<&str> = parts.collect();
    let Some((last, middle)) = remaining.split_last() else {
        return rest.is_empty();
    };
    for part in middle {
        match rest.find(part) {
            Some(idx) => rest = &rest[idx + part.len()..],
            None => return false,
        }
    }
    rest.ends_with(last)
}

/// `None` for a file removed between the directory read and the stat, for
/// example by a concurrent retention sweep.
fn present(meta: io::Result<Metadata>, name: &str) -> Result<Option<Metadata>> {
    match meta {
        Ok(meta) => Ok(Some(meta)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(file = %name, "backup file vanished while scanning");
            Ok(None)
        }
        Err(e) => Err(e).with_context(|| format!("stat backup file: {name}")),
    }
}
