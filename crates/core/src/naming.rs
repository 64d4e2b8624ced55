use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;

use crate::backup::BackupType;
use crate::format::BackupFormat;

pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";
pub const SAFETY_BACKUP_PREFIX: &str = "safety_backup_before_restore_";
pub const RESTORE_RECORD_PREFIX: &str = "restore_";

pub fn format_timestamp(ts: NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// `<database>_<type>_<timestamp><ext>`
pub fn backup_file_name(
    database: &str,
    backup_type: BackupType,
    format: BackupFormat,
    ts: NaiveDateTime,
) -> String {
    format!(
        "{database}_{}_{}{}",
        backup_type.as_str(),
        format_timestamp(ts),
        format.extension()
    )
}

pub fn safety_backup_file_name(ts: NaiveDateTime) -> String {
    format!("{SAFETY_BACKUP_PREFIX}{}.sql", format_timestamp(ts))
}

pub fn restore_record_file_name(ts: NaiveDateTime) -> String {
    format!("{RESTORE_RECORD_PREFIX}{}.json", format_timestamp(ts))
}

/// File name with the dump extension stripped, if it has one.
pub fn dump_stem(name: &str) -> &str {
    match BackupFormat::from_file_name(name) {
        Some(format) => &name[..name.len() - format.extension().len()],
        None => name,
    }
}

/// `shop_full_20260101_000000.sql.gz` -> `shop_full_20260101_000000.json`
pub fn sidecar_path(dump: &Path) -> PathBuf {
    let name = dump
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    dump.with_file_name(format!("{}.json", dump_stem(&name)))
}
