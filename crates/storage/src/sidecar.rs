use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use pg_backup_core::naming::sidecar_path;
use pg_backup_core::BackupSidecar;
use serde::de::DeserializeOwned;
use serde::Serialize;

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let raw = serde_json::to_string_pretty(value).context("serialize metadata")?;
    fs::write(path, raw).with_context(|| format!("write metadata: {}", path.display()))?;
    Ok(())
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = fs::read_to_string(path).with_context(|| format!("read metadata: {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parse metadata: {}", path.display()))
}

/// Writes `<stem>.json` next to `dump` and returns its path.
pub fn write_sidecar(dump: &Path, sidecar: &BackupSidecar) -> Result<PathBuf> {
    let path = sidecar_path(dump);
    write_json(&path, sidecar)?;
    Ok(path)
}

/// `Ok(None)` when the dump has no sidecar at all.
pub fn load_sidecar(dump: &Path) -> Result<Option<BackupSidecar>> {
    let path = sidecar_path(dump);
    if !path.exists() {
        return Ok(None);
    }
    read_json(&path).map(Some)
}
