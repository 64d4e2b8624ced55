use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::format::BackupFormat;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BackupType {
    Full,
    SchemaOnly,
    DataOnly,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown backup type {0:?} (expected full, schema_only or data_only)")]
pub struct ParseBackupTypeError(pub String);

impl BackupType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupType::Full => "full",
            BackupType::SchemaOnly => "schema_only",
            BackupType::DataOnly => "data_only",
        }
    }

    /// Best-effort guess for dumps that have no sidecar.
    pub fn infer_from_file_name(name: &str) -> Self {
        if name.contains("schema") {
            BackupType::SchemaOnly
        } else if name.contains("data") {
            BackupType::DataOnly
        } else {
            BackupType::Full
        }
    }
}

impl fmt::Display for BackupType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackupType {
    type Err = ParseBackupTypeError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "full" => Ok(BackupType::Full),
            "schema_only" => Ok(BackupType::SchemaOnly),
            "data_only" => Ok(BackupType::DataOnly),
            other => Err(ParseBackupTypeError(other.to_owned())),
        }
    }
}

/// JSON document stored next to every dump file, successful or not.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackupSidecar {
    pub backup_file: String,
    pub backup_type: BackupType,
    pub database: String,
    pub host: String,
    pub timestamp: NaiveDateTime,
    pub success: bool,
    pub file_size: u64,
    pub compression: bool,
    pub retention_days: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<BackupFormat>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewBackupSidecar {
    pub backup_file: String,
    pub backup_type: BackupType,
    pub format: BackupFormat,
    pub database: String,
    pub host: String,
    pub timestamp: NaiveDateTime,
    pub retention_days: i64,
}

impl NewBackupSidecar {
    pub fn succeeded(self, file_size: u64, checksum: String, duration_seconds: f64) -> BackupSidecar {
        let mut sidecar = self.into_sidecar(duration_seconds);
        sidecar.success = true;
        sidecar.file_size = file_size;
        sidecar.checksum = Some(checksum);
        sidecar
    }

    pub fn failed(self, error: String, duration_seconds: f64) -> BackupSidecar {
        let mut sidecar = self.into_sidecar(duration_seconds);
        sidecar.error = Some(error);
        sidecar
    }

    fn into_sidecar(self, duration_seconds: f64) -> BackupSidecar {
        BackupSidecar {
            backup_file: self.backup_file,
            backup_type: self.backup_type,
            database: self.database,
            host: self.host,
            timestamp: self.timestamp,
            success: false,
            file_size: 0,
            compression: self.format.is_compressed(),
            retention_days: self.retention_days,
            format: Some(self.format),
            duration_seconds: Some(duration_seconds),
            checksum: None,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RestoreStatus {
    Succeeded,
    /// Data was loaded but one of the verification queries failed.
    VerificationFailed,
    Failed,
}

/// Audit record written after every restore attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RestoreRecord {
    pub restore_timestamp: NaiveDateTime,
    pub backup_file: String,
    pub database: String,
    pub host: String,
    pub success: bool,
    pub duration_seconds: f64,
    pub pre_restore_backup: Option<String>,
    pub status: RestoreStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub verification: BTreeMap<String, String>,
}
