use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// On-disk layout of a dump, fixed by its extension.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BackupFormat {
    /// `.sql`, fed to the SQL shell.
    Plain,
    /// `.sql.gz`, decompressed and then handled as `Plain`.
    Compressed,
    /// `.backup`, pg_dump custom format for the structured-restore utility.
    #[serde(rename = "custom")]
    CustomFormat,
}

pub const CUSTOM_FORMAT_MAGIC: &[u8] = b"PGDMP";

impl BackupFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?;
        Self::from_file_name(name)
    }

    pub fn from_file_name(name: &str) -> Option<Self> {
        if name.ends_with(".sql.gz") {
            Some(BackupFormat::Compressed)
        } else if name.ends_with(".sql") {
            Some(BackupFormat::Plain)
        } else if name.ends_with(".backup") {
            Some(BackupFormat::CustomFormat)
        } else {
            None
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            BackupFormat::Plain => ".sql",
            BackupFormat::Compressed => ".sql.gz",
            BackupFormat::CustomFormat => ".backup",
        }
    }

    pub fn is_compressed(&self) -> bool {
        !matches!(self, BackupFormat::Plain)
    }

    pub fn label(&self) -> &'static str {
        match self {
            BackupFormat::Plain => "plain_sql",
            BackupFormat::Compressed => "compressed_sql",
            BackupFormat::CustomFormat => "custom",
        }
    }
}

impl fmt::Display for BackupFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_follows_extension_only() {
        assert_eq!(
            BackupFormat::from_file_name("shop_full_20260101_000000.sql.gz"),
            Some(BackupFormat::Compressed)
        );
        assert_eq!(BackupFormat::from_file_name("a.sql"), Some(BackupFormat::Plain));
        assert_eq!(
            BackupFormat::from_file_name("a.backup"),
            Some(BackupFormat::CustomFormat)
        );
        assert_eq!(BackupFormat::from_file_name("a.json"), None);
        assert_eq!(BackupFormat::from_file_name("a.sql.bak"), None);
    }

    #[test]
    fn custom_format_serializes_as_custom() {
        let json = serde_json::to_string(&BackupFormat::CustomFormat).expect("serialize");
        assert_eq!(json, "\"custom\"");
    }
}
