use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use flate2::read::GzDecoder;
use pg_backup_core::{file_hash, BackupFormat, BackupSidecar, BackupType, CUSTOM_FORMAT_MAGIC};
use pg_backup_storage::load_sidecar;
use tracing::{debug, warn};

use crate::error::RestoreError;

const GZIP_MAGIC: &[u8] = &[0x1f, 0x8b];
const SQL_HEADER_WINDOW: usize = 100;
const SMALL_FILE_BYTES: u64 = 1024;
const CREATE_DATABASE_WINDOW: u64 = 64 * 1024;

/// What intake learned about a dump before anything touches the server.
#[derive(Debug, Clone)]
pub struct BackupInspection {
    pub format: BackupFormat,
    pub backup_type: BackupType,
    pub size: u64,
    pub sidecar: Option<BackupSidecar>,
    pub warnings: Vec<String>,
}

/// Checks a dump file is present, non-empty, readable and of a known format.
///
/// With `strict` the leading bytes must also look like the format the
/// extension promises: `PGDMP` for custom dumps and the gzip magic for
/// `.sql.gz`. Plain SQL that lacks the usual pg_dump banner and very small
/// files only produce warnings.
pub fn validate_backup_file(path: &Path, strict: bool) -> Result<BackupInspection, RestoreError> {
    let meta = match std::fs::metadata(path) {
        Ok(meta) if meta.is_file() => meta,
        Ok(_) => {
            return Err(RestoreError::BackupCorrupt {
                path: path.to_owned(),
                reason: "not a regular file".into(),
            })
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(RestoreError::BackupNotFound(path.to_owned()))
        }
        Err(source) => {
            return Err(RestoreError::Io {
                path: path.to_owned(),
                source,
            })
        }
    };

    let format =
        BackupFormat::from_path(path).ok_or_else(|| RestoreError::UnsupportedFormat(path.to_owned()))?;

    let size = meta.len();
    if size == 0 {
        return Err(RestoreError::BackupCorrupt {
            path: path.to_owned(),
            reason: "file is empty".into(),
        });
    }

    let head = read_head(path, SMALL_FILE_BYTES as usize).map_err(|source| RestoreError::Io {
        path: path.to_owned(),
        source,
    })?;

    let mut warnings = Vec::new();
    if strict {
        match format {
            BackupFormat::CustomFormat if !head.starts_with(CUSTOM_FORMAT_MAGIC) => {
                return Err(RestoreError::BackupCorrupt {
                    path: path.to_owned(),
                    reason: "missing PGDMP header, not a pg_dump custom-format archive".into(),
                });
            }
            BackupFormat::Compressed if !head.starts_with(GZIP_MAGIC) => {
                return Err(RestoreError::BackupCorrupt {
                    path: path.to_owned(),
                    reason: "missing gzip header".into(),
                });
            }
            BackupFormat::Plain => {
                let window = String::from_utf8_lossy(&head[..head.len().min(SQL_HEADER_WINDOW)]);
                if !window.contains("PostgreSQL database dump") && !window.contains("CREATE") {
                    warnings.push("file does not start like a pg_dump SQL script".to_owned());
                }
            }
            _ => {}
        }
        if size < SMALL_FILE_BYTES {
            warnings.push(format!("file is only {size} bytes"));
        }
    }

    let sidecar = match load_sidecar(path) {
        Ok(sidecar) => sidecar,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "ignoring unreadable sidecar");
            None
        }
    };
    let backup_type = match &sidecar {
        Some(s) => s.backup_type,
        None => {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            BackupType::infer_from_file_name(&name)
        }
    };

    debug!(path = %path.display(), %format, %backup_type, size, "backup file accepted");
    Ok(BackupInspection {
        format,
        backup_type,
        size,
        sidecar,
        warnings,
    })
}

/// Compares the file against the checksum its sidecar recorded, if any.
pub fn verify_checksum(path: &Path, sidecar: Option<&BackupSidecar>) -> Result<(), RestoreError> {
    let Some(expected) = sidecar.and_then(|s| s.checksum.as_deref()) else {
        return Ok(());
    };
    let actual = file_hash(path).map_err(|source| RestoreError::Io {
        path: path.to_owned(),
        source,
    })?;
    if actual != expected {
        return Err(RestoreError::ChecksumMismatch {
            path: path.to_owned(),
            expected: expected.to_owned(),
            actual,
        });
    }
    Ok(())
}

/// Name of the database a SQL dump creates for itself (pg_dump `--create`),
/// looked up in the first 64 KiB of the script. Custom-format archives
/// always return `None`.
pub fn embedded_create_database(path: &Path, format: BackupFormat) -> io::Result<Option<String>> {
    let file = File::open(path)?;
    let mut head = Vec::new();
    match format {
        BackupFormat::Plain => {
            file.take(CREATE_DATABASE_WINDOW).read_to_end(&mut head)?;
        }
        BackupFormat::Compressed => {
            GzDecoder::new(file)
                .take(CREATE_DATABASE_WINDOW)
                .read_to_end(&mut head)?;
        }
        BackupFormat::CustomFormat => return Ok(None),
    }

    let text = String::from_utf8_lossy(&head);
    Ok(text
        .lines()
        .find_map(|line| line.strip_prefix("CREATE DATABASE "))
        .and_then(parse_identifier))
}

fn parse_identifier(rest: &str) -> Option<String> {
    let rest = rest.trim_start();
    if let Some(quoted) = rest.strip_prefix('"') {
        let mut name = String::new();
        let mut chars = quoted.chars().peekable();
        while let Some(c) = chars.next() {
            if c == '"' {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    name.push('"');
                } else {
                    return Some(name);
                }
            } else {
                name.push(c);
            }
        }
        return None;
    }
    let name: String = rest
        .chars()
        .take_while(|c| !c.is_whitespace() && *c != ';')
        .collect();
    (!name.is_empty()).then_some(name)
}

fn read_head(path: &Path, limit: usize) -> io::Result<Vec<u8>> {
    let mut head = Vec::with_capacity(limit);
    File::open(path)?.take(limit as u64).read_to_end(&mut head)?;
    Ok(head)
}
