use std::fmt::Write;

use pg_backup_core::RestoreStatus;
use pg_backup_engine::RestoreReport;
use pg_backup_storage::CatalogEntry;

pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

/// Numbered listing, newest first, as printed by `--list`.
pub fn backup_table(entries: &[CatalogEntry]) -> String {
    let mut out = String::new();
    if entries.is_empty() {
        out.push_str("No backups found.\n");
        return out;
    }
    let _ = writeln!(
        out,
        "{:>3}  {:<52} {:>10}  {:<19}  {:<11}  {}",
        "#", "file", "size", "modified", "type", "status"
    );
    for (i, entry) in entries.iter().enumerate() {
        let status = match &entry.sidecar {
            Some(s) if s.success => "ok",
            Some(_) => "FAILED",
            None => "-",
        };
        let _ = writeln!(
            out,
            "{:>3}  {:<52} {:>10}  {:<19}  {:<11}  {}",
            i + 1,
            entry.name,
            format_size(entry.size),
            entry.modified.format("%Y-%m-%d %H:%M:%S"),
            entry.backup_type.as_str(),
            status
        );
    }
    out
}

pub fn restore_summary(report: &RestoreReport) -> String {
    let mut out = String::new();
    let headline = match report.status {
        RestoreStatus::Succeeded => "Restore completed",
        RestoreStatus::VerificationFailed => "Restore loaded but verification FAILED",
        RestoreStatus::Failed => "Restore FAILED",
    };
    let _ = writeln!(
        out,
        "{headline}: {} -> {} in {:.1}s",
        report.backup_file.display(),
        report.database,
        report.elapsed.as_secs_f64()
    );
    if let Some(backup) = &report.pre_restore_backup {
        let _ = writeln!(out, "  pre-restore backup: {}", backup.display());
    }
    if let Some(verification) = &report.verification {
        for (name, value) in &verification.values {
            let _ = writeln!(out, "  {name}: {value}");
        }
        for (name, err) in &verification.failures {
            let _ = writeln!(out, "  {name}: FAILED ({err})");
        }
    }
    if let Some(record) = &report.record_path {
        let _ = writeln!(out, "  record: {}", record.display());
    }
    out
}
