use std::path::{Path, PathBuf};
use std::time::Duration;

use pg_backup_core::{BackupFormat, BackupType, ConnectionDescriptor};

use crate::runner::Invocation;

/// What a single `pg_dump` run should produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DumpSpec {
    pub backup_type: BackupType,
    /// `CustomFormat` asks pg_dump for `--format=custom`; anything else is a
    /// plain SQL dump.
    pub format: BackupFormat,
    /// Emit `DROP DATABASE`/`CREATE DATABASE` so the dump recreates itself.
    pub recreate_database: bool,
}

/// Builds argv for the PostgreSQL client programs.
#[derive(Debug, Clone)]
pub struct PgTools {
    conn: ConnectionDescriptor,
    bin_dir: Option<PathBuf>,
}

impl PgTools {
    pub fn new(conn: ConnectionDescriptor, bin_dir: Option<PathBuf>) -> Self {
        Self { conn, bin_dir }
    }

    pub fn connection(&self) -> &ConnectionDescriptor {
        &self.conn
    }

    fn program(&self, name: &str) -> PathBuf {
        match &self.bin_dir {
            Some(dir) => dir.join(name),
            None => PathBuf::from(name),
        }
    }

    fn connect_args(&self, program: &str, database: &str) -> Invocation {
        Invocation::new(self.program(program))
            .args([
                "-h".to_owned(),
                self.conn.host.clone(),
                "-p".to_owned(),
                self.conn.port.to_string(),
                "-U".to_owned(),
                self.conn.user.clone(),
                "-d".to_owned(),
                database.to_owned(),
            ])
            .env("PGPASSWORD", self.conn.password.clone())
    }

    pub fn pg_dump(&self, spec: &DumpSpec, output: &Path, timeout: Option<Duration>) -> Invocation {
        let mut inv = self
            .connect_args("pg_dump", &self.conn.database)
            .args(["--verbose", "--no-password"]);
        inv = match spec.backup_type {
            BackupType::Full => inv,
            BackupType::SchemaOnly => inv.arg("--schema-only"),
            BackupType::DataOnly => inv.arg("--data-only"),
        };
        if spec.format == BackupFormat::CustomFormat {
            inv = inv.args(["--format=custom", "--compress=9"]);
        }
        if spec.recreate_database {
            inv = inv.args(["--clean", "--if-exists", "--create"]);
        }
        inv.arg("-f")
            .arg(output.display().to_string())
            .timeout(timeout)
    }

    pub fn pg_restore(
        &self,
        database: &str,
        file: &Path,
        parallel_jobs: u32,
        timeout: Option<Duration>,
    ) -> Invocation {
        self.connect_args("pg_restore", database)
            .args(["--verbose", "--no-password", "--clean", "--if-exists"])
            .arg(format!("--jobs={}", parallel_jobs.max(1)))
            .arg(file.display().to_string())
            .timeout(timeout)
    }

    /// Runs a SQL file, stopping at the first failing statement.
    pub fn psql_file(&self, database: &str, file: &Path, timeout: Option<Duration>) -> Invocation {
        self.connect_args("psql", database)
            .args(["--no-password", "-v", "ON_ERROR_STOP=1", "-f"])
            .arg(file.display().to_string())
            .timeout(timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tools() -> PgTools {
        PgTools::new(
            ConnectionDescriptor {
                host: "db.internal".into(),
                port: 6543,
                user: "backup".into(),
                password: "pw".into(),
                database: "shop".into(),
            },
            None,
        )
    }

    #[test]
    fn custom_full_dump_flags() {
        let spec = DumpSpec {
            backup_type: BackupType::Full,
            format: BackupFormat::CustomFormat,
            recreate_database: false,
        };
        let inv = tools().pg_dump(&spec, Path::new("/b/out.backup"), None);
        assert_eq!(inv.program, PathBuf::from("pg_dump"));
        assert_eq!(
            inv.args,
            vec![
                "-h", "db.internal", "-p", "6543", "-U", "backup", "-d", "shop", "--verbose",
                "--no-password", "--format=custom", "--compress=9", "-f", "/b/out.backup"
            ]
        );
        assert_eq!(inv.env, vec![("PGPASSWORD".to_owned(), "pw".to_owned())]);
    }

    #[test]
    fn schema_and_data_only_are_mutually_exclusive() {
        let schema = DumpSpec {
            backup_type: BackupType::SchemaOnly,
            format: BackupFormat::Plain,
            recreate_database: false,
        };
        let inv = tools().pg_dump(&schema, Path::new("x.sql"), None);
        assert!(inv.has_arg("--schema-only"));
        assert!(!inv.has_arg("--data-only"));
        assert!(!inv.has_arg("--format=custom"));

        let data = DumpSpec {
            backup_type: BackupType::DataOnly,
            ..schema
        };
        let inv = tools().pg_dump(&data, Path::new("x.sql"), None);
        assert!(inv.has_arg("--data-only"));
        assert!(!inv.has_arg("--schema-only"));
    }

    #[test]
    fn restore_tools_target_the_requested_database() {
        let restore = tools().pg_restore("shop", Path::new("a.backup"), 4, None);
        assert!(restore.has_arg("--jobs=4"));
        assert!(restore.has_arg("--if-exists"));
        assert_eq!(restore.args[7], "shop");

        let psql = tools().psql_file("postgres", Path::new("a.sql"), Some(Duration::from_secs(1)));
        assert_eq!(psql.args[7], "postgres");
        assert!(psql.has_arg("ON_ERROR_STOP=1"));
        assert_eq!(psql.timeout, Some(Duration::from_secs(1)));
    }

    #[test]
    fn bin_dir_prefixes_programs() {
        let tools = PgTools::new(ConnectionDescriptor::default(), Some(PathBuf::from("/usr/lib/postgresql/16/bin")));
        let inv = tools.psql_file("shop", Path::new("a.sql"), None);
        assert_eq!(inv.program, PathBuf::from("/usr/lib/postgresql/16/bin/psql"));
        assert_eq!(inv.program_name(), "psql");
    }
}
