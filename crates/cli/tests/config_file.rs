use std::path::Path;

use pg_backup_cli::build_context;
use pg_backup_cli::config::{load_config, AppConfig};
use pg_backup_core::BackupFormat;

#[test]
fn test_config_file_feeds_engine_context() {
    let tmp = tempfile::tempdir().unwrap();
    let config_path = tmp.path().join("pg-backup.toml");
    std::fs::write(
        &config_path,
        r#"
[database]
host = "db.internal"
user = "backup"
name = "shop"
bin_dir = "/usr/lib/postgresql/16/bin"

[backup]
path = "nightly"
format = "gzip"
retention_days = 14

[restore]
parallel_jobs = 8
timeout_minutes = 90
"#,
    )
    .unwrap();

    let file = load_config(&config_path).unwrap();
    let cfg = AppConfig::resolve(file, |_| None, tmp.path()).unwrap();

    assert_eq!(cfg.connection.host, "db.internal");
    assert_eq!(cfg.connection.port, 5432);
    assert_eq!(cfg.backup.path, tmp.path().join("nightly"));
    assert_eq!(cfg.backup.format, BackupFormat::Compressed);
    assert_eq!(cfg.restore.parallel_jobs, 8);
    assert_eq!(cfg.restore.timeout_minutes, 90);

    let plan = cfg.backup_plan();
    assert_eq!(plan.format, BackupFormat::Compressed);
    assert_eq!(plan.retention_days, 14);

    let ctx = build_context(&cfg).unwrap();
    assert!(ctx.catalog.root().is_dir());
    assert_eq!(ctx.database(), "shop");
    assert!(ctx.catalog.list_backups().unwrap().is_empty());
}

#[test]
fn test_password_never_shows_in_debug_output() {
    let cfg = AppConfig::resolve(
        Default::default(),
        |key| (key == "DB_PASSWORD").then(|| "hunter2".to_owned()),
        Path::new("/work"),
    )
    .unwrap();
    assert_eq!(cfg.connection.password, "hunter2");
    assert!(!format!("{cfg:?}").contains("hunter2"));
}

#[test]
fn test_malformed_config_file_is_reported() {
    let tmp = tempfile::tempdir().unwrap();
    let config_path = tmp.path().join("broken.toml");
    std::fs::write(&config_path, "[backup]\nretention_days = \"thirty\"\n").unwrap();
    let err = load_config(&config_path).unwrap_err();
    assert!(format!("{err:#}").contains("parsing config file"));
}
