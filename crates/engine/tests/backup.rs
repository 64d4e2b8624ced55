mod common;

use std::io::Read;
use std::time::{Duration, SystemTime};

use common::{context, FakeServer, DB};
use pg_backup_core::naming::sidecar_path;
use pg_backup_core::{file_hash, BackupFormat, BackupSidecar, BackupType};
use pg_backup_engine::{BackupCreator, BackupError, BackupPlan, ToolError};
use pg_backup_storage::sidecar::read_json;

fn plan(format: BackupFormat) -> BackupPlan {
    BackupPlan {
        format,
        ..BackupPlan::default()
    }
}

#[tokio::test]
async fn test_custom_backup_records_size_and_checksum() {
    let tmp = tempfile::tempdir().unwrap();
    let server = FakeServer::with_database(DB, 12, 0);
    let ctx = context(tmp.path(), &server);

    let outcome = BackupCreator::new(&ctx, plan(BackupFormat::CustomFormat))
        .create_backup(BackupType::Full)
        .await
        .unwrap();

    let name = outcome.path.file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("shop_full_") && name.ends_with(".backup"), "{name}");
    assert!(std::fs::read(&outcome.path).unwrap().starts_with(b"PGDMP"));

    let sidecar: BackupSidecar = read_json(&sidecar_path(&outcome.path)).unwrap();
    assert!(sidecar.success);
    assert!(sidecar.file_size > 0);
    assert_eq!(sidecar.file_size, std::fs::metadata(&outcome.path).unwrap().len());
    assert_eq!(sidecar.checksum, Some(file_hash(&outcome.path).unwrap()));
    assert_eq!(sidecar.format, Some(BackupFormat::CustomFormat));
    assert!(sidecar.compression);
    assert_eq!(sidecar, outcome.sidecar);
}

#[tokio::test]
async fn test_gzip_backup_compresses_a_plain_dump() {
    let tmp = tempfile::tempdir().unwrap();
    let server = FakeServer::with_database(DB, 3, 0);
    let ctx = context(tmp.path(), &server);

    let outcome = BackupCreator::new(&ctx, plan(BackupFormat::Compressed))
        .create_backup(BackupType::Full)
        .await
        .unwrap();

    assert!(outcome.path.to_string_lossy().ends_with(".sql.gz"));
    let mut script = String::new();
    flate2::read::GzDecoder::new(std::fs::File::open(&outcome.path).unwrap())
        .read_to_string(&mut script)
        .unwrap();
    assert_eq!(script.matches("INSERT INTO users").count(), 3);

    let temp_left = std::fs::read_dir(tmp.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .any(|e| e.file_name().to_string_lossy().starts_with(".pgdump-"));
    assert!(!temp_left);
}

#[tokio::test]
async fn test_schema_only_plain_backup() {
    let tmp = tempfile::tempdir().unwrap();
    let server = FakeServer::with_database(DB, 3, 0);
    let ctx = context(tmp.path(), &server);

    let outcome = BackupCreator::new(&ctx, plan(BackupFormat::Plain))
        .create_backup(BackupType::SchemaOnly)
        .await
        .unwrap();

    let name = outcome.path.file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("shop_schema_only_") && name.ends_with(".sql"), "{name}");
    assert!(!outcome.sidecar.compression);
    assert_eq!(outcome.sidecar.backup_type, BackupType::SchemaOnly);
}

#[tokio::test]
async fn test_failed_dump_removes_partial_file_and_records_failure() {
    let tmp = tempfile::tempdir().unwrap();
    let server = FakeServer::with_database(DB, 3, 0);
    server.state.lock().unwrap().failing_tool = Some("pg_dump".into());
    let ctx = context(tmp.path(), &server);

    let err = BackupCreator::new(&ctx, plan(BackupFormat::Plain))
        .create_backup(BackupType::Full)
        .await
        .unwrap_err();
    assert!(matches!(err, BackupError::Tool(ToolError::Failed { .. })), "got {err:?}");

    let files: Vec<String> = std::fs::read_dir(tmp.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    assert!(!files.iter().any(|f| f.ends_with(".sql")), "{files:?}");

    let sidecar_file = files.iter().find(|f| f.ends_with(".json")).expect("failure sidecar");
    let sidecar: BackupSidecar = read_json(&tmp.path().join(sidecar_file)).unwrap();
    assert!(!sidecar.success);
    assert_eq!(sidecar.file_size, 0);
    assert!(sidecar.error.unwrap().contains("connection to server failed"));
}

#[tokio::test]
async fn test_missing_pg_dump_is_its_own_error() {
    let tmp = tempfile::tempdir().unwrap();
    let server = FakeServer::with_database(DB, 3, 0);
    server.state.lock().unwrap().missing_tool = Some("pg_dump".into());
    let ctx = context(tmp.path(), &server);

    let err = BackupCreator::new(&ctx, BackupPlan::default())
        .create_backup(BackupType::Full)
        .await
        .unwrap_err();
    assert!(err.is_tool_missing(), "got {err:?}");
}

#[tokio::test]
async fn test_empty_dump_is_a_failure() {
    let tmp = tempfile::tempdir().unwrap();
    let server = FakeServer::with_database(DB, 3, 0);
    server.state.lock().unwrap().empty_dumps = true;
    let ctx = context(tmp.path(), &server);

    let err = BackupCreator::new(&ctx, BackupPlan::default())
        .create_backup(BackupType::Full)
        .await
        .unwrap_err();
    assert!(matches!(err, BackupError::EmptyOutput(_)), "got {err:?}");
}

#[tokio::test]
async fn test_successful_backup_prunes_expired_files() {
    let tmp = tempfile::tempdir().unwrap();
    let server = FakeServer::with_database(DB, 3, 0);
    let ctx = context(tmp.path(), &server);

    let expired = tmp.path().join("shop_full_20250101_000000.backup");
    std::fs::write(&expired, b"PGDMP old").unwrap();
    std::fs::File::options()
        .write(true)
        .open(&expired)
        .unwrap()
        .set_modified(SystemTime::now() - Duration::from_secs(40 * 24 * 60 * 60))
        .unwrap();

    let outcome = BackupCreator::new(&ctx, BackupPlan::default())
        .create_backup(BackupType::Full)
        .await
        .unwrap();

    assert!(!expired.exists());
    assert!(outcome.path.exists());
    assert_eq!(outcome.retention.unwrap().removed, vec![expired]);
}

#[tokio::test]
async fn test_unreadable_dump_is_recorded_as_failed() {
    let tmp = tempfile::tempdir().unwrap();
    let server = FakeServer::with_database(DB, 3, 0);
    server.state.lock().unwrap().directory_dumps = true;
    let ctx = context(tmp.path(), &server);

    let err = BackupCreator::new(&ctx, plan(BackupFormat::Plain))
        .create_backup(BackupType::Full)
        .await
        .unwrap_err();
    assert!(matches!(err, BackupError::Other(_)), "got {err:?}");

    let sidecar_file = std::fs::read_dir(tmp.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .find(|p| p.extension().is_some_and(|ext| ext == "json"))
        .expect("failure sidecar");
    let sidecar: BackupSidecar = read_json(&sidecar_file).unwrap();
    assert!(!sidecar.success);
    assert!(sidecar.checksum.is_none());
    assert!(sidecar.error.unwrap().contains("hash"));
}
