pub mod admin;
pub mod backup;
pub mod context;
pub mod error;
pub mod inspect;
pub mod postgres_admin;
pub mod restore;
pub mod runner;
pub mod strategy;
pub mod swap;
pub mod tools;
pub mod verify;

pub use admin::{AdminDatabase, TableStat};
pub use backup::{BackupCreator, BackupOutcome, BackupPlan};
pub use context::EngineContext;
pub use error::{BackupError, RestoreError, ToolError};
pub use postgres_admin::PostgresAdmin;
pub use restore::{Confirm, LoadMethod, RestoreExecutor, RestoreOptions, RestoreReport};
pub use runner::{Invocation, ProcessRunner, ToolOutput, ToolRunner};
pub use tools::{DumpSpec, PgTools};
pub use verify::{VerificationReport, EXTENDED_CHECKS, STANDARD_CHECKS};
