use std::sync::Arc;

use pg_backup_core::ConnectionDescriptor;
use pg_backup_storage::BackupCatalog;

use crate::admin::AdminDatabase;
use crate::runner::ToolRunner;
use crate::tools::PgTools;

/// Collaborators shared by backup and restore, built once in `main`.
#[derive(Clone)]
pub struct EngineContext {
    pub catalog: BackupCatalog,
    pub tools: PgTools,
    pub runner: Arc<dyn ToolRunner>,
    pub admin: Arc<dyn AdminDatabase>,
}

impl EngineContext {
    pub fn connection(&self) -> &ConnectionDescriptor {
        self.tools.connection()
    }

    pub fn database(&self) -> &str {
        &self.tools.connection().database
    }
}
