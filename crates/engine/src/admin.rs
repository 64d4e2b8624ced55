use anyhow::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableStat {
    pub schema: String,
    pub table: String,
    pub live_tuples: i64,
}

/// Server-side operations the restore sequence needs, implemented over
/// `sqlx` against the live server and by fakes in tests.
#[async_trait::async_trait]
pub trait AdminDatabase: Send + Sync {
    /// `SELECT version()` on the administrative database.
    async fn server_version(&self) -> Result<String>;

    /// Backends connected to `database`, excluding our own.
    async fn active_connections(&self, database: &str) -> Result<i64>;

    /// Terminate every backend on `database` except our own; returns how many.
    async fn terminate_connections(&self, database: &str) -> Result<u64>;

    async fn database_exists(&self, database: &str) -> Result<bool>;

    /// Non-template databases whose name starts with `prefix`, sorted.
    async fn list_databases(&self, prefix: &str) -> Result<Vec<String>>;

    async fn create_database(&self, database: &str) -> Result<()>;

    async fn drop_database(&self, database: &str) -> Result<()>;

    async fn rename_database(&self, from: &str, to: &str) -> Result<()>;

    /// Run a single-value query inside `database` and return it as text.
    async fn query_scalar(&self, database: &str, sql: &str) -> Result<String>;

    /// Live tuple counts from `pg_stat_user_tables`, largest first.
    async fn table_stats(&self, database: &str) -> Result<Vec<TableStat>>;
}
