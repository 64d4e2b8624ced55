use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use pg_backup_core::ConnectionDescriptor;
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::{Connection, Row};

use crate::admin::{AdminDatabase, TableStat};

/// Postgres-backed administration. Each call opens a fresh connection so no
/// pooled session lingers on a database that is about to be dropped.
pub struct PostgresAdmin {
    conn: ConnectionDescriptor,
    connect_timeout: Duration,
}

impl PostgresAdmin {
    pub fn new(conn: ConnectionDescriptor, connect_timeout: Duration) -> Self {
        Self {
            conn,
            connect_timeout,
        }
    }

    async fn connect(&self, target: &ConnectionDescriptor) -> Result<PgConnection> {
        let options = PgConnectOptions::new()
            .host(&target.host)
            .port(target.port)
            .username(&target.user)
            .password(&target.password)
            .database(&target.database)
            .application_name("pg-backup-tool");
        let database = &target.database;
        tokio::time::timeout(self.connect_timeout, PgConnection::connect_with(&options))
            .await
            .map_err(|_| {
                anyhow!(
                    "connect to {database} on {}:{} timed out after {:?}",
                    target.host,
                    target.port,
                    self.connect_timeout
                )
            })?
            .with_context(|| format!("connect to {database} on {}:{}", target.host, target.port))
    }

    async fn connect_admin(&self) -> Result<PgConnection> {
        self.connect(&self.conn.admin()).await
    }

    async fn connect_to(&self, database: &str) -> Result<PgConnection> {
        self.connect(&self.conn.with_database(database)).await
    }

    async fn admin_execute(&self, sql: &str) -> Result<()> {
        let mut conn = self.connect_admin().await?;
        // simple-query protocol: CREATE/DROP DATABASE refuse to run in a transaction block
        sqlx::Executor::execute(&mut conn, sqlx::raw_sql(sql))
            .await
            .with_context(|| format!("execute: {sql}"))?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl AdminDatabase for PostgresAdmin {
    async fn server_version(&self) -> Result<String> {
        let mut conn = self.connect_admin().await?;
        let version: String = sqlx::query_scalar("SELECT version()")
            .fetch_one(&mut conn)
            .await
            .context("select version()")?;
        Ok(version)
    }

    async fn active_connections(&self, database: &str) -> Result<i64> {
        let mut conn = self.connect_admin().await?;
        let count: i64 = sqlx::query_scalar(
            "SELECT count(*) FROM pg_stat_activity WHERE datname = $1 AND pid <> pg_backend_pid()",
        )
        .bind(database)
        .fetch_one(&mut conn)
        .await
        .context("count active connections")?;
        Ok(count)
    }

    async fn terminate_connections(&self, database: &str) -> Result<u64> {
        let mut conn = self.connect_admin().await?;
        let rows = sqlx::query(
            "SELECT pg_terminate_backend(pid) AS terminated
             FROM pg_stat_activity
             WHERE datname = $1 AND pid <> pg_backend_pid()",
        )
        .bind(database)
        .fetch_all(&mut conn)
        .await
        .context("terminate backends")?;

        Ok(rows
            .iter()
            .filter(|r| r.get::<Option<bool>, _>("terminated").unwrap_or(false))
            .count() as u64)
    }

    async fn database_exists(&self, database: &str) -> Result<bool> {
        let mut conn = self.connect_admin().await?;
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM pg_database WHERE datname = $1)")
                .bind(database)
                .fetch_one(&mut conn)
                .await
                .context("look up database")?;
        Ok(exists)
    }

    async fn list_databases(&self, prefix: &str) -> Result<Vec<String>> {
        let mut conn = self.connect_admin().await?;
        let names: Vec<String> = sqlx::query_scalar(
            "SELECT datname::text FROM pg_database WHERE NOT datistemplate ORDER BY datname",
        )
        .fetch_all(&mut conn)
        .await
        .context("list databases")?;
        Ok(names.into_iter().filter(|n| n.starts_with(prefix)).collect())
    }

    async fn create_database(&self, database: &str) -> Result<()> {
        self.admin_execute(&format!("CREATE DATABASE {}", quote_ident(database)?))
            .await
    }

    async fn drop_database(&self, database: &str) -> Result<()> {
        self.admin_execute(&format!("DROP DATABASE IF EXISTS {}", quote_ident(database)?))
            .await
    }

    async fn rename_database(&self, from: &str, to: &str) -> Result<()> {
        self.admin_execute(&format!(
            "ALTER DATABASE {} RENAME TO {}",
            quote_ident(from)?,
            quote_ident(to)?
        ))
        .await
    }

    async fn query_scalar(&self, database: &str, sql: &str) -> Result<String> {
        let mut conn = self.connect_to(database).await?;
        let value: Option<String> = sqlx::query_scalar(sql)
            .fetch_one(&mut conn)
            .await
            .with_context(|| format!("query {sql}"))?;
        Ok(value.unwrap_or_else(|| "NULL".to_owned()))
    }

    async fn table_stats(&self, database: &str) -> Result<Vec<TableStat>> {
        let mut conn = self.connect_to(database).await?;
        let rows = sqlx::query(
            "SELECT schemaname::text AS schema, relname::text AS table_name, n_live_tup
             FROM pg_stat_user_tables ORDER BY n_live_tup DESC",
        )
        .fetch_all(&mut conn)
        .await
        .context("read pg_stat_user_tables")?;

        Ok(rows
            .iter()
            .map(|r| TableStat {
                schema: r.get("schema"),
                table: r.get("table_name"),
                live_tuples: r.get::<Option<i64>, _>("n_live_tup").unwrap_or(0),
            })
            .collect())
    }
}

/// Postgres identifier limit is 63 bytes; longer names are silently
/// truncated by the server, so refuse them instead.
pub fn quote_ident(name: &str) -> Result<String> {
    if name.is_empty() || name.len() > 63 {
        bail!("invalid database name {name:?}: must be 1 to 63 bytes");
    }
    if name.contains('\0') {
        bail!("invalid database name {name:?}: contains NUL");
    }
    Ok(format!("\"{}\"", name.replace('"', "\"\"")))
}
