#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use pg_backup_core::{ConnectionDescriptor, ADMIN_DATABASE};
use pg_backup_engine::{
    AdminDatabase, Confirm, EngineContext, Invocation, PgTools, TableStat, ToolError, ToolOutput,
    ToolRunner,
};
use pg_backup_storage::BackupCatalog;

pub const DB: &str = "shop";

#[derive(Debug, Clone, Default)]
pub struct FakeDb {
    pub users: i64,
    pub connections: i64,
}

#[derive(Debug, Default)]
pub struct State {
    pub databases: BTreeMap<String, FakeDb>,
    /// Everything that reached the server, in order.
    pub calls: Vec<String>,
    pub failing_tool: Option<String>,
    pub missing_tool: Option<String>,
    /// Never finishes; only returns once the invocation's timeout fires.
    pub slow_tool: Option<String>,
    pub empty_dumps: bool,
    /// pg_dump leaves a directory where the dump file belongs.
    pub directory_dumps: bool,
    pub failing_tables: BTreeSet<String>,
    pub unreachable: bool,
}

/// In-memory stand-in for a Postgres server and its client tools. Dumps it
/// writes hold one `INSERT INTO users` line per user; loading a dump counts
/// those lines back.
#[derive(Default)]
pub struct FakeServer {
    pub state: Mutex<State>,
}

impl FakeServer {
    pub fn with_database(name: &str, users: i64, connections: i64) -> Arc<Self> {
        let server = Arc::new(Self::default());
        server
            .state
            .lock()
            .unwrap()
            .databases
            .insert(name.to_owned(), FakeDb { users, connections });
        server
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn database_names(&self) -> Vec<String> {
        self.state.lock().unwrap().databases.keys().cloned().collect()
    }

    pub fn users(&self, name: &str) -> Option<i64> {
        self.state.lock().unwrap().databases.get(name).map(|d| d.users)
    }

    fn log(&self, call: String) {
        self.state.lock().unwrap().calls.push(call);
    }
}

pub fn dump_script(database: Option<&str>, users: i64) -> String {
    let mut script = String::from("--\n-- PostgreSQL database dump\n--\n\n");
    if let Some(db) = database {
        script.push_str(&format!("DROP DATABASE IF EXISTS {db};\nCREATE DATABASE {db} WITH TEMPLATE = template0;\n\\connect {db}\n"));
    }
    script.push_str("CREATE TABLE users (id integer);\n");
    for i in 0..users {
        script.push_str(&format!("INSERT INTO users VALUES ({i});\n"));
    }
    script
}

fn count_users(script: &str) -> i64 {
    script.matches("INSERT INTO users").count() as i64
}

fn flag_value<'a>(inv: &'a Invocation, flag: &str) -> Option<&'a str> {
    inv.args
        .iter()
        .position(|a| a == flag)
        .and_then(|i| inv.args.get(i + 1))
        .map(String::as_str)
}

fn output(inv: &Invocation, code: i32, stderr: &str) -> ToolOutput {
    ToolOutput {
        program: inv.program_name(),
        exit_code: Some(code),
        stdout: String::new(),
        stderr: stderr.to_owned(),
        elapsed: Duration::from_millis(1),
    }
}

#[async_trait::async_trait]
impl ToolRunner for FakeServer {
    async fn run(&self, inv: &Invocation) -> Result<ToolOutput, ToolError> {
        let program = inv.program_name();
        let database = inv.args.get(7).cloned().unwrap_or_default();
        self.log(format!("{program} {database}"));

        let mut state = self.state.lock().unwrap();
        if state.missing_tool.as_deref() == Some(program.as_str()) {
            return Err(ToolError::NotInstalled { program });
        }
        if state.slow_tool.as_deref() == Some(program.as_str()) {
            if let Some(timeout) = inv.timeout {
                return Err(ToolError::TimedOut { program, timeout });
            }
        }

        match program.as_str() {
            "pg_dump" => {
                let out = PathBuf::from(flag_value(inv, "-f").unwrap_or_default());
                if state.directory_dumps {
                    std::fs::create_dir(&out).unwrap();
                    std::fs::write(out.join("toc.dat"), b"PGDMP").unwrap();
                    return Ok(output(inv, 0, ""));
                }
                if state.empty_dumps {
                    std::fs::write(&out, b"").unwrap();
                    return Ok(output(inv, 0, ""));
                }
                let users = state.databases.get(&database).map(|d| d.users).unwrap_or(0);
                let recreate = inv.has_arg("--create").then_some(database.as_str());
                let mut body = Vec::new();
                if inv.has_arg("--format=custom") {
                    body.extend_from_slice(b"PGDMP");
                }
                body.extend_from_slice(dump_script(recreate, users).as_bytes());
                std::fs::write(&out, body).unwrap();
                if state.failing_tool.as_deref() == Some("pg_dump") {
                    return Ok(output(inv, 1, "pg_dump: error: connection to server failed"));
                }
                Ok(output(inv, 0, ""))
            }
            "psql" | "pg_restore" => {
                if state.failing_tool.as_deref() == Some(program.as_str()) {
                    return Ok(output(inv, 3, "ERROR:  syntax error at or near \"INSRT\""));
                }
                let file = match program.as_str() {
                    "psql" => flag_value(inv, "-f").unwrap_or_default().to_owned(),
                    _ => inv.args.last().cloned().unwrap_or_default(),
                };
                let bytes = std::fs::read(&file).unwrap();
                let script = String::from_utf8_lossy(&bytes).into_owned();
                let target = match script
                    .lines()
                    .find_map(|l| l.strip_prefix("CREATE DATABASE "))
                    .and_then(|rest| rest.split_whitespace().next())
                {
                    Some(created) if database == ADMIN_DATABASE => {
                        if state.databases.get(created).is_some_and(|d| d.connections > 0) {
                            return Ok(output(inv, 3, "ERROR:  database is being accessed by other users"));
                        }
                        state.databases.insert(created.to_owned(), FakeDb::default());
                        created.to_owned()
                    }
                    _ => database,
                };
                match state.databases.get_mut(&target) {
                    Some(db) => {
                        db.users = count_users(&script);
                        Ok(output(inv, 0, ""))
                    }
                    None => Ok(output(inv, 2, &format!("FATAL:  database \"{target}\" does not exist"))),
                }
            }
            other => panic!("unexpected tool {other}"),
        }
    }
}

#[async_trait::async_trait]
impl AdminDatabase for FakeServer {
    async fn server_version(&self) -> Result<String> {
        self.log("version".into());
        if self.state.lock().unwrap().unreachable {
            bail!("connection refused");
        }
        Ok("PostgreSQL 16.2 (fake)".into())
    }

    async fn active_connections(&self, database: &str) -> Result<i64> {
        self.log(format!("census {database}"));
        let state = self.state.lock().unwrap();
        Ok(state.databases.get(database).map(|d| d.connections).unwrap_or(0))
    }

    async fn terminate_connections(&self, database: &str) -> Result<u64> {
        self.log(format!("terminate {database}"));
        let mut state = self.state.lock().unwrap();
        Ok(match state.databases.get_mut(database) {
            Some(db) => std::mem::take(&mut db.connections) as u64,
            None => 0,
        })
    }

    async fn database_exists(&self, database: &str) -> Result<bool> {
        Ok(self.state.lock().unwrap().databases.contains_key(database))
    }

    async fn list_databases(&self, prefix: &str) -> Result<Vec<String>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .databases
            .keys()
            .filter(|n| n.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn create_database(&self, database: &str) -> Result<()> {
        self.log(format!("create {database}"));
        let mut state = self.state.lock().unwrap();
        if state.databases.contains_key(database) {
            bail!("database \"{database}\" already exists");
        }
        state.databases.insert(database.to_owned(), FakeDb::default());
        Ok(())
    }

    async fn drop_database(&self, database: &str) -> Result<()> {
        self.log(format!("drop {database}"));
        let mut state = self.state.lock().unwrap();
        if state.databases.get(database).is_some_and(|d| d.connections > 0) {
            bail!("database \"{database}\" is being accessed by other users");
        }
        state.databases.remove(database);
        Ok(())
    }

    async fn rename_database(&self, from: &str, to: &str) -> Result<()> {
        self.log(format!("rename {from} -> {to}"));
        let mut state = self.state.lock().unwrap();
        if state.databases.contains_key(to) {
            bail!("database \"{to}\" already exists");
        }
        let db = state
            .databases
            .remove(from)
            .ok_or_else(|| anyhow!("database \"{from}\" does not exist"))?;
        state.databases.insert(to.to_owned(), db);
        Ok(())
    }

    async fn query_scalar(&self, database: &str, sql: &str) -> Result<String> {
        let state = self.state.lock().unwrap();
        let db = state
            .databases
            .get(database)
            .ok_or_else(|| anyhow!("database \"{database}\" does not exist"))?;
        if sql.contains("version()") {
            return Ok("PostgreSQL 16.2 (fake)".into());
        }
        if sql.contains("current_database()") {
            return Ok(database.to_owned());
        }
        let table = sql
            .rsplit("FROM ")
            .next()
            .map(str::trim)
            .ok_or_else(|| anyhow!("unsupported query {sql}"))?;
        if state.failing_tables.contains(table) {
            bail!("relation \"{table}\" does not exist");
        }
        Ok(match table {
            "users" => db.users.to_string(),
            _ => "0".to_owned(),
        })
    }

    async fn table_stats(&self, database: &str) -> Result<Vec<TableStat>> {
        let state = self.state.lock().unwrap();
        let users = state.databases.get(database).map(|d| d.users).unwrap_or(0);
        Ok(vec![TableStat {
            schema: "public".into(),
            table: "users".into(),
            live_tuples: users,
        }])
    }
}

pub struct Answer {
    pub yes: bool,
    pub asked: Mutex<Vec<String>>,
}

impl Answer {
    pub fn new(yes: bool) -> Self {
        Self {
            yes,
            asked: Mutex::new(Vec::new()),
        }
    }
}

impl Confirm for Answer {
    fn confirm(&self, prompt: &str) -> bool {
        self.asked.lock().unwrap().push(prompt.to_owned());
        self.yes
    }
}

pub fn context(dir: &Path, server: &Arc<FakeServer>) -> EngineContext {
    let conn = ConnectionDescriptor {
        database: DB.into(),
        ..ConnectionDescriptor::default()
    };
    EngineContext {
        catalog: BackupCatalog::new(dir, DB).unwrap(),
        tools: PgTools::new(conn, None),
        runner: server.clone(),
        admin: server.clone(),
    }
}

pub fn restore_records(dir: &Path) -> Vec<PathBuf> {
    let mut records: Vec<PathBuf> = std::fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            let name = p.file_name().unwrap().to_string_lossy();
            name.starts_with("restore_") && name.ends_with(".json")
        })
        .collect();
    records.sort();
    records
}
