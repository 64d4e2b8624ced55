use std::fmt;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::process::Command;
use tracing::{debug, info};

use crate::error::ToolError;

/// One external program run: argv, extra environment and an optional
/// wall-clock limit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub timeout: Option<Duration>,
}

impl Invocation {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            timeout: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Bare program name, used in error messages.
    pub fn program_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program.display().to_string())
    }

    pub fn has_arg(&self, arg: &str) -> bool {
        self.args.iter().any(|a| a == arg)
    }
}

/// Environment values are left out so passwords never reach the logs.
impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    pub program: String,
    /// `None` when the process was ended by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Turns a non-zero exit into `ToolError::Failed` carrying stderr.
    pub fn check(self) -> Result<Self, ToolError> {
        if self.success() {
            return Ok(self);
        }
        let stderr = if self.stderr.trim().is_empty() {
            self.stdout.trim().to_owned()
        } else {
            self.stderr.trim().to_owned()
        };
        Err(ToolError::Failed {
            status: match self.exit_code {
                Some(code) => format!("exit code {code}"),
                None => "a signal".to_owned(),
            },
            program: self.program,
            stderr,
        })
    }
}

/// Runs an external tool to completion and captures its result.
#[async_trait::async_trait]
pub trait ToolRunner: Send + Sync {
    /// `Ok` for any exit status; `Err` only when the program could not be
    /// run or exceeded its timeout.
    async fn run(&self, invocation: &Invocation) -> Result<ToolOutput, ToolError>;
}

/// Spawns real child processes with `tokio::process`.
#[derive(Debug, Default, Clone)]
pub struct ProcessRunner;

#[async_trait::async_trait]
impl ToolRunner for ProcessRunner {
    async fn run(&self, invocation: &Invocation) -> Result<ToolOutput, ToolError> {
        let program = invocation.program_name();
        info!(command = %invocation, "running external tool");

        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .envs(invocation.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let start = Instant::now();
        let child = cmd.spawn().map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                ToolError::NotInstalled {
                    program: program.clone(),
                }
            } else {
                ToolError::Spawn {
                    program: program.clone(),
                    source,
                }
            }
        })?;

        // Dropping the wait future drops the child, which kills it.
        let output = match invocation.timeout {
            Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| ToolError::TimedOut {
                    program: program.clone(),
                    timeout: limit,
                })?,
            None => child.wait_with_output().await,
        }
        .map_err(|source| ToolError::Io {
            program: program.clone(),
            source,
        })?;

        let elapsed = start.elapsed();
        debug!(%program, status = ?output.status, ?elapsed, "external tool finished");
        Ok(ToolOutput {
            program,
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            elapsed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_omits_environment() {
        let inv = Invocation::new("pg_dump")
            .args(["-h", "localhost"])
            .env("PGPASSWORD", "secret");
        let shown = inv.to_string();
        assert_eq!(shown, "pg_dump -h localhost");
        assert!(!shown.contains("secret"));
    }

    #[test]
    fn check_reports_stderr_of_failed_run() {
        let out = ToolOutput {
            program: "psql".into(),
            exit_code: Some(3),
            stdout: String::new(),
            stderr: "ERROR:  relation \"users\" does not exist\n".into(),
            elapsed: Duration::from_millis(5),
        };
        let err = out.check().unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("psql exited with exit code 3"));
        assert!(msg.contains("relation \"users\" does not exist"));
    }

    #[tokio::test]
    async fn missing_program_is_not_installed() {
        let inv = Invocation::new("definitely-not-a-real-pg-tool-binary");
        let err = ProcessRunner.run(&inv).await.unwrap_err();
        assert!(matches!(err, ToolError::NotInstalled { .. }), "got {err:?}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn captures_exit_code_and_streams() {
        let inv = Invocation::new("sh").args(["-c", "echo out; echo err >&2; exit 2"]);
        let out = ProcessRunner.run(&inv).await.expect("run sh");
        assert_eq!(out.exit_code, Some(2));
        assert_eq!(out.stdout.trim(), "out");
        assert_eq!(out.stderr.trim(), "err");
        assert!(!out.success());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn timeout_kills_the_child() {
        let inv = Invocation::new("sleep")
            .arg("5")
            .timeout(Some(Duration::from_millis(100)));
        let err = ProcessRunner.run(&inv).await.unwrap_err();
        assert!(matches!(err, ToolError::TimedOut { .. }), "got {err:?}");
    }
}
