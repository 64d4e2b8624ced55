use std::fs::File;
use std::io;
use std::path::Path;
use std::time::Duration;

use flate2::read::GzDecoder;
use pg_backup_core::BackupFormat;
use tracing::{debug, info};

use crate::error::RestoreError;
use crate::runner::{ToolOutput, ToolRunner};
use crate::tools::PgTools;

/// Everything a strategy needs to load a dump.
pub struct LoadContext<'a> {
    pub runner: &'a dyn ToolRunner,
    pub tools: &'a PgTools,
    pub parallel_jobs: u32,
    /// Wall-clock limit for the load subprocess.
    pub timeout: Option<Duration>,
    /// Where temporary decompressed copies are written.
    pub scratch_dir: &'a Path,
}

/// Loads one dump format into a database.
#[async_trait::async_trait]
pub trait RestoreStrategy: Send + Sync {
    fn format(&self) -> BackupFormat;

    /// True when the load itself drops and recreates objects, so the
    /// database does not have to be emptied beforehand.
    fn cleans_itself(&self) -> bool;

    async fn load(
        &self,
        ctx: &LoadContext<'_>,
        file: &Path,
        database: &str,
    ) -> Result<ToolOutput, RestoreError>;
}

pub struct PlainSql;
pub struct CompressedSql;
pub struct CustomFormat;

pub fn strategy_for(format: BackupFormat) -> Box<dyn RestoreStrategy> {
    match format {
        BackupFormat::Plain => Box::new(PlainSql),
        BackupFormat::Compressed => Box::new(CompressedSql),
        BackupFormat::CustomFormat => Box::new(CustomFormat),
    }
}

#[async_trait::async_trait]
impl RestoreStrategy for PlainSql {
    fn format(&self) -> BackupFormat {
        BackupFormat::Plain
    }

    fn cleans_itself(&self) -> bool {
        false
    }

    async fn load(
        &self,
        ctx: &LoadContext<'_>,
        file: &Path,
        database: &str,
    ) -> Result<ToolOutput, RestoreError> {
        info!(file = %file.display(), %database, "loading SQL dump with psql");
        let inv = ctx.tools.psql_file(database, file, ctx.timeout);
        Ok(ctx.runner.run(&inv).await?.check()?)
    }
}

#[async_trait::async_trait]
impl RestoreStrategy for CompressedSql {
    fn format(&self) -> BackupFormat {
        BackupFormat::Compressed
    }

    fn cleans_itself(&self) -> bool {
        false
    }

    async fn load(
        &self,
        ctx: &LoadContext<'_>,
        file: &Path,
        database: &str,
    ) -> Result<ToolOutput, RestoreError> {
        let source = file.to_owned();
        let scratch = ctx.scratch_dir.to_owned();
        let plain = tokio::task::spawn_blocking(move || decompress_to_temp(&source, &scratch))
            .await
            .map_err(|e| RestoreError::Io {
                path: file.to_owned(),
                source: io::Error::other(e),
            })?
            .map_err(|source| RestoreError::BackupCorrupt {
                path: file.to_owned(),
                reason: format!("gzip decompression failed: {source}"),
            })?;
        debug!(temp = %plain.path().display(), "decompressed dump");

        // `plain` lives until psql has finished with it.
        PlainSql.load(ctx, plain.path(), database).await
    }
}

#[async_trait::async_trait]
impl RestoreStrategy for CustomFormat {
    fn format(&self) -> BackupFormat {
        BackupFormat::CustomFormat
    }

    fn cleans_itself(&self) -> bool {
        true
    }

    async fn load(
        &self,
        ctx: &LoadContext<'_>,
        file: &Path,
        database: &str,
    ) -> Result<ToolOutput, RestoreError> {
        info!(file = %file.display(), %database, jobs = ctx.parallel_jobs, "loading custom-format archive with pg_restore");
        let inv = ctx
            .tools
            .pg_restore(database, file, ctx.parallel_jobs, ctx.timeout);
        Ok(ctx.runner.run(&inv).await?.check()?)
    }
}

fn decompress_to_temp(source: &Path, scratch_dir: &Path) -> io::Result<tempfile::NamedTempFile> {
    let mut decoder = GzDecoder::new(File::open(source)?);
    let mut temp = tempfile::Builder::new()
        .prefix(".restore-")
        .suffix(".sql")
        .tempfile_in(scratch_dir)?;
    io::copy(&mut decoder, temp.as_file_mut())?;
    temp.as_file().sync_all()?;
    Ok(temp)
}
