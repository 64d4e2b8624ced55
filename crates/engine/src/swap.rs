//! Two-phase replacement of a database.
//!
//! A dump is loaded into `<db>__restore_<ts>` while the target stays online.
//! Only after a clean load is the target renamed to `<db>__old_<ts>`, the
//! staging copy renamed into place and the old copy dropped. If the process
//! dies between the two renames, [`recover_interrupted`] puts the newest old
//! copy back on the next run. Any other old copy still around at that point
//! is dropped.

use anyhow::{bail, Context, Result};
use chrono::NaiveDateTime;
use pg_backup_core::naming::format_timestamp;
use tracing::{info, warn};

use crate::admin::AdminDatabase;

const STAGING_MARKER: &str = "__restore_";
const RETIRED_MARKER: &str = "__old_";
const MAX_IDENTIFIER_BYTES: usize = 63;

/// `None` when the name would not fit in a Postgres identifier.
pub fn staging_name(database: &str, ts: NaiveDateTime) -> Option<String> {
    fit(format!("{database}{STAGING_MARKER}{}", format_timestamp(ts)))
}

pub fn retired_name(database: &str, ts: NaiveDateTime) -> Option<String> {
    fit(format!("{database}{RETIRED_MARKER}{}", format_timestamp(ts)))
}

fn fit(name: String) -> Option<String> {
    (name.len() <= MAX_IDENTIFIER_BYTES).then_some(name)
}

/// Repairs what an interrupted swap left behind. Returns the name of the
/// retired copy that was renamed back, if any.
pub async fn recover_interrupted(admin: &dyn AdminDatabase, database: &str) -> Result<Option<String>> {
    let mut retired = leftovers(admin, database, RETIRED_MARKER).await?;
    let mut restored = None;
    if !admin.database_exists(database).await? {
        // timestamps sort lexically, so the last one is the newest
        if let Some(newest) = retired.pop() {
            warn!(%database, from = %newest, "target missing after interrupted restore, renaming previous copy back");
            admin
                .rename_database(&newest, database)
                .await
                .with_context(|| format!("rename {newest} back to {database}"))?;
            restored = Some(newest);
        }
    }

    for old in retired {
        warn!(database = %old, "dropping previous copy left by an earlier restore");
        admin.terminate_connections(&old).await?;
        if let Err(e) = admin.drop_database(&old).await {
            warn!(database = %old, error = %format!("{e:#}"), "could not drop previous copy");
        }
    }

    for leftover in leftovers(admin, database, STAGING_MARKER).await? {
        warn!(database = %leftover, "dropping staging database left by an earlier restore");
        admin.terminate_connections(&leftover).await?;
        admin.drop_database(&leftover).await?;
    }
    Ok(restored)
}

/// Databases named `<database><marker><timestamp>`, oldest first.
async fn leftovers(admin: &dyn AdminDatabase, database: &str, marker: &str) -> Result<Vec<String>> {
    let prefix = format!("{database}{marker}");
    let mut names: Vec<String> = admin
        .list_databases(&prefix)
        .await?
        .into_iter()
        .filter(|name| name.strip_prefix(&prefix).is_some_and(is_timestamp))
        .collect();
    names.sort();
    Ok(names)
}

/// `YYYYMMDD_HHMMSS`
fn is_timestamp(s: &str) -> bool {
    s.len() == 15
        && s.char_indices()
            .all(|(i, c)| if i == 8 { c == '_' } else { c.is_ascii_digit() })
}

/// Creates an empty staging database, replacing any stale one of that name.
pub async fn prepare_staging(admin: &dyn AdminDatabase, staging: &str) -> Result<()> {
    admin.drop_database(staging).await?;
    admin
        .create_database(staging)
        .await
        .with_context(|| format!("create staging database {staging}"))?;
    info!(database = %staging, "created staging database");
    Ok(())
}

/// Drops a staging database after a failed load.
pub async fn discard(admin: &dyn AdminDatabase, staging: &str) {
    if let Err(e) = admin.drop_database(staging).await {
        warn!(database = %staging, error = %format!("{e:#}"), "could not drop staging database");
    }
}

/// Moves `staging` into place as `database`.
pub async fn promote(
    admin: &dyn AdminDatabase,
    database: &str,
    staging: &str,
    ts: NaiveDateTime,
) -> Result<()> {
    let retired = if admin.database_exists(database).await? {
        let Some(retired) = retired_name(database, ts) else {
            bail!("database name {database:?} too long to keep a retired copy");
        };
        let terminated = admin.terminate_connections(database).await?;
        if terminated > 0 {
            info!(%database, terminated, "terminated connections before swap");
        }
        admin
            .rename_database(database, &retired)
            .await
            .with_context(|| format!("rename {database} to {retired}"))?;
        Some(retired)
    } else {
        None
    };

    if let Err(e) = admin.rename_database(staging, database).await {
        if let Some(retired) = &retired {
            if let Err(back) = admin.rename_database(retired, database).await {
                warn!(%retired, error = %format!("{back:#}"), "could not rename previous copy back");
            }
        }
        return Err(e.context(format!("rename {staging} to {database}")));
    }
    info!(%database, from = %staging, "swapped restored database into place");

    if let Some(retired) = retired {
        if let Err(e) = admin.drop_database(&retired).await {
            warn!(database = %retired, error = %format!("{e:#}"), "could not drop previous copy, drop it by hand");
        }
    }
    Ok(())
}
