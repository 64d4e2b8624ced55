use std::collections::BTreeMap;

use tracing::{info, warn};

use crate::admin::AdminDatabase;

/// A named single-value query run against the restored database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Check {
    pub name: &'static str,
    pub sql: &'static str,
}

pub const STANDARD_CHECKS: &[Check] = &[
    Check {
        name: "users_count",
        sql: "SELECT COUNT(*)::text FROM users",
    },
    Check {
        name: "products_count",
        sql: "SELECT COUNT(*)::text FROM products",
    },
    Check {
        name: "orders_count",
        sql: "SELECT COUNT(*)::text FROM orders",
    },
    Check {
        name: "server_version",
        sql: "SELECT version()",
    },
];

/// Run after the standard checks when restoring in safe mode.
pub const EXTENDED_CHECKS: &[Check] = &[
    Check {
        name: "categories_count",
        sql: "SELECT COUNT(*)::text FROM categories",
    },
    Check {
        name: "database_name",
        sql: "SELECT current_database()::text",
    },
];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerificationReport {
    pub values: BTreeMap<String, String>,
    /// Check name to error text.
    pub failures: BTreeMap<String, String>,
}

impl VerificationReport {
    pub fn passed(&self) -> bool {
        self.failures.is_empty()
    }

    /// Flattened form stored in the restore record; failed checks carry
    /// their error prefixed with `error: `.
    pub fn to_record_map(&self) -> BTreeMap<String, String> {
        let mut map = self.values.clone();
        for (name, err) in &self.failures {
            map.insert(name.clone(), format!("error: {err}"));
        }
        map
    }
}

/// Runs every check; a failing query is recorded and the rest still run.
pub async fn verify_database(
    admin: &dyn AdminDatabase,
    database: &str,
    extended: bool,
) -> VerificationReport {
    let mut report = VerificationReport::default();
    let extra: &[Check] = if extended { EXTENDED_CHECKS } else { &[] };

    for check in STANDARD_CHECKS.iter().chain(extra) {
        match admin.query_scalar(database, check.sql).await {
            Ok(value) => {
                info!(check = check.name, %value, "verification");
                report.values.insert(check.name.to_owned(), value);
            }
            Err(e) => {
                warn!(check = check.name, error = %format!("{e:#}"), "verification query failed");
                report
                    .failures
                    .insert(check.name.to_owned(), format!("{e:#}"));
            }
        }
    }
    report
}
