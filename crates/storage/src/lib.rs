pub mod catalog;
pub mod lease;
pub mod retention;
pub mod sidecar;

pub use catalog::{BackupCatalog, CatalogEntry};
pub use lease::{LeaseError, LeaseInfo, RestoreLease};
pub use retention::{prune_older_than, RetentionReport};
pub use sidecar::{load_sidecar, write_sidecar};
