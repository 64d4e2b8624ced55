pub mod backup;
pub mod connection;
pub mod format;
pub mod hash;
pub mod naming;

pub use backup::{
    BackupSidecar, BackupType, NewBackupSidecar, ParseBackupTypeError, RestoreRecord,
    RestoreStatus,
};
pub use connection::{ConnectionDescriptor, ADMIN_DATABASE};
pub use format::{BackupFormat, CUSTOM_FORMAT_MAGIC};
pub use hash::file_hash;
