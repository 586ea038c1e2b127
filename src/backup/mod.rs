//! Snapshots taken before every mutation, and the rollback that undoes them.

pub mod errors;
pub mod manifest;
pub mod rollback;
pub mod session;

pub use errors::{BackupError, RollbackError};
pub use manifest::{BackupEntry, EntryKind, Manifest};
pub use rollback::RollbackReport;
pub use session::{
    BackupStore, RollbackTarget, Session, SessionSummary, DEFAULT_BACKUP_DIR, MANIFEST_FILE,
};
