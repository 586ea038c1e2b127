use std::path::PathBuf;
use thiserror::Error;

/// Failure to record a snapshot. The mutation it protects must not run.
#[derive(Error, Debug)]
pub enum BackupError {
    #[error("failed to create backup directory {}: {source}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to snapshot {}: {source}", path.display())]
    Snapshot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write backup manifest {}: {source}", path.display())]
    Manifest {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize backup manifest: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum RollbackError {
    #[error("no backup sessions found in {}", .0.display())]
    NoSessions(PathBuf),

    #[error("unknown backup session '{id}'")]
    UnknownSession { id: String },

    #[error("backup manifest {} is corrupt: {message}", path.display())]
    CorruptManifest { path: PathBuf, message: String },

    #[error("backup blob {} is missing", path.display())]
    MissingBlob { path: PathBuf },

    #[error("backup blob {} does not match its recorded checksum", path.display())]
    ChecksumMismatch { path: PathBuf },

    #[error("cannot move {} back to {}: both paths exist", from.display(), to.display())]
    Conflict { from: PathBuf, to: PathBuf },

    #[error("failed to restore {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("rollback stopped after reversing {reversed} of {total} entries: {source}")]
    Interrupted {
        reversed: usize,
        total: usize,
        #[source]
        source: Box<RollbackError>,
    },
}
