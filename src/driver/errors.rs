use crate::backup::BackupError;
use crate::command::CommandError;
use crate::inquiry::InquiryError;
use crate::replace::{Hint, MatchError};
use std::path::PathBuf;
use thiserror::Error;

/// A directive's target is missing, of the wrong kind, or unusable.
#[derive(Error, Debug)]
pub enum PathError {
    #[error("{} does not exist", path.display())]
    NotFound { path: PathBuf },

    #[error("{} is not a regular file", path.display())]
    NotAFile { path: PathBuf },

    #[error("{} is a directory", path.display())]
    IsDirectory { path: PathBuf },

    #[error("destination {} already exists", path.display())]
    DestinationExists { path: PathBuf },

    #[error("{} is not valid UTF-8", path.display())]
    NotUtf8 { path: PathBuf },

    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to delete {}: {source}", path.display())]
    Remove {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to move {} to {}: {source}", from.display(), to.display())]
    Rename {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Why a directive could not be carried out.
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error(transparent)]
    Path(#[from] PathError),

    #[error("{}: {source}", path.display())]
    Match {
        path: PathBuf,
        #[source]
        source: MatchError,
        /// Near misses for a BEFORE block that was not found
        hints: Vec<Hint>,
    },

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error(transparent)]
    Backup(#[from] BackupError),

    #[error(transparent)]
    Inquiry(#[from] InquiryError),
}

impl ExecutionError {
    pub fn hints(&self) -> &[Hint] {
        match self {
            ExecutionError::Match { hints, .. } => hints,
            _ => &[],
        }
    }
}
