use crate::edit::EditError;
use thiserror::Error;

/// Why a replacement rule could not be applied.
///
/// `rule` is the 1-based position of the BEFORE/AFTER pair in its block.
#[derive(Error, Debug)]
pub enum MatchError {
    #[error("BEFORE block of rule {rule} not found")]
    NotFound { rule: usize },

    #[error("BEFORE block of rule {rule} found {found} time(s), {required} required")]
    TooFewMatches {
        rule: usize,
        found: usize,
        required: usize,
    },

    #[error("rule {rule} has an invalid pattern: {message}")]
    InvalidPattern { rule: usize, message: String },

    #[error("rule {rule} has an empty BEFORE block")]
    EmptyPattern { rule: usize },

    #[error("failed to splice replacement: {0}")]
    Splice(#[from] EditError),
}

impl MatchError {
    pub fn rule(&self) -> Option<usize> {
        match self {
            MatchError::NotFound { rule }
            | MatchError::TooFewMatches { rule, .. }
            | MatchError::InvalidPattern { rule, .. }
            | MatchError::EmptyPattern { rule } => Some(*rule),
            MatchError::Splice(_) => None,
        }
    }

    /// Number of matches that were available.
    pub fn found(&self) -> usize {
        match self {
            MatchError::TooFewMatches { found, .. } => *found,
            _ => 0,
        }
    }

    /// Number of matches the rule asked for, when it asked for a count.
    pub fn required(&self) -> Option<usize> {
        match self {
            MatchError::TooFewMatches { required, .. } => Some(*required),
            _ => None,
        }
    }
}
