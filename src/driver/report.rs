use crate::command::CommandOutput;
use crate::driver::errors::ExecutionError;
use crate::script::OperationKind;
use std::path::PathBuf;
use thiserror::Error;

/// How much of a script actually touches the disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    #[default]
    Apply,
    /// Match everything and report what would change.
    DryRun,
    /// Like a dry run, without previews.
    Validate,
}

impl RunMode {
    pub fn writes(self) -> bool {
        matches!(self, RunMode::Apply)
    }
}

/// File text before and after a simulated search-and-replace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preview {
    pub before: String,
    pub after: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "outcomes should be reported"]
pub enum Outcome {
    Created {
        path: PathBuf,
        /// An existing file was snapshotted and replaced
        replaced_existing: bool,
    },
    Overwritten {
        path: PathBuf,
        /// The file did not exist beforehand
        created: bool,
    },
    Deleted {
        path: PathBuf,
    },
    Moved {
        from: PathBuf,
        to: PathBuf,
    },
    Replaced {
        path: PathBuf,
        replacements: usize,
        preview: Option<Preview>,
    },
    Command(CommandOutput),
    /// The command passed the policy; dry runs stop there.
    CommandChecked {
        command: String,
    },
    Inquiry {
        kind: OperationKind,
        target: PathBuf,
    },
    /// Declined at the confirmation prompt.
    Skipped {
        kind: OperationKind,
        target: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationReport {
    pub line: usize,
    pub outcome: Outcome,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    pub created: usize,
    pub overwritten: usize,
    pub deleted: usize,
    pub moved: usize,
    pub modified: usize,
    pub commands: usize,
    pub inquiries: usize,
    pub skipped: usize,
}

impl RunStats {
    fn count(&mut self, outcome: &Outcome) {
        let counter = match outcome {
            Outcome::Created { .. } => &mut self.created,
            Outcome::Overwritten { .. } => &mut self.overwritten,
            Outcome::Deleted { .. } => &mut self.deleted,
            Outcome::Moved { .. } => &mut self.moved,
            Outcome::Replaced { .. } => &mut self.modified,
            Outcome::Command(_) | Outcome::CommandChecked { .. } => &mut self.commands,
            Outcome::Inquiry { .. } => &mut self.inquiries,
            Outcome::Skipped { .. } => &mut self.skipped,
        };
        *counter += 1;
    }

    pub fn merge(&mut self, other: &RunStats) {
        self.created += other.created;
        self.overwritten += other.overwritten;
        self.deleted += other.deleted;
        self.moved += other.moved;
        self.modified += other.modified;
        self.commands += other.commands;
        self.inquiries += other.inquiries;
        self.skipped += other.skipped;
    }

    /// Files created, overwritten, deleted, moved or modified.
    pub fn files_changed(&self) -> usize {
        self.created + self.overwritten + self.deleted + self.moved + self.modified
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub mode: RunMode,
    /// Set when at least one snapshot was recorded
    pub session_id: Option<String>,
    pub outcomes: Vec<OperationReport>,
    /// Rendered READ / TREE / FIND output, in script order
    pub captured: Vec<String>,
    pub stats: RunStats,
}

impl RunReport {
    pub(crate) fn new(mode: RunMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    pub(crate) fn record(&mut self, line: usize, outcome: Outcome) {
        self.stats.count(&outcome);
        self.outcomes.push(OperationReport { line, outcome });
    }
}

/// A run that stopped at a failing directive.
///
/// Everything in `report` was carried out before the failure and stays
/// applied; it can be undone through the session.
#[derive(Error, Debug)]
#[error("line {line}: {error}")]
pub struct RunFailure {
    pub report: RunReport,
    pub line: usize,
    #[source]
    pub error: ExecutionError,
}
