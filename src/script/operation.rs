use crate::replace::ReplacementRule;
use crate::script::params::{FindParams, TreeParams};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// One complete, validated directive.
///
/// Paths are kept as written in the script; the driver resolves relative
/// paths against its base directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Create {
        path: PathBuf,
        content: String,
    },
    Overwrite {
        path: PathBuf,
        content: String,
    },
    Delete {
        path: PathBuf,
    },
    Move {
        src: PathBuf,
        dst: PathBuf,
    },
    SearchReplace {
        path: PathBuf,
        rules: Vec<ReplacementRule>,
    },
    Run {
        command: String,
        cwd: Option<PathBuf>,
        timeout: Option<Duration>,
        shell: bool,
    },
    Read {
        path: PathBuf,
    },
    Tree {
        path: PathBuf,
        params: TreeParams,
    },
    Find {
        path: PathBuf,
        params: FindParams,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Create,
    Overwrite,
    Delete,
    Move,
    SearchReplace,
    Run,
    Read,
    Tree,
    Find,
}

impl OperationKind {
    /// The directive name as written in scripts.
    pub fn directive(self) -> &'static str {
        match self {
            OperationKind::Create => "CREATE",
            OperationKind::Overwrite => "OVERWRITE_FILE",
            OperationKind::Delete => "DELETE",
            OperationKind::Move => "MOVE",
            OperationKind::SearchReplace => "SEARCH_AND_REPLACE",
            OperationKind::Run => "RUN",
            OperationKind::Read => "READ",
            OperationKind::Tree => "TREE",
            OperationKind::Find => "FIND",
        }
    }

    /// Whether the operation changes the filesystem through the engine.
    ///
    /// `RUN` is not counted: its side effects are opaque.
    pub fn is_mutating(self) -> bool {
        matches!(
            self,
            OperationKind::Create
                | OperationKind::Overwrite
                | OperationKind::Delete
                | OperationKind::Move
                | OperationKind::SearchReplace
        )
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.directive())
    }
}

impl Operation {
    pub fn kind(&self) -> OperationKind {
        match self {
            Operation::Create { .. } => OperationKind::Create,
            Operation::Overwrite { .. } => OperationKind::Overwrite,
            Operation::Delete { .. } => OperationKind::Delete,
            Operation::Move { .. } => OperationKind::Move,
            Operation::SearchReplace { .. } => OperationKind::SearchReplace,
            Operation::Run { .. } => OperationKind::Run,
            Operation::Read { .. } => OperationKind::Read,
            Operation::Tree { .. } => OperationKind::Tree,
            Operation::Find { .. } => OperationKind::Find,
        }
    }

    /// Short human-readable target, used in prompts and reports.
    pub fn target(&self) -> String {
        match self {
            Operation::Create { path, .. }
            | Operation::Overwrite { path, .. }
            | Operation::Delete { path }
            | Operation::SearchReplace { path, .. }
            | Operation::Read { path }
            | Operation::Tree { path, .. }
            | Operation::Find { path, .. } => path.display().to_string(),
            Operation::Move { src, dst } => format!("{} -> {}", src.display(), dst.display()),
            Operation::Run { command, .. } => command.clone(),
        }
    }
}

/// An operation and the script line its directive started on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    pub line: usize,
    pub operation: Operation,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Script {
    pub directives: Vec<Directive>,
}

impl Script {
    pub fn len(&self) -> usize {
        self.directives.len()
    }

    pub fn is_empty(&self) -> bool {
        self.directives.is_empty()
    }

    pub fn operations(&self) -> impl Iterator<Item = &Operation> {
        self.directives.iter().map(|d| &d.operation)
    }

    pub fn mutation_count(&self) -> usize {
        self.operations()
            .filter(|op| op.kind().is_mutating())
            .count()
    }
}
