//! Execution driver: walks a parsed script and carries out each directive.
//!
//! Directives run strictly in script order. Every mutation is preceded by a
//! durable snapshot when a backup store is configured, and the first failing
//! directive stops the run. Dry runs and validation execute against a
//! [`SimulatedWorkspace`], so matching still happens against the content
//! earlier directives would have produced.

pub mod errors;
pub mod report;

pub use errors::{ExecutionError, PathError};
pub use report::{OperationReport, Outcome, Preview, RunFailure, RunMode, RunReport, RunStats};

use crate::backup::{BackupStore, EntryKind, Session, DEFAULT_BACKUP_DIR};
use crate::command::{run_command, CommandError, CommandPolicy, CommandRequest, Verdict};
use crate::inquiry::{find_files, render_find, render_read, render_tree};
use crate::replace::{self, similar_snippets, Hint, MatchError, ReplacementRule};
use crate::script::{Directive, Operation, Script};
use crate::workspace::{DiskWorkspace, PathKind, SimulatedWorkspace, Workspace};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const MAX_HINTS: usize = 3;

/// Asked before each mutating or command directive in apply mode.
pub trait Confirmer {
    fn confirm(&mut self, line: usize, operation: &Operation) -> bool;
}

/// Confirms everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAll;

impl Confirmer for AcceptAll {
    fn confirm(&mut self, _line: usize, _operation: &Operation) -> bool {
        true
    }
}

#[derive(Debug, Clone)]
pub struct DriverOptions {
    pub mode: RunMode,
    /// Relative script paths resolve against this directory.
    pub base_dir: PathBuf,
    /// `None` applies changes without snapshots.
    pub backup: Option<BackupStore>,
}

impl DriverOptions {
    /// Apply mode with backups in `<base_dir>/.kif_backups`.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        Self {
            mode: RunMode::Apply,
            backup: Some(BackupStore::new(base_dir.join(DEFAULT_BACKUP_DIR))),
            base_dir,
        }
    }

    pub fn mode(mut self, mode: RunMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn backup(mut self, backup: Option<BackupStore>) -> Self {
        self.backup = backup;
        self
    }
}

pub struct Driver<'a> {
    policy: &'a CommandPolicy,
    options: DriverOptions,
    confirmer: Box<dyn Confirmer + 'a>,
}

impl<'a> Driver<'a> {
    pub fn new(policy: &'a CommandPolicy, mut options: DriverOptions) -> Self {
        if let Ok(absolute) = std::path::absolute(&options.base_dir) {
            options.base_dir = absolute;
        }
        Self {
            policy,
            options,
            confirmer: Box::new(AcceptAll),
        }
    }

    pub fn with_confirmer(mut self, confirmer: impl Confirmer + 'a) -> Self {
        self.confirmer = Box::new(confirmer);
        self
    }

    pub fn options(&self) -> &DriverOptions {
        &self.options
    }

    /// Run every directive of `script` in order.
    ///
    /// On failure the returned [`RunFailure`] holds the report of the
    /// directives that completed, the failing line and the error.
    pub fn execute(&mut self, script: &Script) -> Result<RunReport, RunFailure> {
        if self.options.mode.writes() {
            let mut session = self.options.backup.as_ref().map(BackupStore::begin_session);
            if session.is_none() {
                warn!("backups disabled; this run cannot be rolled back");
            }
            self.run(script, &mut DiskWorkspace, &mut session)
        } else {
            self.run(script, &mut SimulatedWorkspace::new(), &mut None)
        }
    }

    fn run<W: Workspace>(
        &mut self,
        script: &Script,
        ws: &mut W,
        session: &mut Option<Session>,
    ) -> Result<RunReport, RunFailure> {
        let mut report = RunReport::new(self.options.mode);

        for directive in &script.directives {
            let Directive { line, operation } = directive;
            let kind = operation.kind();

            let guarded = kind.is_mutating() || matches!(operation, Operation::Run { .. });
            if self.options.mode.writes() && guarded && !self.confirmer.confirm(*line, operation)
            {
                debug!(line, %kind, "directive declined");
                report.record(
                    *line,
                    Outcome::Skipped {
                        kind,
                        target: operation.target(),
                    },
                );
                continue;
            }

            debug!(line, %kind, target = %operation.target(), "executing directive");
            match self.step(operation, ws, session, &mut report.captured) {
                Ok(outcome) => report.record(*line, outcome),
                Err(error) => {
                    report.session_id = recorded_session(session);
                    return Err(RunFailure {
                        report,
                        line: *line,
                        error,
                    });
                }
            }
        }

        report.session_id = recorded_session(session);
        Ok(report)
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.options.base_dir.join(path)
        }
    }

    fn step<W: Workspace>(
        &self,
        operation: &Operation,
        ws: &mut W,
        session: &mut Option<Session>,
        captured: &mut Vec<String>,
    ) -> Result<Outcome, ExecutionError> {
        match operation {
            Operation::Create { path, content } => {
                let path = self.resolve(path);
                let existed = writable_target(ws, &path)?;
                if existed {
                    warn!(path = %path.display(), "CREATE target exists; overwriting");
                }
                snapshot_write(session, EntryKind::Create, &path, content)?;
                write(ws, &path, content)?;
                Ok(Outcome::Created {
                    path,
                    replaced_existing: existed,
                })
            }

            Operation::Overwrite { path, content } => {
                let path = self.resolve(path);
                let existed = writable_target(ws, &path)?;
                snapshot_write(session, EntryKind::Overwrite, &path, content)?;
                write(ws, &path, content)?;
                Ok(Outcome::Overwritten {
                    path,
                    created: !existed,
                })
            }

            Operation::Delete { path } => {
                let path = self.resolve(path);
                require_file(ws, &path)?;
                snapshot(session, EntryKind::Delete, &path, None)?;
                ws.remove_file(&path).map_err(|source| PathError::Remove {
                    path: path.clone(),
                    source,
                })?;
                Ok(Outcome::Deleted { path })
            }

            Operation::Move { src, dst } => {
                let from = self.resolve(src);
                let to = self.resolve(dst);
                if ws.kind(&from).is_none() {
                    return Err(PathError::NotFound { path: from }.into());
                }
                if ws.kind(&to).is_some() {
                    return Err(PathError::DestinationExists { path: to }.into());
                }
                snapshot(session, EntryKind::Move, &from, Some(&to))?;
                ws.rename(&from, &to).map_err(|source| PathError::Rename {
                    from: from.clone(),
                    to: to.clone(),
                    source,
                })?;
                Ok(Outcome::Moved { from, to })
            }

            Operation::SearchReplace { path, rules } => {
                let path = self.resolve(path);
                let text = read_text(ws, &path)?;
                let outcome = replace::apply(&text, rules).map_err(|source| {
                    let hints = near_misses(&text, rules, &source);
                    ExecutionError::Match {
                        path: path.clone(),
                        source,
                        hints,
                    }
                })?;
                snapshot(session, EntryKind::SearchReplace, &path, None)?;
                write(ws, &path, &outcome.text)?;
                let preview = (self.options.mode == RunMode::DryRun).then(|| Preview {
                    before: text,
                    after: outcome.text.clone(),
                });
                Ok(Outcome::Replaced {
                    path,
                    replacements: outcome.total(),
                    preview,
                })
            }

            Operation::Run {
                command,
                cwd,
                timeout,
                shell,
            } => {
                if !self.options.mode.writes() {
                    if let Verdict::Blocked(reason) = self.policy.evaluate(command) {
                        return Err(CommandError::Blocked {
                            command: command.clone(),
                            reason,
                        }
                        .into());
                    }
                    return Ok(Outcome::CommandChecked {
                        command: command.clone(),
                    });
                }
                let cwd = cwd.as_deref().map(|dir| self.resolve(dir));
                let request = CommandRequest {
                    command,
                    cwd: cwd.as_deref(),
                    timeout: *timeout,
                    shell: *shell,
                };
                let output = run_command(self.policy, &request, &self.options.base_dir)?;
                Ok(Outcome::Command(output))
            }

            Operation::Read { path } => {
                let target = self.resolve(path);
                let text = read_text(ws, &target)?;
                captured.push(render_read(path, &text));
                Ok(Outcome::Inquiry {
                    kind: operation.kind(),
                    target,
                })
            }

            Operation::Tree { path, params } => {
                let target = self.resolve(path);
                require_exists(&target)?;
                captured.push(render_tree(&target, params)?);
                Ok(Outcome::Inquiry {
                    kind: operation.kind(),
                    target,
                })
            }

            Operation::Find { path, params } => {
                let target = self.resolve(path);
                require_exists(&target)?;
                let files = find_files(&target, params)?;
                captured.push(render_find(path, params, &files));
                Ok(Outcome::Inquiry {
                    kind: operation.kind(),
                    target,
                })
            }
        }
    }
}

fn recorded_session(session: &Option<Session>) -> Option<String> {
    session
        .as_ref()
        .filter(|s| !s.is_empty())
        .map(|s| s.id().to_string())
}

fn snapshot(
    session: &mut Option<Session>,
    kind: EntryKind,
    path: &Path,
    destination: Option<&Path>,
) -> Result<(), ExecutionError> {
    if let Some(session) = session {
        session.snapshot(kind, path, destination)?;
    }
    Ok(())
}

fn snapshot_write(
    session: &mut Option<Session>,
    kind: EntryKind,
    path: &Path,
    content: &str,
) -> Result<(), ExecutionError> {
    if let Some(session) = session {
        session.snapshot_write(kind, path, content.as_bytes())?;
    }
    Ok(())
}

fn write<W: Workspace>(ws: &mut W, path: &Path, content: &str) -> Result<(), PathError> {
    ws.write(path, content.as_bytes())
        .map_err(|source| PathError::Write {
            path: path.to_path_buf(),
            source,
        })
}

/// Whether a file already exists at `path`. Directories are rejected.
fn writable_target<W: Workspace>(ws: &W, path: &Path) -> Result<bool, PathError> {
    match ws.kind(path) {
        Some(PathKind::Dir) => Err(PathError::IsDirectory {
            path: path.to_path_buf(),
        }),
        Some(PathKind::File) => Ok(true),
        None => Ok(false),
    }
}

fn require_file<W: Workspace>(ws: &W, path: &Path) -> Result<(), PathError> {
    match ws.kind(path) {
        Some(PathKind::File) => Ok(()),
        Some(PathKind::Dir) => Err(PathError::NotAFile {
            path: path.to_path_buf(),
        }),
        None => Err(PathError::NotFound {
            path: path.to_path_buf(),
        }),
    }
}

fn require_exists(path: &Path) -> Result<(), PathError> {
    if path.exists() {
        Ok(())
    } else {
        Err(PathError::NotFound {
            path: path.to_path_buf(),
        })
    }
}

fn read_text<W: Workspace>(ws: &W, path: &Path) -> Result<String, PathError> {
    require_file(ws, path)?;
    let bytes = ws.read(path).map_err(|source| PathError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    String::from_utf8(bytes).map_err(|_| PathError::NotUtf8 {
        path: path.to_path_buf(),
    })
}

/// Snippets resembling the BEFORE block that failed to match, searched in
/// the text that rule actually saw.
fn near_misses(text: &str, rules: &[ReplacementRule], error: &MatchError) -> Vec<Hint> {
    let MatchError::NotFound { rule } = error else {
        return Vec::new();
    };
    let Some(index) = rule.checked_sub(1) else {
        return Vec::new();
    };
    let Some(failed) = rules.get(index) else {
        return Vec::new();
    };
    if failed.regex {
        return Vec::new();
    }
    match replace::apply(text, &rules[..index]) {
        Ok(seen) => similar_snippets(&seen.text, &failed.before, MAX_HINTS),
        Err(_) => Vec::new(),
    }
}
