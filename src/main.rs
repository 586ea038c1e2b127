use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use kifdiff::backup::DEFAULT_BACKUP_DIR;
use kifdiff::command::CommandError;
use kifdiff::driver::{OperationReport, Preview, RunStats};
use kifdiff::{
    load_policy, parse, BackupStore, ConfigSources, Confirmer, Driver, DriverOptions,
    ExecutionError, Operation, Outcome, RollbackTarget, RunFailure, RunMode, RunReport, Script,
};
use similar::{ChangeTag, TextDiff};
use std::env;
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing_subscriber::EnvFilter;

const EXIT_EXECUTION: i32 = 1;
const EXIT_PARSE: i32 = 2;
const EXIT_VALIDATION: i32 = 3;
const EXIT_BACKUP: i32 = 4;
const EXIT_USAGE: i32 = 64;

const DEFAULT_GIT_MESSAGE: &str = "Applied KifDiff changes";

#[derive(Parser)]
#[command(name = "kifdiff")]
#[command(about = "Apply @Kif directive scripts with automatic backup and rollback", long_about = None)]
#[command(version)]
struct Cli {
    /// Script files, processed in order
    files: Vec<PathBuf>,

    /// Match everything and show what would change without writing
    #[arg(long)]
    dry_run: bool,

    /// Ask before each file change or command
    #[arg(short, long)]
    interactive: bool,

    /// Check scripts for errors without changing anything
    #[arg(long, conflicts_with = "dry_run")]
    validate: bool,

    /// Undo the most recent backup session
    #[arg(long)]
    rollback: bool,

    /// Undo a specific backup session
    #[arg(long, value_name = "ID")]
    rollback_session: Option<String>,

    /// List backup sessions, newest first
    #[arg(long)]
    list_sessions: bool,

    /// Apply without snapshots (no rollback for this run)
    #[arg(long)]
    no_backup: bool,

    /// Where backup sessions are stored
    #[arg(long, value_name = "DIR", default_value = DEFAULT_BACKUP_DIR)]
    backup_dir: PathBuf,

    /// Commit the changes with git after a successful run
    #[arg(long)]
    git_commit: bool,

    /// Commit message for --git-commit
    #[arg(long, value_name = "MSG", default_value = DEFAULT_GIT_MESSAGE)]
    git_message: String,

    /// Debug logging on stderr
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn mode(&self) -> RunMode {
        if self.validate {
            RunMode::Validate
        } else if self.dry_run {
            RunMode::DryRun
        } else {
            RunMode::Apply
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let cwd = env::current_dir().context("cannot determine the current directory")?;
    let store = BackupStore::new(absolute(&cwd, &cli.backup_dir));

    if cli.list_sessions {
        return cmd_list_sessions(&store);
    }

    if cli.rollback || cli.rollback_session.is_some() {
        let target = match &cli.rollback_session {
            Some(id) => RollbackTarget::Session(id.clone()),
            None => RollbackTarget::Latest,
        };
        return cmd_rollback(&store, &target);
    }

    if cli.files.is_empty() {
        eprintln!("{}", "No script files given.".red());
        eprintln!("Usage: kifdiff [OPTIONS] <FILES>...");
        eprintln!("Run 'kifdiff --help' for more information.");
        std::process::exit(EXIT_USAGE);
    }

    cmd_apply(&cli, &cwd, store)
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "kifdiff=debug" } else { "kifdiff=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn absolute(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

/// `path` relative to `base` when it lies underneath it.
fn shown<'a>(path: &'a Path, base: &Path) -> std::path::Display<'a> {
    path.strip_prefix(base).unwrap_or(path).display()
}

fn cmd_apply(cli: &Cli, cwd: &Path, store: BackupStore) -> Result<()> {
    let policy = match load_policy(&ConfigSources::discover(cwd)) {
        Ok(policy) => policy,
        Err(e) => {
            eprintln!("{} {}", "✗".red(), e);
            std::process::exit(EXIT_BACKUP);
        }
    };

    let mode = cli.mode();
    match mode {
        RunMode::DryRun => println!("{}", "[DRY RUN - no files will be changed]".cyan()),
        RunMode::Validate => println!("{}", "[VALIDATE - checking scripts only]".cyan()),
        RunMode::Apply if cli.no_backup => eprintln!(
            "{}",
            "Warning: --no-backup is set; changes from this run cannot be rolled back".yellow()
        ),
        RunMode::Apply => {}
    }

    let scripts = parse_all(&cli.files)?;

    let mut totals = RunStats::default();
    let mut sessions = Vec::new();
    let mut captured = Vec::new();

    for (file, script) in &scripts {
        println!("Processing {}...", file.display());

        let options = DriverOptions::new(cwd)
            .mode(mode)
            .backup((!cli.no_backup).then(|| store.clone()));
        let mut driver = Driver::new(&policy, options);
        if cli.interactive && mode.writes() {
            driver = driver.with_confirmer(StdinConfirmer);
        }

        match driver.execute(script) {
            Ok(report) => {
                print_report(&report, cwd);
                totals.merge(&report.stats);
                sessions.extend(report.session_id.clone());
                captured.extend(report.captured);
            }
            Err(failure) => {
                print_report(&failure.report, cwd);
                totals.merge(&failure.report.stats);
                print_failure(file, &failure);
                print_captured(&failure.report.captured);
                println!();
                print_summary(&totals, mode);
                std::process::exit(failure_exit_code(&failure, mode));
            }
        }
        println!();
    }

    print_captured(&captured);
    print_summary(&totals, mode);

    for id in &sessions {
        println!(
            "{}",
            format!("Backup session: {id} (undo with: kifdiff --rollback-session {id})").dimmed()
        );
    }

    if cli.git_commit && mode.writes() {
        if totals.files_changed() > 0 {
            git_commit(cwd, store.root(), &cli.git_message)?;
        } else {
            println!("{}", "Nothing changed; skipping git commit".dimmed());
        }
    }

    Ok(())
}

/// Read and parse every script before any of them runs.
///
/// Parse errors from all files are reported together; any error exits with
/// the parse failure code.
fn parse_all(files: &[PathBuf]) -> Result<Vec<(&Path, Script)>> {
    let mut scripts = Vec::with_capacity(files.len());
    let mut error_count = 0;

    for file in files {
        let text = fs::read_to_string(file)
            .with_context(|| format!("failed to read script {}", file.display()))?;
        match parse(&text) {
            Ok(script) => scripts.push((file.as_path(), script)),
            Err(errors) => {
                for error in errors.iter() {
                    eprintln!("{} {}: {}", "✗".red(), file.display(), error);
                }
                error_count += errors.len();
            }
        }
    }

    if error_count > 0 {
        eprintln!(
            "{}",
            format!("{error_count} parse error(s); nothing was changed").red()
        );
        std::process::exit(EXIT_PARSE);
    }
    Ok(scripts)
}

fn failure_exit_code(failure: &RunFailure, mode: RunMode) -> i32 {
    match (&failure.error, mode) {
        (ExecutionError::Backup(_), _) => EXIT_BACKUP,
        (_, RunMode::Validate) => EXIT_VALIDATION,
        _ => EXIT_EXECUTION,
    }
}

fn print_report(report: &RunReport, cwd: &Path) {
    let wrote = report.mode.writes();
    for OperationReport { line, outcome } in &report.outcomes {
        let at = format!("[line {line}]").dimmed();
        match outcome {
            Outcome::Created {
                path,
                replaced_existing,
            } => {
                let verb = if wrote { "Created" } else { "Would create" };
                let note = if *replaced_existing {
                    " (replaced existing file)".yellow().to_string()
                } else {
                    String::new()
                };
                println!("{} {at} {verb} {}{note}", "✓".green(), shown(path, cwd));
            }
            Outcome::Overwritten { path, created } => {
                let verb = match (wrote, created) {
                    (true, false) => "Overwrote",
                    (true, true) => "Wrote new file",
                    (false, _) => "Would overwrite",
                };
                println!("{} {at} {verb} {}", "✓".green(), shown(path, cwd));
            }
            Outcome::Deleted { path } => {
                let verb = if wrote { "Deleted" } else { "Would delete" };
                println!("{} {at} {verb} {}", "✓".green(), shown(path, cwd));
            }
            Outcome::Moved { from, to } => {
                let verb = if wrote { "Moved" } else { "Would move" };
                println!(
                    "{} {at} {verb} {} -> {}",
                    "✓".green(),
                    shown(from, cwd),
                    shown(to, cwd)
                );
            }
            Outcome::Replaced {
                path,
                replacements,
                preview,
            } => {
                let verb = if wrote { "Replaced" } else { "Would replace" };
                println!(
                    "{} {at} {verb} {replacements} occurrence(s) in {}",
                    "✓".green(),
                    shown(path, cwd)
                );
                if let Some(preview) = preview {
                    display_diff(&shown(path, cwd).to_string(), preview);
                }
            }
            Outcome::Command(output) => {
                println!(
                    "{} {at} Ran `{}` ({:.1}s)",
                    "✓".green(),
                    output.command,
                    output.elapsed.as_secs_f64()
                );
                for line in output.stdout.lines() {
                    println!("  {}", line.dimmed());
                }
            }
            Outcome::CommandChecked { command } => {
                println!("{} {at} Would run `{command}` (allowed by policy)", "⊙".yellow());
            }
            Outcome::Inquiry { kind, target } => {
                println!("{} {at} {kind} {}", "✓".green(), shown(target, cwd));
            }
            Outcome::Skipped { kind, target } => {
                println!("{} {at} Skipped {kind} {target}", "⊙".yellow());
            }
        }
    }
}

fn print_failure(file: &Path, failure: &RunFailure) {
    eprintln!("{} {}: {}", "✗".red(), file.display(), failure);

    match &failure.error {
        ExecutionError::Match { .. } => {
            let hints = failure.error.hints();
            if !hints.is_empty() {
                eprintln!("  {}", "Similar text in the file:".yellow());
                for hint in hints {
                    eprintln!(
                        "  {}",
                        format!(
                            "line {} ({:.0}% similar):",
                            hint.line,
                            hint.similarity * 100.0
                        )
                        .dimmed()
                    );
                    for line in hint.text.lines() {
                        eprintln!("    {line}");
                    }
                }
            }
        }
        ExecutionError::Command(err) => {
            if let CommandError::Blocked { .. } = err {
                eprintln!(
                    "  {}",
                    "Adjust [commands] in .kifdiff/config.toml to change the policy".dimmed()
                );
            }
            if let Some(stderr) = err.stderr().filter(|s| !s.trim().is_empty()) {
                eprintln!("  {}", "stderr:".dimmed());
                for line in stderr.lines() {
                    eprintln!("    {line}");
                }
            }
        }
        _ => {}
    }

    if let Some(id) = &failure.report.session_id {
        eprintln!(
            "  Operations before line {} were applied; undo them with: kifdiff --rollback-session {}",
            failure.line,
            id
        );
    }
}

fn print_captured(captured: &[String]) {
    if captured.is_empty() {
        return;
    }
    println!();
    for block in captured {
        println!("{block}");
    }
}

fn print_summary(stats: &RunStats, mode: RunMode) {
    let title = match mode {
        RunMode::Apply => "Summary:",
        RunMode::DryRun => "Summary (dry run):",
        RunMode::Validate => "Summary (validate):",
    };
    println!("{}", title.bold());
    println!("  {} created", format!("{}", stats.created).green());
    println!("  {} overwritten", format!("{}", stats.overwritten).green());
    println!("  {} modified", format!("{}", stats.modified).green());
    println!("  {} moved", format!("{}", stats.moved).green());
    println!("  {} deleted", format!("{}", stats.deleted).green());
    println!("  {} commands", format!("{}", stats.commands).cyan());
    println!("  {} inquiries", format!("{}", stats.inquiries).cyan());
    println!("  {} skipped", format!("{}", stats.skipped).yellow());
}

/// Unified diff of a simulated replacement, three lines of context.
fn display_diff(label: &str, preview: &Preview) {
    println!("{}", format!("--- {label} (current)").dimmed());
    println!("{}", format!("+++ {label} (after)").dimmed());

    let diff = TextDiff::from_lines(&preview.before, &preview.after);
    for group in diff.grouped_ops(3) {
        for op in group {
            for change in diff.iter_changes(&op) {
                let line = match change.tag() {
                    ChangeTag::Delete => format!("-{}", change).red(),
                    ChangeTag::Insert => format!("+{}", change).green(),
                    ChangeTag::Equal => format!(" {}", change).normal(),
                };
                print!("{}", line);
                if change.missing_newline() {
                    println!();
                }
            }
        }
    }
}

fn cmd_rollback(store: &BackupStore, target: &RollbackTarget) -> Result<()> {
    match store.rollback(target) {
        Ok(report) => {
            println!(
                "{} Rolled back session {}",
                "✓".green(),
                report.session_id.bold()
            );
            println!("  {} restored", format!("{}", report.restored).green());
            println!("  {} removed", format!("{}", report.removed).green());
            println!("  {} moved back", format!("{}", report.moved_back).green());
            println!(
                "  {} already in original state",
                format!("{}", report.skipped).yellow()
            );
            Ok(())
        }
        Err(e) => {
            eprintln!("{} Rollback failed: {}", "✗".red(), e);
            std::process::exit(EXIT_BACKUP);
        }
    }
}

fn cmd_list_sessions(store: &BackupStore) -> Result<()> {
    let sessions = match store.list_sessions() {
        Ok(sessions) => sessions,
        Err(e) => {
            eprintln!("{} {}", "✗".red(), e);
            std::process::exit(EXIT_BACKUP);
        }
    };

    if sessions.is_empty() {
        println!(
            "{}",
            format!("No backup sessions in {}", store.root().display()).yellow()
        );
        return Ok(());
    }

    println!("{}", "Backup sessions (newest first):".bold());
    for session in sessions {
        println!(
            "  {}  {}  {} entr{}",
            session.id,
            session.created_at.format("%Y-%m-%d %H:%M:%S").to_string().dimmed(),
            session.entry_count,
            if session.entry_count == 1 { "y" } else { "ies" }
        );
    }
    Ok(())
}

/// Stage everything except the backup sessions and commit.
fn git_commit(cwd: &Path, backup_root: &Path, message: &str) -> Result<()> {
    let mut add = Command::new("git");
    add.args(["add", "-A", "--", "."]);
    if let Ok(relative) = backup_root.strip_prefix(cwd) {
        add.arg(format!(":(exclude){}", relative.display()));
    }
    let add = add
        .current_dir(cwd)
        .status()
        .context("failed to run git add")?;
    if !add.success() {
        anyhow::bail!("git add -A exited with {add}");
    }

    let commit = Command::new("git")
        .args(["commit", "-m", message])
        .current_dir(cwd)
        .output()
        .context("failed to run git commit")?;
    if !commit.status.success() {
        anyhow::bail!(
            "git commit failed: {}",
            String::from_utf8_lossy(&commit.stderr).trim()
        );
    }

    println!("{} Committed changes: {}", "✓".green(), message);
    Ok(())
}

/// Prompts on stdin for each change in interactive mode.
struct StdinConfirmer;

impl Confirmer for StdinConfirmer {
    fn confirm(&mut self, line: usize, operation: &Operation) -> bool {
        print!(
            "{} [line {line}] {} {}? [y/N] ",
            "?".cyan(),
            operation.kind(),
            operation.target()
        );
        if io::stdout().flush().is_err() {
            return false;
        }
        let mut answer = String::new();
        match io::stdin().lock().read_line(&mut answer) {
            Ok(_) => matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"),
            Err(_) => false,
        }
    }
}
