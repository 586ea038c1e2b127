//! KifDiff: a directive-driven file mutation engine.
//!
//! A KifDiff script is plain text made of `@Kif` directives: create,
//! overwrite, delete, move, search-and-replace and run a command, plus
//! read-only READ, TREE and FIND. The script is parsed completely before
//! anything runs; then the [`Driver`] applies each directive in order.
//!
//! # Architecture
//!
//! - [`script`] turns text into a validated [`Script`] of typed operations.
//! - [`replace`] applies BEFORE/AFTER rules to file text (literal, regex,
//!   whitespace-insensitive, count-bounded).
//! - [`backup`] snapshots every target before it is mutated and can undo a
//!   whole session later.
//! - [`command`] decides which `RUN` commands may execute and runs them with
//!   a timeout.
//! - [`driver`] ties these together.
//!
//! # Safety
//!
//! - No mutation happens without a durable snapshot first (unless backups
//!   are disabled)
//! - Every replacement is verified against the expected text before it is
//!   spliced in
//! - Atomic file writes (tempfile + fsync + rename)
//! - Block patterns reject dangerous commands in every policy mode
//!
//! # Example
//!
//! ```no_run
//! use kifdiff::{parse, CommandPolicy, Driver, DriverOptions};
//!
//! let script = parse("@Kif FILE src/main.rs\n@Kif DELETE\n").unwrap();
//! let policy = CommandPolicy::builtin();
//! let mut driver = Driver::new(&policy, DriverOptions::new("."));
//!
//! match driver.execute(&script) {
//!     Ok(report) => println!("changed {} files", report.stats.files_changed()),
//!     Err(failure) => eprintln!("{failure}"),
//! }
//! ```

pub mod backup;
pub mod command;
pub mod config;
pub mod driver;
pub mod edit;
pub mod inquiry;
pub mod replace;
pub mod script;
pub mod workspace;

// Re-exports
pub use backup::{
    BackupError, BackupStore, RollbackError, RollbackReport, RollbackTarget, SessionSummary,
};
pub use command::{CommandError, CommandPolicy, PolicyBuilder, PolicyMode, Verdict};
pub use config::{load_policy, ConfigError, ConfigSources};
pub use driver::{
    AcceptAll, Confirmer, Driver, DriverOptions, ExecutionError, Outcome, PathError, RunFailure,
    RunMode, RunReport,
};
pub use edit::{atomic_write, EditError};
pub use replace::{apply, MatchError, ReplacementRule};
pub use script::{parse, Operation, OperationKind, ParseError, ParseErrors, Script};
