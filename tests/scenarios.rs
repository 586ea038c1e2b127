//! End-to-end scenarios through the library: parse, execute, roll back.

use kifdiff::backup::{EntryKind, DEFAULT_BACKUP_DIR};
use kifdiff::{
    parse, BackupStore, CommandPolicy, Driver, DriverOptions, ExecutionError, MatchError,
    RollbackTarget, RunMode,
};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn run(dir: &Path, mode: RunMode, script: &str) -> Result<kifdiff::RunReport, kifdiff::RunFailure> {
    let policy = CommandPolicy::builtin();
    let script = parse(script).expect("script should parse");
    let result = Driver::new(&policy, DriverOptions::new(dir).mode(mode)).execute(&script);
    result
}

fn store(dir: &Path) -> BackupStore {
    BackupStore::new(dir.join(DEFAULT_BACKUP_DIR))
}

const REPLACE_VAR: &str = "\
@Kif FILE a.txt
@Kif SEARCH_AND_REPLACE
@Kif BEFORE
var x = 1;
@Kif END_BEFORE
@Kif AFTER
let x = 1;
@Kif END_AFTER
@Kif END_SEARCH_AND_REPLACE
";

#[test]
fn test_search_replace_records_one_entry() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("a.txt"), "// setup\nvar x = 1;\nconsole.log(x);\n").unwrap();

    let report = run(dir.path(), RunMode::Apply, REPLACE_VAR).unwrap();

    assert_eq!(
        fs::read_to_string(dir.path().join("a.txt")).unwrap(),
        "// setup\nlet x = 1;\nconsole.log(x);\n"
    );
    let id = report.session_id.expect("a session should be recorded");
    let manifest = store(dir.path()).load_manifest(&id).unwrap();
    assert_eq!(manifest.entries.len(), 1);
    assert_eq!(manifest.entries[0].kind, EntryKind::SearchReplace);
}

#[test]
fn test_dry_run_reports_without_writing() {
    let dir = TempDir::new().unwrap();
    let original = "var x = 1;\n";
    fs::write(dir.path().join("a.txt"), original).unwrap();

    let report = run(dir.path(), RunMode::DryRun, REPLACE_VAR).unwrap();

    assert_eq!(report.stats.modified, 1);
    assert_eq!(report.session_id, None);
    assert_eq!(fs::read_to_string(dir.path().join("a.txt")).unwrap(), original);
    assert!(!dir.path().join(DEFAULT_BACKUP_DIR).exists());
}

#[test]
fn test_create_then_rollback_removes_file() {
    let dir = TempDir::new().unwrap();
    let script = "@Kif CREATE new.txt\nhello\n@Kif END_CREATE\n";

    run(dir.path(), RunMode::Apply, script).unwrap();
    assert_eq!(
        fs::read_to_string(dir.path().join("new.txt")).unwrap(),
        "hello\n"
    );

    let report = store(dir.path()).rollback(&RollbackTarget::Latest).unwrap();
    assert_eq!(report.removed, 1);
    assert!(!dir.path().join("new.txt").exists());
}

#[test]
fn test_move_then_rollback_restores_source() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("a.txt"), "payload").unwrap();

    run(dir.path(), RunMode::Apply, "@Kif MOVE a.txt b/a.txt\n").unwrap();
    assert!(!dir.path().join("a.txt").exists());
    assert!(dir.path().join("b/a.txt").exists());

    let report = store(dir.path()).rollback(&RollbackTarget::Latest).unwrap();
    assert_eq!(report.moved_back, 1);
    assert_eq!(fs::read_to_string(dir.path().join("a.txt")).unwrap(), "payload");
    assert!(!dir.path().join("b/a.txt").exists());
    assert!(!dir.path().join("b").exists());
}

#[test]
fn test_full_run_rolls_back_byte_for_byte() {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    fs::create_dir(root.join("src")).unwrap();
    fs::write(root.join("src/main.rs"), "fn main() {\n    old();\n}\n").unwrap();
    fs::write(root.join("README.md"), "# readme\n").unwrap();
    fs::write(root.join("obsolete.txt"), [0u8, 159, 146, 150]).unwrap();

    let script = "\
# every mutating directive once
@Kif CREATE src/util.rs
pub fn helper() {}
@Kif END_CREATE
@Kif OVERWRITE_FILE README.md
# KifDiff
@Kif END_OVERWRITE_FILE
@Kif DELETE obsolete.txt
@Kif FILE src/main.rs
@Kif SEARCH_AND_REPLACE(replace_all=true)
@Kif BEFORE
old()
@Kif END_BEFORE
@Kif AFTER
new()
@Kif END_AFTER
@Kif END_SEARCH_AND_REPLACE
@Kif MOVE src/util.rs src/helpers/util.rs
";
    let report = run(root, RunMode::Apply, script).unwrap();
    assert_eq!(report.stats.files_changed(), 5);
    assert!(root.join("src/helpers/util.rs").exists());

    store(root).rollback(&RollbackTarget::Latest).unwrap();

    assert_eq!(
        fs::read_to_string(root.join("src/main.rs")).unwrap(),
        "fn main() {\n    old();\n}\n"
    );
    assert_eq!(fs::read_to_string(root.join("README.md")).unwrap(), "# readme\n");
    assert_eq!(fs::read(root.join("obsolete.txt")).unwrap(), vec![0u8, 159, 146, 150]);
    assert!(!root.join("src/util.rs").exists());
    assert!(!root.join("src/helpers").exists());

    // a second rollback finds everything already in place
    let again = store(root).rollback(&RollbackTarget::Latest).unwrap();
    assert_eq!(again.changed(), 0);
}

#[test]
fn test_too_few_matches_leaves_file_untouched() {
    let dir = TempDir::new().unwrap();
    let original = "x\nx\ny\n";
    fs::write(dir.path().join("a.txt"), original).unwrap();

    let script = "\
@Kif SEARCH_AND_REPLACE(count=3) a.txt
@Kif BEFORE
x
@Kif END_BEFORE
@Kif AFTER
z
@Kif END_AFTER
@Kif END_SEARCH_AND_REPLACE
";
    let failure = run(dir.path(), RunMode::Apply, script).unwrap_err();

    match failure.error {
        ExecutionError::Match { source, .. } => {
            assert!(matches!(
                source,
                MatchError::TooFewMatches {
                    found: 2,
                    required: 3,
                    ..
                }
            ));
        }
        other => panic!("expected a match error, got {other}"),
    }
    assert_eq!(fs::read_to_string(dir.path().join("a.txt")).unwrap(), original);
    assert_eq!(failure.report.session_id, None);
}

#[test]
fn test_failure_keeps_completed_prefix_rollbackable() {
    let dir = TempDir::new().unwrap();
    let script = "\
@Kif CREATE one.txt
1
@Kif END_CREATE
@Kif DELETE missing.txt
@Kif CREATE two.txt
2
@Kif END_CREATE
";
    let failure = run(dir.path(), RunMode::Apply, script).unwrap_err();
    assert_eq!(failure.line, 4);
    assert!(dir.path().join("one.txt").exists());
    assert!(!dir.path().join("two.txt").exists());

    let id = failure.report.session_id.expect("prefix should be recorded");
    store(dir.path())
        .rollback(&RollbackTarget::Session(id))
        .unwrap();
    assert!(!dir.path().join("one.txt").exists());
}

#[test]
fn test_list_sessions_newest_first() {
    let dir = TempDir::new().unwrap();
    run(dir.path(), RunMode::Apply, "@Kif CREATE a.txt\na\n@Kif END_CREATE\n").unwrap();
    run(dir.path(), RunMode::Apply, "@Kif CREATE b.txt\nb\n@Kif END_CREATE\n").unwrap();

    let sessions = store(dir.path()).list_sessions().unwrap();
    assert_eq!(sessions.len(), 2);
    assert!(sessions[0].id > sessions[1].id);
    assert!(sessions.iter().all(|s| s.entry_count == 1));
}

#[test]
fn test_ignore_whitespace_preserves_surrounding_text() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("a.py"),
        "def f():   \n    return 1  \n\n  # trailing  \n",
    )
    .unwrap();

    let script = "\
@Kif SEARCH_AND_REPLACE(ignore_whitespace=true) a.py
@Kif BEFORE
def f():
    return 1
@Kif END_BEFORE
@Kif AFTER
def f():
    return 2
@Kif END_AFTER
@Kif END_SEARCH_AND_REPLACE
";
    run(dir.path(), RunMode::Apply, script).unwrap();
    assert_eq!(
        fs::read_to_string(dir.path().join("a.py")).unwrap(),
        "def f():\n    return 2  \n\n  # trailing  \n"
    );
}

#[test]
fn test_second_rollback_keeps_restored_original() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("a.txt"), "ORIGINAL").unwrap();

    let script = "\
@Kif MOVE a.txt b.txt
@Kif CREATE a.txt
replacement
@Kif END_CREATE
";
    run(dir.path(), RunMode::Apply, script).unwrap();
    assert_eq!(
        fs::read_to_string(dir.path().join("a.txt")).unwrap(),
        "replacement\n"
    );

    store(dir.path()).rollback(&RollbackTarget::Latest).unwrap();
    assert_eq!(fs::read_to_string(dir.path().join("a.txt")).unwrap(), "ORIGINAL");
    assert!(!dir.path().join("b.txt").exists());

    let again = store(dir.path()).rollback(&RollbackTarget::Latest).unwrap();
    assert_eq!(again.changed(), 0);
    assert_eq!(fs::read_to_string(dir.path().join("a.txt")).unwrap(), "ORIGINAL");
}
