//! Reversing a recorded session.
//!
//! Entries are undone newest-first. Every step checks the current state of
//! the filesystem before acting, so rolling back the same session twice is
//! harmless. Rollback records nothing itself.

use crate::backup::errors::RollbackError;
use crate::backup::manifest::{checksum, BackupEntry, EntryKind};
use crate::backup::session::{BackupStore, RollbackTarget};
use crate::edit::atomic_write;
use std::fs;
use std::io;
use std::path::Path;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RollbackReport {
    pub session_id: String,
    pub restored: usize,
    pub removed: usize,
    pub moved_back: usize,
    /// Entries whose target was already in its pre-run state
    pub skipped: usize,
}

impl RollbackReport {
    /// Entries that changed something on disk.
    pub fn changed(&self) -> usize {
        self.restored + self.removed + self.moved_back
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reversal {
    Restored,
    Removed,
    MovedBack,
    Skipped,
}

impl BackupStore {
    /// Undo every entry of a session, newest first.
    ///
    /// Stops at the first entry that cannot be reversed; the entries already
    /// reversed stay reversed and the error says how many there were.
    pub fn rollback(&self, target: &RollbackTarget) -> Result<RollbackReport, RollbackError> {
        let id = self.resolve(target)?;
        let manifest = self.load_manifest(&id)?;
        let session_dir = self.session_dir(&id);
        let total = manifest.entries.len();

        info!(session = %id, entries = total, "rolling back session");
        let mut report = RollbackReport {
            session_id: id,
            ..RollbackReport::default()
        };

        for (reversed, entry) in manifest.entries.iter().rev().enumerate() {
            let outcome = reverse_entry(&session_dir, entry).map_err(|source| {
                RollbackError::Interrupted {
                    reversed,
                    total,
                    source: Box::new(source),
                }
            })?;
            debug!(seq = entry.seq, ?outcome, "reversed entry");
            match outcome {
                Reversal::Restored => report.restored += 1,
                Reversal::Removed => report.removed += 1,
                Reversal::MovedBack => report.moved_back += 1,
                Reversal::Skipped => report.skipped += 1,
            }
        }

        Ok(report)
    }
}

fn reverse_entry(session_dir: &Path, entry: &BackupEntry) -> Result<Reversal, RollbackError> {
    let path = &entry.original_path;
    let outcome = match entry.kind {
        EntryKind::Create | EntryKind::Overwrite => match &entry.blob {
            Some(_) => restore(session_dir, entry)?,
            None => remove_created(path, entry.written_checksum.as_deref())?,
        },
        EntryKind::Delete | EntryKind::SearchReplace => restore(session_dir, entry)?,
        EntryKind::Move => move_back(entry)?,
    };

    for dir in entry.created_dirs.iter().rev() {
        remove_created_dir(dir);
    }
    Ok(outcome)
}

/// Only empty directories go; anything else was populated after the run.
fn remove_created_dir(dir: &Path) {
    match fs::remove_dir(dir) {
        Ok(()) => debug!(dir = %dir.display(), "removed created directory"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(_) if has_entries(dir) => {
            debug!(dir = %dir.display(), "created directory is not empty; leaving it")
        }
        Err(err) => warn!(dir = %dir.display(), "cannot remove created directory: {err}"),
    }
}

fn has_entries(dir: &Path) -> bool {
    fs::read_dir(dir).is_ok_and(|mut entries| entries.next().is_some())
}

fn load_blob(session_dir: &Path, entry: &BackupEntry) -> Result<Vec<u8>, RollbackError> {
    let Some(relative) = &entry.blob else {
        return Err(RollbackError::CorruptManifest {
            path: session_dir.to_path_buf(),
            message: format!("entry {} has no snapshot blob", entry.seq),
        });
    };
    let blob_path = session_dir.join(relative);

    let bytes = fs::read(&blob_path).map_err(|source| match source.kind() {
        io::ErrorKind::NotFound => RollbackError::MissingBlob {
            path: blob_path.clone(),
        },
        _ => RollbackError::Io {
            path: blob_path.clone(),
            source,
        },
    })?;

    if let Some(expected) = &entry.checksum {
        if &checksum(&bytes) != expected {
            return Err(RollbackError::ChecksumMismatch { path: blob_path });
        }
    }
    Ok(bytes)
}

fn restore(session_dir: &Path, entry: &BackupEntry) -> Result<Reversal, RollbackError> {
    let bytes = load_blob(session_dir, entry)?;
    let path = &entry.original_path;

    if fs::read(path).is_ok_and(|current| current == bytes) {
        return Ok(Reversal::Skipped);
    }

    let io_err = |source| RollbackError::Io {
        path: path.clone(),
        source,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    atomic_write(path, &bytes).map_err(io_err)?;
    Ok(Reversal::Restored)
}

/// Remove a file the run created, unless something else now lives there.
///
/// With `written` set, the file must still hold the bytes the run wrote.
fn remove_created(path: &Path, written: Option<&str>) -> Result<Reversal, RollbackError> {
    let io_err = |source| RollbackError::Io {
        path: path.to_path_buf(),
        source,
    };
    match fs::symlink_metadata(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Reversal::Skipped),
        Err(source) => Err(io_err(source)),
        Ok(meta) if meta.is_dir() => {
            warn!(path = %path.display(), "created file was replaced by a directory; leaving it");
            Ok(Reversal::Skipped)
        }
        Ok(_) => {
            if let Some(expected) = written {
                let current = fs::read(path).map_err(io_err)?;
                if checksum(&current) != expected {
                    warn!(path = %path.display(), "file no longer holds the content the run wrote; leaving it");
                    return Ok(Reversal::Skipped);
                }
            }
            fs::remove_file(path).map_err(io_err)?;
            Ok(Reversal::Removed)
        }
    }
}

fn move_back(entry: &BackupEntry) -> Result<Reversal, RollbackError> {
    let Some(destination) = &entry.destination_path else {
        return Err(RollbackError::CorruptManifest {
            path: entry.original_path.clone(),
            message: format!("move entry {} has no destination", entry.seq),
        });
    };
    let source = &entry.original_path;

    match (source.exists(), destination.exists()) {
        (false, true) => {
            let io_err = |error| RollbackError::Io {
                path: source.clone(),
                source: error,
            };
            if let Some(parent) = source.parent() {
                fs::create_dir_all(parent).map_err(io_err)?;
            }
            fs::rename(destination, source).map_err(io_err)?;
            Ok(Reversal::MovedBack)
        }
        (true, false) => Ok(Reversal::Skipped),
        (true, true) => Err(RollbackError::Conflict {
            from: destination.clone(),
            to: source.clone(),
        }),
        (false, false) => {
            warn!(
                source = %source.display(),
                destination = %destination.display(),
                "moved path no longer exists at either location"
            );
            Ok(Reversal::Skipped)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::session::DEFAULT_BACKUP_DIR;
    use tempfile::tempdir;

    #[test]
    fn test_rollback_reverses_every_kind() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        let store = BackupStore::new(root.join(DEFAULT_BACKUP_DIR));
        let mut session = store.begin_session();

        // create
        let created = root.join("new/dir/created.txt");
        session
            .snapshot_write(EntryKind::Create, &created, b"fresh")
            .unwrap();
        fs::create_dir_all(created.parent().unwrap()).unwrap();
        fs::write(&created, "fresh").unwrap();

        // overwrite of an existing file
        let overwritten = root.join("over.txt");
        fs::write(&overwritten, "old").unwrap();
        session.snapshot(EntryKind::Overwrite, &overwritten, None).unwrap();
        fs::write(&overwritten, "new").unwrap();

        // search and replace
        let edited = root.join("edit.txt");
        fs::write(&edited, "var x = 1;").unwrap();
        session.snapshot(EntryKind::SearchReplace, &edited, None).unwrap();
        fs::write(&edited, "let x = 1;").unwrap();

        // delete
        let deleted = root.join("gone.txt");
        fs::write(&deleted, "keep me").unwrap();
        session.snapshot(EntryKind::Delete, &deleted, None).unwrap();
        fs::remove_file(&deleted).unwrap();

        // move
        let src = root.join("a.txt");
        let dst = root.join("b/a.txt");
        fs::write(&src, "moving").unwrap();
        session.snapshot(EntryKind::Move, &src, Some(&dst)).unwrap();
        fs::create_dir_all(dst.parent().unwrap()).unwrap();
        fs::rename(&src, &dst).unwrap();

        let report = store.rollback(&RollbackTarget::Latest).unwrap();
        assert_eq!(report.session_id, session.id());
        assert_eq!(report.removed, 1);
        assert_eq!(report.restored, 3);
        assert_eq!(report.moved_back, 1);

        assert!(!created.exists());
        assert!(!root.join("new").exists());
        assert_eq!(fs::read_to_string(&overwritten).unwrap(), "old");
        assert_eq!(fs::read_to_string(&edited).unwrap(), "var x = 1;");
        assert_eq!(fs::read_to_string(&deleted).unwrap(), "keep me");
        assert_eq!(fs::read_to_string(&src).unwrap(), "moving");
        assert!(!dst.exists());
        assert!(!root.join("b").exists());
    }

    #[test]
    fn test_rollback_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = BackupStore::new(dir.path().join(DEFAULT_BACKUP_DIR));
        let mut session = store.begin_session();

        let file = dir.path().join("f.txt");
        fs::write(&file, "one").unwrap();
        session.snapshot(EntryKind::SearchReplace, &file, None).unwrap();
        fs::write(&file, "two").unwrap();
        let target = RollbackTarget::Session(session.id().to_string());

        let first = store.rollback(&target).unwrap();
        assert_eq!(first.restored, 1);
        let second = store.rollback(&target).unwrap();
        assert_eq!(second.changed(), 0);
        assert_eq!(second.skipped, 1);
        assert_eq!(fs::read_to_string(&file).unwrap(), "one");
    }

    #[test]
    fn test_created_file_edited_after_run_is_kept() {
        let dir = tempdir().unwrap();
        let store = BackupStore::new(dir.path().join(DEFAULT_BACKUP_DIR));
        let mut session = store.begin_session();

        let file = dir.path().join("notes.txt");
        session
            .snapshot_write(EntryKind::Create, &file, b"draft")
            .unwrap();
        fs::write(&file, "draft").unwrap();
        fs::write(&file, "someone else's work").unwrap();

        let report = store.rollback(&RollbackTarget::Latest).unwrap();
        assert_eq!(report.removed, 0);
        assert_eq!(report.skipped, 1);
        assert_eq!(fs::read_to_string(&file).unwrap(), "someone else's work");
    }

    #[test]
    fn test_created_dir_replaced_by_file_is_left() {
        let dir = tempdir().unwrap();
        let store = BackupStore::new(dir.path().join(DEFAULT_BACKUP_DIR));
        let mut session = store.begin_session();

        let src = dir.path().join("a.txt");
        let dst = dir.path().join("b/a.txt");
        fs::write(&src, "a").unwrap();
        session.snapshot(EntryKind::Move, &src, Some(&dst)).unwrap();
        fs::create_dir_all(dst.parent().unwrap()).unwrap();
        fs::rename(&src, &dst).unwrap();

        // The created directory is gone and a plain file took its name.
        fs::remove_dir_all(dir.path().join("b")).unwrap();
        fs::write(dir.path().join("b"), "not a directory").unwrap();

        let report = store.rollback(&RollbackTarget::Latest).unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(
            fs::read_to_string(dir.path().join("b")).unwrap(),
            "not a directory"
        );
    }

    #[test]
    fn test_missing_blob_stops_rollback() {
        let dir = tempdir().unwrap();
        let store = BackupStore::new(dir.path().join(DEFAULT_BACKUP_DIR));
        let mut session = store.begin_session();

        let file = dir.path().join("f.txt");
        fs::write(&file, "one").unwrap();
        let blob = session
            .snapshot(EntryKind::Delete, &file, None)
            .unwrap()
            .blob
            .clone()
            .unwrap();
        fs::remove_file(&file).unwrap();
        fs::remove_file(session.dir().unwrap().join(blob)).unwrap();

        let err = store.rollback(&RollbackTarget::Latest).unwrap_err();
        match err {
            RollbackError::Interrupted {
                reversed, source, ..
            } => {
                assert_eq!(reversed, 0);
                assert!(matches!(*source, RollbackError::MissingBlob { .. }));
            }
            other => panic!("expected Interrupted, got {other:?}"),
        }
    }

    #[test]
    fn test_tampered_blob_detected() {
        let dir = tempdir().unwrap();
        let store = BackupStore::new(dir.path().join(DEFAULT_BACKUP_DIR));
        let mut session = store.begin_session();

        let file = dir.path().join("f.txt");
        fs::write(&file, "one").unwrap();
        let blob = session
            .snapshot(EntryKind::SearchReplace, &file, None)
            .unwrap()
            .blob
            .clone()
            .unwrap();
        fs::write(session.dir().unwrap().join(blob), "tampered").unwrap();
        fs::write(&file, "two").unwrap();

        let err = store.rollback(&RollbackTarget::Latest).unwrap_err();
        assert!(err.to_string().contains("checksum"));
        assert_eq!(fs::read_to_string(&file).unwrap(), "two");
    }

    #[test]
    fn test_move_conflict() {
        let dir = tempdir().unwrap();
        let store = BackupStore::new(dir.path().join(DEFAULT_BACKUP_DIR));
        let mut session = store.begin_session();

        let src = dir.path().join("a.txt");
        let dst = dir.path().join("b.txt");
        fs::write(&src, "a").unwrap();
        session.snapshot(EntryKind::Move, &src, Some(&dst)).unwrap();
        fs::rename(&src, &dst).unwrap();
        // Something new appears at the source.
        fs::write(&src, "intruder").unwrap();

        let err = store.rollback(&RollbackTarget::Latest).unwrap_err();
        let RollbackError::Interrupted { source, .. } = err else {
            panic!("expected Interrupted");
        };
        assert!(matches!(*source, RollbackError::Conflict { .. }));
    }

    #[test]
    fn test_unknown_session_rollback() {
        let dir = tempdir().unwrap();
        let store = BackupStore::new(dir.path());
        let err = store
            .rollback(&RollbackTarget::Session("session_missing".into()))
            .unwrap_err();
        assert!(matches!(err, RollbackError::UnknownSession { .. }));
    }
}
