//! Backup sessions: one directory per run, written incrementally.
//!
//! ```text
//! .kif_backups/
//!   session_20250301_142233_004512/
//!     manifest.json
//!     blobs/000000.bin
//!     blobs/000002.bin
//! ```

use crate::backup::errors::{BackupError, RollbackError};
use crate::backup::manifest::{checksum, BackupEntry, EntryKind, Manifest};
use crate::edit::atomic_write;
use chrono::{DateTime, Local};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const DEFAULT_BACKUP_DIR: &str = ".kif_backups";
pub const MANIFEST_FILE: &str = "manifest.json";
const BLOB_DIR: &str = "blobs";
const SESSION_PREFIX: &str = "session_";

/// Root directory holding every backup session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupStore {
    root: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub id: String,
    pub created_at: DateTime<Local>,
    pub entry_count: usize,
}

/// Which session a rollback targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RollbackTarget {
    Latest,
    Session(String),
}

impl BackupStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn session_dir(&self, id: &str) -> PathBuf {
        self.root.join(id)
    }

    /// Start a new session. Nothing touches the disk until the first
    /// snapshot, so a run that mutates nothing leaves no session behind.
    pub fn begin_session(&self) -> Session {
        let created_at = Local::now();
        let id = format!("{SESSION_PREFIX}{}", created_at.format("%Y%m%d_%H%M%S_%6f"));
        debug!(%id, "beginning backup session");
        Session {
            root: self.root.clone(),
            manifest: Manifest::new(id, created_at),
            dir: None,
        }
    }

    pub fn load_manifest(&self, id: &str) -> Result<Manifest, RollbackError> {
        let path = self.session_dir(id).join(MANIFEST_FILE);
        if !path.is_file() {
            return Err(RollbackError::UnknownSession { id: id.to_string() });
        }
        Manifest::load(&path)
    }

    /// Every readable session, newest first.
    pub fn list_sessions(&self) -> Result<Vec<SessionSummary>, RollbackError> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(RollbackError::Io {
                    path: self.root.clone(),
                    source,
                })
            }
        };

        let mut sessions = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| RollbackError::Io {
                path: self.root.clone(),
                source,
            })?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with(SESSION_PREFIX) || !entry.path().is_dir() {
                continue;
            }
            match Manifest::load(&entry.path().join(MANIFEST_FILE)) {
                Ok(manifest) => sessions.push(SessionSummary {
                    id: manifest.id,
                    created_at: manifest.created_at,
                    entry_count: manifest.entries.len(),
                }),
                Err(err) => warn!(session = %name, "skipping unreadable backup session: {err}"),
            }
        }

        sessions.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(sessions)
    }

    pub fn latest(&self) -> Result<SessionSummary, RollbackError> {
        self.list_sessions()?
            .into_iter()
            .next()
            .ok_or_else(|| RollbackError::NoSessions(self.root.clone()))
    }

    pub fn resolve(&self, target: &RollbackTarget) -> Result<String, RollbackError> {
        match target {
            RollbackTarget::Latest => Ok(self.latest()?.id),
            RollbackTarget::Session(id) => Ok(id.clone()),
        }
    }
}

/// The active session of a run. Append-only.
#[derive(Debug)]
pub struct Session {
    root: PathBuf,
    manifest: Manifest,
    /// Set once the session directory exists on disk
    dir: Option<PathBuf>,
}

impl Session {
    pub fn id(&self) -> &str {
        &self.manifest.id
    }

    pub fn entries(&self) -> &[BackupEntry] {
        &self.manifest.entries
    }

    /// The session directory, if anything has been recorded yet.
    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.manifest.entries.is_empty()
    }

    /// Record the pre-mutation state of `path` and persist the manifest.
    ///
    /// `path` must be absolute. For a move, `destination` is where the source
    /// is about to go. Returns only after the entry is durable.
    pub fn snapshot(
        &mut self,
        kind: EntryKind,
        path: &Path,
        destination: Option<&Path>,
    ) -> Result<&BackupEntry, BackupError> {
        self.record(kind, path, destination, None)
    }

    /// Like [`Session::snapshot`] for a create or overwrite that is about to
    /// put `content` at `path`.
    ///
    /// The entry remembers a checksum of `content`, so rollback can tell the
    /// file it wrote apart from whatever occupies the path later.
    pub fn snapshot_write(
        &mut self,
        kind: EntryKind,
        path: &Path,
        content: &[u8],
    ) -> Result<&BackupEntry, BackupError> {
        self.record(kind, path, None, Some(checksum(content)))
    }

    fn record(
        &mut self,
        kind: EntryKind,
        path: &Path,
        destination: Option<&Path>,
        written_checksum: Option<String>,
    ) -> Result<&BackupEntry, BackupError> {
        let captured = match kind {
            EntryKind::Move => None,
            EntryKind::Create | EntryKind::Overwrite => {
                if path.is_file() {
                    Some(read_snapshot(path)?)
                } else {
                    None
                }
            }
            EntryKind::Delete | EntryKind::SearchReplace => Some(read_snapshot(path)?),
        };

        let dir = self.materialize()?;
        let seq = self.manifest.entries.len();

        let (blob, sum) = match captured {
            Some(bytes) => {
                let relative = Path::new(BLOB_DIR).join(format!("{seq:06}.bin"));
                let blob_path = dir.join(&relative);
                atomic_write(&blob_path, &bytes).map_err(|source| BackupError::Snapshot {
                    path: path.to_path_buf(),
                    source,
                })?;
                (Some(relative), Some(checksum(&bytes)))
            }
            None => (None, None),
        };

        let created_dirs = match kind {
            EntryKind::Create | EntryKind::Overwrite => missing_parents(path),
            EntryKind::Move => destination.map(missing_parents).unwrap_or_default(),
            EntryKind::Delete | EntryKind::SearchReplace => Vec::new(),
        };

        self.manifest.entries.push(BackupEntry {
            seq,
            kind,
            original_path: path.to_path_buf(),
            blob,
            checksum: sum,
            written_checksum,
            destination_path: destination.map(Path::to_path_buf),
            created_dirs,
        });

        if let Err(err) = self.manifest.store(&dir.join(MANIFEST_FILE)) {
            self.manifest.entries.pop();
            return Err(err);
        }

        debug!(session = %self.manifest.id, seq, ?kind, path = %path.display(), "snapshot recorded");
        let entry = &self.manifest.entries[seq];
        Ok(entry)
    }

    /// Create the session directory, picking a fresh id if another session
    /// already claimed this one.
    fn materialize(&mut self) -> Result<PathBuf, BackupError> {
        if let Some(dir) = &self.dir {
            return Ok(dir.clone());
        }

        fs::create_dir_all(&self.root).map_err(|source| BackupError::CreateDir {
            path: self.root.clone(),
            source,
        })?;

        let base = self.manifest.id.clone();
        let mut suffix = 0usize;
        let dir = loop {
            let candidate = if suffix == 0 {
                base.clone()
            } else {
                format!("{base}_{suffix}")
            };
            let dir = self.root.join(&candidate);
            match fs::create_dir(&dir) {
                Ok(()) => {
                    self.manifest.id = candidate;
                    break dir;
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => suffix += 1,
                Err(source) => return Err(BackupError::CreateDir { path: dir, source }),
            }
        };

        let blobs = dir.join(BLOB_DIR);
        fs::create_dir(&blobs).map_err(|source| BackupError::CreateDir {
            path: blobs,
            source,
        })?;

        self.dir = Some(dir.clone());
        Ok(dir)
    }
}

fn read_snapshot(path: &Path) -> Result<Vec<u8>, BackupError> {
    fs::read(path).map_err(|source| BackupError::Snapshot {
        path: path.to_path_buf(),
        source,
    })
}

/// Ancestors of `path` that do not exist yet, outermost first.
pub fn missing_parents(path: &Path) -> Vec<PathBuf> {
    let mut missing: Vec<PathBuf> = path
        .ancestors()
        .skip(1)
        .filter(|dir| !dir.as_os_str().is_empty())
        .take_while(|dir| !dir.exists())
        .map(Path::to_path_buf)
        .collect();
    missing.reverse();
    missing
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_session_is_lazy() {
        let dir = tempdir().unwrap();
        let store = BackupStore::new(dir.path().join(DEFAULT_BACKUP_DIR));
        let session = store.begin_session();

        assert!(session.id().starts_with("session_"));
        assert!(session.dir().is_none());
        assert!(!store.root().exists());
        assert!(store.list_sessions().unwrap().is_empty());
    }

    #[test]
    fn test_snapshot_persists_manifest_and_blob() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("a.txt");
        fs::write(&file, "before").unwrap();

        let store = BackupStore::new(dir.path().join(DEFAULT_BACKUP_DIR));
        let mut session = store.begin_session();
        let entry = session
            .snapshot(EntryKind::SearchReplace, &file, None)
            .unwrap()
            .clone();

        let session_dir = session.dir().unwrap().to_path_buf();
        let blob = fs::read(session_dir.join(entry.blob.as_ref().unwrap())).unwrap();
        assert_eq!(blob, b"before");
        assert_eq!(entry.checksum.as_deref(), Some(checksum(b"before").as_str()));

        let manifest = store.load_manifest(session.id()).unwrap();
        assert_eq!(manifest.entries, vec![entry]);
    }

    #[test]
    fn test_create_of_new_file_has_no_blob() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("x/y/new.txt");

        let store = BackupStore::new(dir.path().join(DEFAULT_BACKUP_DIR));
        let mut session = store.begin_session();
        let entry = session
            .snapshot_write(EntryKind::Create, &target, b"fresh")
            .unwrap();

        assert!(entry.blob.is_none());
        assert_eq!(entry.written_checksum, Some(checksum(b"fresh")));
        assert_eq!(
            entry.created_dirs,
            vec![dir.path().join("x"), dir.path().join("x/y")]
        );
    }

    #[test]
    fn test_snapshot_of_missing_file_fails() {
        let dir = tempdir().unwrap();
        let store = BackupStore::new(dir.path().join(DEFAULT_BACKUP_DIR));
        let mut session = store.begin_session();
        let err = session
            .snapshot(EntryKind::Delete, &dir.path().join("missing"), None)
            .unwrap_err();
        assert!(matches!(err, BackupError::Snapshot { .. }));
        assert!(session.is_empty());
    }

    #[test]
    fn test_concurrent_sessions_get_distinct_ids() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("a.txt");
        fs::write(&file, "x").unwrap();

        let store = BackupStore::new(dir.path().join(DEFAULT_BACKUP_DIR));
        let mut first = store.begin_session();
        let mut second = store.begin_session();
        // Force a collision.
        second.manifest.id = first.id().to_string();

        first.snapshot(EntryKind::Overwrite, &file, None).unwrap();
        second.snapshot(EntryKind::Overwrite, &file, None).unwrap();
        assert_ne!(first.id(), second.id());
        assert_eq!(store.list_sessions().unwrap().len(), 2);
    }

    #[test]
    fn test_list_sessions_newest_first_and_skips_garbage() {
        let dir = tempdir().unwrap();
        let root = dir.path().join(DEFAULT_BACKUP_DIR);
        let store = BackupStore::new(&root);

        for (id, count) in [("session_20240101_000000_000000", 1), ("session_20250101_000000_000000", 2)] {
            let mut manifest = Manifest::new(id, Local::now());
            for seq in 0..count {
                manifest.entries.push(BackupEntry {
                    seq,
                    kind: EntryKind::Create,
                    original_path: dir.path().join(format!("f{seq}")),
                    blob: None,
                    checksum: None,
                    written_checksum: None,
                    destination_path: None,
                    created_dirs: Vec::new(),
                });
            }
            fs::create_dir_all(root.join(id)).unwrap();
            manifest.store(&root.join(id).join(MANIFEST_FILE)).unwrap();
        }
        fs::create_dir_all(root.join("session_broken")).unwrap();
        fs::write(root.join("session_broken").join(MANIFEST_FILE), "nope").unwrap();

        let sessions = store.list_sessions().unwrap();
        let ids: Vec<&str> = sessions.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(
            ids,
            vec!["session_20250101_000000_000000", "session_20240101_000000_000000"]
        );
        assert_eq!(sessions[0].entry_count, 2);
        assert_eq!(store.latest().unwrap().id, "session_20250101_000000_000000");
    }

    #[test]
    fn test_unknown_session() {
        let dir = tempdir().unwrap();
        let store = BackupStore::new(dir.path());
        assert!(matches!(
            store.load_manifest("session_nope"),
            Err(RollbackError::UnknownSession { .. })
        ));
        assert!(matches!(store.latest(), Err(RollbackError::NoSessions(_))));
    }

    #[test]
    fn test_missing_parents() {
        let dir = tempdir().unwrap();
        assert!(missing_parents(&dir.path().join("file.txt")).is_empty());
        assert_eq!(
            missing_parents(&dir.path().join("a/b/file.txt")),
            vec![dir.path().join("a"), dir.path().join("a/b")]
        );
    }
}
