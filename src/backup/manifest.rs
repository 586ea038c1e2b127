use crate::backup::errors::{BackupError, RollbackError};
use crate::edit::atomic_write;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// The kind of mutation an entry protects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Create,
    Overwrite,
    Delete,
    Move,
    SearchReplace,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupEntry {
    pub seq: usize,
    pub kind: EntryKind,
    /// Absolute path the operation targeted (the source, for a move).
    pub original_path: PathBuf,
    /// Snapshot of the pre-mutation bytes, relative to the session directory.
    /// Absent when the file did not exist.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blob: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    /// xxh3 of the bytes a create or overwrite put in place. Rollback only
    /// removes a created file while it still holds exactly these bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub written_checksum: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_path: Option<PathBuf>,
    /// Directories the operation had to create, outermost first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub created_dirs: Vec<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub id: String,
    pub created_at: DateTime<Local>,
    #[serde(default)]
    pub entries: Vec<BackupEntry>,
}

impl Manifest {
    pub fn new(id: impl Into<String>, created_at: DateTime<Local>) -> Self {
        Self {
            id: id.into(),
            created_at,
            entries: Vec::new(),
        }
    }

    pub fn load(path: &Path) -> Result<Self, RollbackError> {
        let bytes = fs::read(path).map_err(|source| RollbackError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_slice(&bytes).map_err(|e| RollbackError::CorruptManifest {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Replace the manifest on disk in one atomic step.
    pub fn store(&self, path: &Path) -> Result<(), BackupError> {
        let mut json = serde_json::to_vec_pretty(self)?;
        json.push(b'\n');
        atomic_write(path, &json).map_err(|source| BackupError::Manifest {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// xxh3-64 of `bytes`, as lowercase hex.
pub fn checksum(bytes: &[u8]) -> String {
    format!("{:016x}", xxhash_rust::xxh3::xxh3_64(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_store_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.json");

        let mut manifest = Manifest::new("session_20250101_120000_000001", Local::now());
        manifest.entries.push(BackupEntry {
            seq: 0,
            kind: EntryKind::SearchReplace,
            original_path: PathBuf::from("/tmp/a.txt"),
            blob: Some(PathBuf::from("blobs/000000.bin")),
            checksum: Some(checksum(b"content")),
            written_checksum: None,
            destination_path: None,
            created_dirs: Vec::new(),
        });
        manifest.store(&path).unwrap();

        let loaded = Manifest::load(&path).unwrap();
        assert_eq!(loaded, manifest);

        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"kind\": \"search_replace\""));
        assert!(!raw.contains("destination_path"));
        assert!(!raw.contains("written_checksum"));
    }

    #[test]
    fn test_corrupt_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            Manifest::load(&path),
            Err(RollbackError::CorruptManifest { .. })
        ));
    }

    #[test]
    fn test_checksum_is_stable_hex() {
        let sum = checksum(b"hello");
        assert_eq!(sum.len(), 16);
        assert_eq!(sum, checksum(b"hello"));
        assert_ne!(sum, checksum(b"hello!"));
    }
}
