//! The filesystem as the driver sees it.
//!
//! Applying a script goes through [`DiskWorkspace`]. Dry runs and validation
//! go through [`SimulatedWorkspace`], an in-memory overlay on top of the
//! real disk, so later directives observe the simulated effects of earlier
//! ones without anything being written.

use crate::edit::atomic_write;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathKind {
    File,
    Dir,
}

pub trait Workspace {
    /// What currently exists at `path`, if anything.
    fn kind(&self, path: &Path) -> Option<PathKind>;
    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;
    /// Write a whole file, creating missing parent directories.
    fn write(&mut self, path: &Path, content: &[u8]) -> io::Result<()>;
    fn remove_file(&mut self, path: &Path) -> io::Result<()>;
    /// Move a file or directory, creating missing parent directories of `to`.
    fn rename(&mut self, from: &Path, to: &Path) -> io::Result<()>;
}

fn disk_kind(path: &Path) -> Option<PathKind> {
    let meta = fs::metadata(path).ok()?;
    Some(if meta.is_dir() {
        PathKind::Dir
    } else {
        PathKind::File
    })
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DiskWorkspace;

impl Workspace for DiskWorkspace {
    fn kind(&self, path: &Path) -> Option<PathKind> {
        disk_kind(path)
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        fs::read(path)
    }

    fn write(&mut self, path: &Path, content: &[u8]) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        atomic_write(path, content)
    }

    fn remove_file(&mut self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }

    fn rename(&mut self, from: &Path, to: &Path) -> io::Result<()> {
        if let Some(parent) = to.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::rename(from, to)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Entry {
    File(Vec<u8>),
    Dir,
    Absent,
}

#[derive(Debug, Default, Clone)]
pub struct SimulatedWorkspace {
    overlay: BTreeMap<PathBuf, Entry>,
}

impl SimulatedWorkspace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Paths whose simulated state differs from the disk.
    pub fn touched(&self) -> impl Iterator<Item = &Path> {
        self.overlay.keys().map(PathBuf::as_path)
    }

    /// The overlay entry governing `path`: its own, or an ancestor's removal.
    fn lookup(&self, path: &Path) -> Option<&Entry> {
        if let Some(entry) = self.overlay.get(path) {
            return Some(entry);
        }
        path.ancestors()
            .skip(1)
            .find_map(|dir| match self.overlay.get(dir) {
                Some(Entry::Absent) => Some(&Entry::Absent),
                _ => None,
            })
    }

    fn not_found(path: &Path) -> io::Error {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("{} does not exist", path.display()),
        )
    }
}

impl Workspace for SimulatedWorkspace {
    fn kind(&self, path: &Path) -> Option<PathKind> {
        match self.lookup(path) {
            Some(Entry::File(_)) => Some(PathKind::File),
            Some(Entry::Dir) => Some(PathKind::Dir),
            Some(Entry::Absent) => None,
            None => disk_kind(path),
        }
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        match self.lookup(path) {
            Some(Entry::File(bytes)) => Ok(bytes.clone()),
            Some(Entry::Dir) => Err(io::Error::new(
                io::ErrorKind::Other,
                format!("{} is a directory", path.display()),
            )),
            Some(Entry::Absent) => Err(Self::not_found(path)),
            None => fs::read(path),
        }
    }

    fn write(&mut self, path: &Path, content: &[u8]) -> io::Result<()> {
        self.overlay
            .insert(path.to_path_buf(), Entry::File(content.to_vec()));
        Ok(())
    }

    fn remove_file(&mut self, path: &Path) -> io::Result<()> {
        match self.kind(path) {
            Some(PathKind::File) => {
                self.overlay.insert(path.to_path_buf(), Entry::Absent);
                Ok(())
            }
            Some(PathKind::Dir) => Err(io::Error::new(
                io::ErrorKind::Other,
                format!("{} is a directory", path.display()),
            )),
            None => Err(Self::not_found(path)),
        }
    }

    fn rename(&mut self, from: &Path, to: &Path) -> io::Result<()> {
        let moved = match self.kind(from) {
            Some(PathKind::File) => Entry::File(self.read(from)?),
            Some(PathKind::Dir) => Entry::Dir,
            None => return Err(Self::not_found(from)),
        };
        self.overlay.insert(from.to_path_buf(), Entry::Absent);
        self.overlay.insert(to.to_path_buf(), moved);
        Ok(())
    }
}
