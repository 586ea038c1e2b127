//! Read-only directives: READ, TREE and FIND.
//!
//! Each renders a block of text that the driver collects into the run
//! report, ready to be handed to a clipboard or printed.

use crate::script::{FindParams, TreeParams};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::{DirEntry, WalkDir};

#[derive(Error, Debug)]
pub enum InquiryError {
    #[error("{} is not a directory", path.display())]
    NotADirectory { path: PathBuf },

    #[error("failed to list {}: {source}", path.display())]
    List {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to walk {}: {source}", path.display())]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },
}

pub fn render_read(path: &Path, content: &str) -> String {
    let mut out = format!("===== FILE: {} =====\n{}", path.display(), content);
    if !content.ends_with('\n') {
        out.push('\n');
    }
    out
}

fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

/// Draw `root` as an indented tree using box-drawing connectors.
///
/// Entries are sorted by name. `depth = 1` lists only the direct children.
/// Unreadable subdirectories are shown with a `[permission denied]` leaf
/// instead of failing the whole tree.
pub fn render_tree(root: &Path, params: &TreeParams) -> Result<String, InquiryError> {
    if !root.is_dir() {
        return Err(InquiryError::NotADirectory {
            path: root.to_path_buf(),
        });
    }

    let mut lines = vec![root.display().to_string()];
    let top = list_children(root, params).map_err(|source| InquiryError::List {
        path: root.to_path_buf(),
        source,
    })?;
    draw(&top, "", 1, params, &mut lines);

    let mut out = format!("===== DIRECTORY TREE: {} =====\n", root.display());
    out.push_str(&lines.join("\n"));
    out.push('\n');
    Ok(out)
}

struct Child {
    name: String,
    path: PathBuf,
    is_dir: bool,
}

fn list_children(dir: &Path, params: &TreeParams) -> io::Result<Vec<Child>> {
    let mut children = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if !params.show_hidden && is_hidden(&name) {
            continue;
        }
        let path = entry.path();
        let is_dir = path.is_dir();
        if !is_dir && !params.include_files {
            continue;
        }
        children.push(Child { name, path, is_dir });
    }
    children.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(children)
}

fn draw(
    children: &[Child],
    prefix: &str,
    depth: usize,
    params: &TreeParams,
    lines: &mut Vec<String>,
) {
    for (idx, child) in children.iter().enumerate() {
        let last = idx + 1 == children.len();
        let connector = if last { "└── " } else { "├── " };
        let suffix = if child.is_dir { "/" } else { "" };
        lines.push(format!("{prefix}{connector}{}{suffix}", child.name));

        if !child.is_dir || params.depth.is_some_and(|max| depth >= max) {
            continue;
        }
        let nested = format!("{prefix}{}", if last { "    " } else { "│   " });
        match list_children(&child.path, params) {
            Ok(grandchildren) => draw(&grandchildren, &nested, depth + 1, params, lines),
            Err(_) => lines.push(format!("{nested}└── [permission denied]")),
        }
    }
}

/// Files under `root` matching `params`, as paths relative to `root`.
///
/// `match_pattern` is searched in the file name; `include` and `exclude`
/// are searched in the relative path with `/` separators. Hidden
/// directories are never descended into.
pub fn find_files(root: &Path, params: &FindParams) -> Result<Vec<PathBuf>, InquiryError> {
    if !root.is_dir() {
        return Err(InquiryError::NotADirectory {
            path: root.to_path_buf(),
        });
    }

    let mut walker = WalkDir::new(root).min_depth(1).sort_by_file_name();
    if let Some(depth) = params.depth {
        walker = walker.max_depth(depth);
    }

    let mut found = Vec::new();
    let entries = walker
        .into_iter()
        .filter_entry(|entry| !(entry.file_type().is_dir() && entry_is_hidden(entry)));
    for entry in entries {
        let entry = entry.map_err(|source| InquiryError::Walk {
            path: root.to_path_buf(),
            source,
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if !params.match_pattern.is_match(&name) {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .to_path_buf();
        let display = relative.to_string_lossy().replace('\\', "/");
        if params.exclude.as_ref().is_some_and(|re| re.is_match(&display)) {
            continue;
        }
        if params.include.as_ref().is_some_and(|re| !re.is_match(&display)) {
            continue;
        }
        found.push(relative);
    }
    Ok(found)
}

fn entry_is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0 && is_hidden(&entry.file_name().to_string_lossy())
}

pub fn render_find(root: &Path, params: &FindParams, files: &[PathBuf]) -> String {
    let mut out = format!(
        "===== FIND RESULTS: {} =====\nMatch Pattern: {}\n",
        root.display(),
        params.match_pattern.as_str()
    );
    if let Some(include) = &params.include {
        out.push_str(&format!("Include: {}\n", include.as_str()));
    }
    if let Some(exclude) = &params.exclude {
        out.push_str(&format!("Exclude: {}\n", exclude.as_str()));
    }
    out.push_str(&format!("\nFound {} file(s):\n", files.len()));
    for file in files {
        out.push_str(&format!("  - {}\n", file.to_string_lossy().replace('\\', "/")));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use regex::Regex;
    use tempfile::tempdir;

    fn layout() -> tempfile::TempDir {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("src/nested")).unwrap();
        fs::create_dir_all(root.join(".git")).unwrap();
        fs::write(root.join("Cargo.toml"), "").unwrap();
        fs::write(root.join("src/lib.rs"), "").unwrap();
        fs::write(root.join("src/nested/deep.rs"), "").unwrap();
        fs::write(root.join(".git/config"), "").unwrap();
        fs::write(root.join(".env"), "").unwrap();
        dir
    }

    fn find_params(pattern: &str) -> FindParams {
        FindParams {
            match_pattern: Regex::new(pattern).unwrap(),
            include: None,
            exclude: None,
            depth: None,
        }
    }

    #[test]
    fn test_render_read_terminates_content() {
        let out = render_read(Path::new("a.txt"), "hello");
        assert_eq!(out, "===== FILE: a.txt =====\nhello\n");
    }

    #[test]
    fn test_tree_hides_dotfiles_by_default() {
        let dir = layout();
        let out = render_tree(dir.path(), &TreeParams::default()).unwrap();
        let body: Vec<&str> = out.lines().skip(2).collect();
        assert_eq!(
            body,
            vec![
                "├── Cargo.toml",
                "└── src/",
                "    ├── lib.rs",
                "    └── nested/",
                "        └── deep.rs",
            ]
        );
    }

    #[test]
    fn test_tree_depth_and_dirs_only() {
        let dir = layout();
        let params = TreeParams {
            depth: Some(1),
            show_hidden: true,
            include_files: false,
        };
        let out = render_tree(dir.path(), &params).unwrap();
        let body: Vec<&str> = out.lines().skip(2).collect();
        assert_eq!(body, vec!["├── .git/", "└── src/"]);
    }

    #[test]
    fn test_tree_rejects_file_root() {
        let dir = layout();
        let err = render_tree(&dir.path().join("Cargo.toml"), &TreeParams::default()).unwrap_err();
        assert!(matches!(err, InquiryError::NotADirectory { .. }));
    }

    #[test]
    fn test_find_skips_hidden_directories() {
        let dir = layout();
        let files = find_files(dir.path(), &find_params(".*")).unwrap();
        assert_eq!(
            files,
            vec![
                PathBuf::from(".env"),
                PathBuf::from("Cargo.toml"),
                PathBuf::from("src/lib.rs"),
                PathBuf::from("src/nested/deep.rs"),
            ]
        );
    }

    #[test]
    fn test_find_pattern_depth_and_exclude() {
        let dir = layout();
        let mut params = find_params(r"\.rs$");
        assert_eq!(find_files(dir.path(), &params).unwrap().len(), 2);

        params.depth = Some(2);
        assert_eq!(
            find_files(dir.path(), &params).unwrap(),
            vec![PathBuf::from("src/lib.rs")]
        );

        params.depth = None;
        params.exclude = Some(Regex::new("nested/").unwrap());
        assert_eq!(
            find_files(dir.path(), &params).unwrap(),
            vec![PathBuf::from("src/lib.rs")]
        );
    }

    #[test]
    fn test_render_find_lists_results() {
        let params = find_params(r"\.rs$");
        let out = render_find(Path::new("proj"), &params, &[PathBuf::from("src/lib.rs")]);
        assert!(out.starts_with("===== FIND RESULTS: proj =====\n"));
        assert!(out.contains("Found 1 file(s):\n  - src/lib.rs\n"));
    }
}
