//! Byte-span splicing and crash-safe file writes.
//!
//! Every textual change the engine makes compiles down to a [`Splice`]: a
//! verified replacement of `[byte_start, byte_end)` in a known text. Splices
//! carry the text they expect to remove, so a span computed against one
//! version of a file can never be applied to another.

use std::fs;
use std::io::{self, Write};
use std::path::Path;
use thiserror::Error;
use xxhash_rust::xxh3::xxh3_64;

/// A single verified byte-span replacement.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "a Splice does nothing until passed to splice_all()"]
pub struct Splice {
    /// Starting byte offset (inclusive)
    pub byte_start: usize,
    /// Ending byte offset (exclusive)
    pub byte_end: usize,
    /// Text written in place of the span
    pub new_text: String,
    /// What the span must contain before the splice is applied
    pub expected: Expected,
}

/// Verification strategy for the text a splice removes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expected {
    /// Exact text match required
    Exact(String),
    /// xxh3 hash of the expected text (used for large spans)
    Hash(u64),
}

impl Expected {
    /// Build a verification for `text`, hashing anything over 1KB.
    pub fn from_text(text: &str) -> Self {
        if text.len() > 1024 {
            Expected::Hash(xxh3_64(text.as_bytes()))
        } else {
            Expected::Exact(text.to_string())
        }
    }

    pub fn matches(&self, text: &str) -> bool {
        match self {
            Expected::Exact(expected) => text == expected,
            Expected::Hash(hash) => xxh3_64(text.as_bytes()) == *hash,
        }
    }
}

#[derive(Error, Debug)]
pub enum EditError {
    #[error("span [{byte_start}, {byte_end}) does not contain the expected text (found {found:?})")]
    ExpectedTextMismatch {
        byte_start: usize,
        byte_end: usize,
        found: String,
    },

    #[error("invalid byte range: [{byte_start}, {byte_end}) in text of length {text_len}")]
    InvalidByteRange {
        byte_start: usize,
        byte_end: usize,
        text_len: usize,
    },

    #[error("splices overlap or are out of order at byte {byte_start}")]
    Overlapping { byte_start: usize },

    #[error("byte offset {offset} is not on a UTF-8 character boundary")]
    NotCharBoundary { offset: usize },
}

impl Splice {
    pub fn new(
        byte_start: usize,
        byte_end: usize,
        new_text: impl Into<String>,
        expected: &str,
    ) -> Self {
        Self {
            byte_start,
            byte_end,
            new_text: new_text.into(),
            expected: Expected::from_text(expected),
        }
    }

    /// Check the splice against `text` and return the span it would remove.
    fn verify<'a>(&self, text: &'a str) -> Result<&'a str, EditError> {
        if self.byte_start > self.byte_end || self.byte_end > text.len() {
            return Err(EditError::InvalidByteRange {
                byte_start: self.byte_start,
                byte_end: self.byte_end,
                text_len: text.len(),
            });
        }
        for offset in [self.byte_start, self.byte_end] {
            if !text.is_char_boundary(offset) {
                return Err(EditError::NotCharBoundary { offset });
            }
        }

        let current = &text[self.byte_start..self.byte_end];
        if !self.expected.matches(current) {
            return Err(EditError::ExpectedTextMismatch {
                byte_start: self.byte_start,
                byte_end: self.byte_end,
                found: current.to_string(),
            });
        }
        Ok(current)
    }
}

/// Apply splices to `text` in one pass.
///
/// Splices must be sorted by `byte_start` ascending and must not overlap.
/// Every splice is verified before any output is produced, so either all of
/// them apply or none do.
pub fn splice_all(text: &str, splices: &[Splice]) -> Result<String, EditError> {
    for splice in splices {
        splice.verify(text)?;
    }
    for window in splices.windows(2) {
        if window[1].byte_start < window[0].byte_end {
            return Err(EditError::Overlapping {
                byte_start: window[1].byte_start,
            });
        }
    }

    let removed: usize = splices.iter().map(|s| s.byte_end - s.byte_start).sum();
    let added: usize = splices.iter().map(|s| s.new_text.len()).sum();
    let mut out = String::with_capacity(text.len() - removed + added);

    let mut cursor = 0;
    for splice in splices {
        out.push_str(&text[cursor..splice.byte_start]);
        out.push_str(&splice.new_text);
        cursor = splice.byte_end;
    }
    out.push_str(&text[cursor..]);
    Ok(out)
}

/// Atomic file write: tempfile + fsync + rename.
///
/// Either the full content lands at `path` or the previous file is left
/// untouched. The parent directory must already exist.
pub fn atomic_write(path: &Path, content: &[u8]) -> io::Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut temp = tempfile::NamedTempFile::new_in(parent)?;
    temp.write_all(content)?;
    temp.as_file().sync_all()?;

    // Keep the permissions of the file being replaced.
    if let Ok(metadata) = fs::metadata(path) {
        temp.as_file().set_permissions(metadata.permissions())?;
    }

    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expected_exact_match() {
        let expected = Expected::Exact("hello world".to_string());
        assert!(expected.matches("hello world"));
        assert!(!expected.matches("hello"));
    }

    #[test]
    fn test_expected_hash() {
        let expected = Expected::Hash(xxh3_64(b"hello world"));
        assert!(expected.matches("hello world"));
        assert!(!expected.matches("goodbye world"));
    }

    #[test]
    fn test_expected_from_text_large_uses_hash() {
        let text = "x".repeat(2000);
        assert!(matches!(Expected::from_text(&text), Expected::Hash(_)));
        assert!(matches!(Expected::from_text("small"), Expected::Exact(_)));
    }

    #[test]
    fn test_splice_invalid_range() {
        let splice = Splice::new(5, 20, "replacement", "");
        let result = splice_all("hello world", &[splice]);
        assert!(matches!(result, Err(EditError::InvalidByteRange { .. })));
    }

    #[test]
    fn test_splice_inverted_range() {
        let splice = Splice::new(10, 5, "replacement", "");
        let result = splice_all("hello world", &[splice]);
        assert!(matches!(result, Err(EditError::InvalidByteRange { .. })));
    }

    #[test]
    fn test_splice_mismatch_leaves_nothing_applied() {
        let good = Splice::new(0, 5, "HELLO", "hello");
        let bad = Splice::new(6, 11, "WORLD", "earth");
        let result = splice_all("hello world", &[good, bad]);
        assert!(matches!(
            result,
            Err(EditError::ExpectedTextMismatch { byte_start: 6, .. })
        ));
    }

    #[test]
    fn test_splice_rejects_char_boundary() {
        let splice = Splice::new(1, 2, "x", "\u{FFFD}");
        let result = splice_all("é", &[splice]);
        assert!(matches!(result, Err(EditError::NotCharBoundary { .. })));
    }

    #[test]
    fn test_splice_multiple_spans() {
        let text = "line1\nline2\nline3\n";
        let splices = vec![
            Splice::new(0, 5, "LINE1", "line1"),
            Splice::new(6, 11, "L2", "line2"),
            Splice::new(12, 17, "LINE_THREE", "line3"),
        ];
        let out = splice_all(text, &splices).unwrap();
        assert_eq!(out, "LINE1\nL2\nLINE_THREE\n");
    }

    #[test]
    fn test_splice_overlapping_rejected() {
        let splices = vec![
            Splice::new(0, 5, "a", "hello"),
            Splice::new(3, 7, "b", "lo w"),
        ];
        let result = splice_all("hello world", &splices);
        assert!(matches!(result, Err(EditError::Overlapping { byte_start: 3 })));
    }

    #[test]
    fn test_atomic_write_integration() {
        let temp_dir = tempfile::tempdir().unwrap();
        let file_path = temp_dir.path().join("test.txt");
        fs::write(&file_path, b"original content").unwrap();

        atomic_write(&file_path, b"modified content").unwrap();

        let content = fs::read_to_string(&file_path).unwrap();
        assert_eq!(content, "modified content");
    }
}
