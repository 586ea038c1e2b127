//! Near-miss suggestions for BEFORE blocks that did not match.

use strsim::normalized_levenshtein;

/// Minimum similarity for a snippet to be suggested.
pub const SIMILARITY_CUTOFF: f64 = 0.6;

/// Files or blocks larger than this are not scanned for hints.
const MAX_SCAN_LINES: usize = 20_000;
const MAX_PATTERN_BYTES: usize = 4_096;

#[derive(Debug, Clone, PartialEq)]
pub struct Hint {
    /// 1-based line where the snippet starts
    pub line: usize,
    pub text: String,
    pub similarity: f64,
}

/// Up to `limit` windows of `text` that resemble `before`, best first.
///
/// Each window spans as many lines as `before` does. Lines are compared with
/// surrounding whitespace stripped so indentation drift still scores high.
pub fn similar_snippets(text: &str, before: &str, limit: usize) -> Vec<Hint> {
    let wanted: Vec<&str> = before.lines().map(str::trim).collect();
    if wanted.is_empty() || before.len() > MAX_PATTERN_BYTES {
        return Vec::new();
    }
    let lines: Vec<&str> = text.lines().collect();
    if lines.len() < wanted.len() || lines.len() > MAX_SCAN_LINES {
        return Vec::new();
    }

    let needle = wanted.join("\n");
    let mut hints: Vec<Hint> = lines
        .windows(wanted.len())
        .enumerate()
        .filter_map(|(idx, window)| {
            let candidate = window.iter().map(|l| l.trim()).collect::<Vec<_>>().join("\n");
            let similarity = normalized_levenshtein(&needle, &candidate);
            (similarity >= SIMILARITY_CUTOFF).then(|| Hint {
                line: idx + 1,
                text: window.join("\n"),
                similarity,
            })
        })
        .collect();

    hints.sort_by(|a, b| b.similarity.total_cmp(&a.similarity).then(a.line.cmp(&b.line)));
    hints.truncate(limit);
    hints
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finds_close_line() {
        let text = "fn main() {\n    let count = 1;\n}\n";
        let hints = similar_snippets(text, "let cont = 1;", 3);
        assert_eq!(hints.first().map(|h| h.line), Some(2));
        assert!(hints[0].similarity >= SIMILARITY_CUTOFF);
    }

    #[test]
    fn test_nothing_similar() {
        let hints = similar_snippets("alpha\nbeta\n", "completely different text", 3);
        assert!(hints.is_empty());
    }

    #[test]
    fn test_respects_limit_and_order() {
        let text = "value = 1\nvalue = 2\nvalue = 3\nvalue = 4\n";
        let hints = similar_snippets(text, "value = 9", 2);
        assert_eq!(hints.len(), 2);
        assert!(hints[0].similarity >= hints[1].similarity);
    }
}
