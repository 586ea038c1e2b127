//! Trailing-whitespace-insensitive views of a text.
//!
//! A [`NormalizedView`] strips trailing whitespace from every line while
//! remembering where each normalized byte came from, so a match found in the
//! normalized text can be mapped back onto the exact original span.

/// Strip trailing whitespace from every line, keeping the line breaks.
pub fn trim_line_ends(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut lines = text.split('\n').peekable();
    while let Some(line) = lines.next() {
        out.push_str(line.trim_end());
        if lines.peek().is_some() {
            out.push('\n');
        }
    }
    out
}

#[derive(Debug, Clone, Copy)]
struct LineMap {
    /// Offset of the line in the normalized text
    norm_start: usize,
    /// Offset of the line in the original text
    orig_start: usize,
    /// Bytes kept after trimming
    kept: usize,
    /// Bytes of the original line, excluding its '\n'
    orig_len: usize,
    has_newline: bool,
}

#[derive(Debug, Clone)]
pub struct NormalizedView {
    text: String,
    lines: Vec<LineMap>,
}

impl NormalizedView {
    pub fn new(original: &str) -> Self {
        let mut text = String::with_capacity(original.len());
        let mut lines = Vec::new();
        let mut orig_start = 0;

        let mut segments = original.split('\n').peekable();
        while let Some(segment) = segments.next() {
            let has_newline = segments.peek().is_some();
            let kept = segment.trim_end().len();

            lines.push(LineMap {
                norm_start: text.len(),
                orig_start,
                kept,
                orig_len: segment.len(),
                has_newline,
            });

            text.push_str(&segment[..kept]);
            if has_newline {
                text.push('\n');
            }
            orig_start += segment.len() + usize::from(has_newline);
        }

        Self { text, lines }
    }

    /// The normalized text to search in.
    pub fn text(&self) -> &str {
        &self.text
    }

    fn line_at(&self, offset: usize) -> &LineMap {
        let idx = self
            .lines
            .partition_point(|line| line.norm_start <= offset)
            .saturating_sub(1);
        &self.lines[idx]
    }

    /// Map the start of a normalized span onto the original text.
    ///
    /// A span starting at a line break starts at the original line break,
    /// after that line's trailing whitespace.
    pub fn original_start(&self, offset: usize) -> usize {
        let line = self.line_at(offset);
        let within = offset - line.norm_start;
        if within < line.kept {
            line.orig_start + within
        } else if line.has_newline {
            line.orig_start + line.orig_len
        } else {
            line.orig_start + line.kept
        }
    }

    /// Map the (exclusive) end of a normalized span onto the original text.
    ///
    /// A span ending at the end of a line's content stops before that line's
    /// trailing whitespace.
    pub fn original_end(&self, offset: usize) -> usize {
        let line = self.line_at(offset);
        let within = offset - line.norm_start;
        line.orig_start + within.min(line.kept)
    }
}
