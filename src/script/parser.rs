//! Line-oriented state machine turning script text into a [`Script`].
//!
//! The parser never stops at the first problem: it records a [`ParseError`],
//! resynchronizes on the next line, and reports every error at the end.

use crate::replace::{check_rule, ReplacementRule};
use crate::script::errors::{ParseError, ParseErrors};
use crate::script::operation::{Directive, Operation, Script};
use crate::script::params::{
    expect_none, parse_param_list, FindParams, Param, ParamError, ReplaceParams, RunParams,
    TreeParams,
};
use std::path::PathBuf;
use tracing::debug;

/// Token that introduces every directive line.
pub const TAG: &str = "@Kif";

/// Parse a whole script.
pub fn parse(text: &str) -> Result<Script, ParseErrors> {
    let mut parser = Parser::new();
    for (idx, line) in text.split_inclusive('\n').enumerate() {
        parser.feed_line(idx + 1, line);
    }
    parser.finish()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    TopLevel,
    InCreate,
    InOverwrite,
    InSearchReplace,
    InBefore,
    InAfter,
}

/// A CREATE / OVERWRITE_FILE block being collected.
#[derive(Debug)]
struct PendingFile {
    line: usize,
    /// `None` once an error has been recorded for the block
    path: Option<PathBuf>,
}

/// A SEARCH_AND_REPLACE block being collected.
#[derive(Debug)]
struct PendingReplace {
    line: usize,
    path: Option<PathBuf>,
    params: ReplaceParams,
    rules: Vec<ReplacementRule>,
    /// BEFORE text waiting for its AFTER, and the line it started on
    before: Option<(usize, String)>,
    failed: bool,
}

/// A directive line split into its parts.
#[derive(Debug)]
struct DirectiveLine<'a> {
    name: &'a str,
    /// Text inside a `(...)` directly after the name
    params: Option<&'a str>,
    /// Everything after the name and parameters, trimmed
    rest: &'a str,
}

pub struct Parser {
    state: State,
    scoped_path: Option<PathBuf>,
    directives: Vec<Directive>,
    errors: Vec<ParseError>,
    file: Option<PendingFile>,
    replace: Option<PendingReplace>,
    body: String,
    body_line: usize,
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser {
    pub fn new() -> Self {
        Self {
            state: State::TopLevel,
            scoped_path: None,
            directives: Vec::new(),
            errors: Vec::new(),
            file: None,
            replace: None,
            body: String::new(),
            body_line: 0,
        }
    }

    /// Feed one line, including its line terminator if it had one.
    pub fn feed_line(&mut self, line_no: usize, raw: &str) {
        match self.state {
            State::TopLevel => self.top_level(line_no, raw),
            State::InCreate => self.collect_body(line_no, raw, "END_CREATE"),
            State::InOverwrite => self.collect_body(line_no, raw, "END_OVERWRITE_FILE"),
            State::InBefore => self.collect_body(line_no, raw, "END_BEFORE"),
            State::InAfter => self.collect_body(line_no, raw, "END_AFTER"),
            State::InSearchReplace => self.in_search_replace(line_no, raw),
        }
    }

    /// Close the parse, reporting any block left open.
    pub fn finish(mut self) -> Result<Script, ParseErrors> {
        let unterminated = match self.state {
            State::TopLevel => None,
            State::InCreate => Some(("CREATE", "END_CREATE", self.file.as_ref().map(|f| f.line))),
            State::InOverwrite => Some((
                "OVERWRITE_FILE",
                "END_OVERWRITE_FILE",
                self.file.as_ref().map(|f| f.line),
            )),
            State::InSearchReplace => Some((
                "SEARCH_AND_REPLACE",
                "END_SEARCH_AND_REPLACE",
                self.replace.as_ref().map(|r| r.line),
            )),
            State::InBefore => Some(("BEFORE", "END_BEFORE", Some(self.body_line))),
            State::InAfter => Some(("AFTER", "END_AFTER", Some(self.body_line))),
        };
        if let Some((block, end, line)) = unterminated {
            self.error(
                line.unwrap_or(self.body_line),
                format!("unterminated {block} block (expected {TAG} {end})"),
            );
        }
        // An open BEFORE/AFTER also leaves its SEARCH_AND_REPLACE open.
        if matches!(self.state, State::InBefore | State::InAfter) {
            if let Some(replace) = &self.replace {
                let line = replace.line;
                self.error(
                    line,
                    format!("unterminated SEARCH_AND_REPLACE block (expected {TAG} END_SEARCH_AND_REPLACE)"),
                );
            }
        }

        if self.errors.is_empty() {
            Ok(Script {
                directives: self.directives,
            })
        } else {
            self.errors.sort_by_key(|e| e.line);
            Err(ParseErrors {
                errors: self.errors,
            })
        }
    }

    fn error(&mut self, line: usize, reason: impl Into<String>) {
        self.errors.push(ParseError::new(line, reason));
    }

    fn push(&mut self, line: usize, operation: Operation) {
        debug!(line, kind = %operation.kind(), "parsed directive");
        self.directives.push(Directive { line, operation });
    }

    fn top_level(&mut self, line_no: usize, raw: &str) {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            return;
        }

        let directive = match split_directive(line) {
            Some(Ok(directive)) => directive,
            Some(Err(reason)) => return self.error(line_no, reason),
            None => {
                return self.error(
                    line_no,
                    format!("expected a {TAG} directive, found '{}'", abbreviate(line)),
                )
            }
        };

        match directive.name {
            "FILE" => self.file_directive(line_no, &directive),
            "CREATE" => self.open_file_block(line_no, &directive, State::InCreate),
            "OVERWRITE_FILE" => self.open_file_block(line_no, &directive, State::InOverwrite),
            "DELETE" => self.delete(line_no, &directive),
            "MOVE" => self.move_directive(line_no, &directive),
            "SEARCH_AND_REPLACE" => self.open_search_replace(line_no, &directive),
            "READ" => self.read(line_no, &directive),
            "TREE" => self.tree(line_no, &directive),
            "FIND" => self.find(line_no, &directive),
            "RUN" => self.run(line_no, &directive),
            name @ ("BEFORE" | "AFTER" | "END_BEFORE" | "END_AFTER" | "END_SEARCH_AND_REPLACE") => {
                self.error(line_no, format!("{name} outside of a SEARCH_AND_REPLACE block"))
            }
            name @ ("END_CREATE" | "END_OVERWRITE_FILE") => {
                self.error(line_no, format!("{name} without a matching opening directive"))
            }
            other => self.error(line_no, format!("unknown directive '{other}'")),
        }
    }

    /// Parse the parameter list of `directive`, recording any error.
    fn params(&mut self, line_no: usize, directive: &DirectiveLine<'_>) -> Option<Vec<Param>> {
        match directive.params.map(parse_param_list).transpose() {
            Ok(params) => Some(params.unwrap_or_default()),
            Err(err) => {
                self.error(line_no, format!("{}: {err}", directive.name));
                None
            }
        }
    }

    fn typed<T>(
        &mut self,
        line_no: usize,
        directive: &DirectiveLine<'_>,
        build: impl FnOnce(&[Param]) -> Result<T, ParamError>,
    ) -> Option<T> {
        let params = self.params(line_no, directive)?;
        match build(&params) {
            Ok(value) => Some(value),
            Err(err) => {
                self.error(line_no, err.to_string());
                None
            }
        }
    }

    fn no_params(&mut self, line_no: usize, directive: &DirectiveLine<'_>) -> bool {
        let name = directive.name;
        self.typed(line_no, directive, |params| expect_none(name, params))
            .is_some()
    }

    /// Inline path if given, else the scoped `FILE` path.
    fn scoped_target(&mut self, line_no: usize, directive: &DirectiveLine<'_>) -> Option<PathBuf> {
        if !directive.rest.is_empty() {
            return Some(PathBuf::from(unquote(directive.rest)));
        }
        match &self.scoped_path {
            Some(path) => Some(path.clone()),
            None => {
                self.error(
                    line_no,
                    format!("{} has no path and no FILE directive is in scope", directive.name),
                );
                None
            }
        }
    }

    fn required_path(&mut self, line_no: usize, directive: &DirectiveLine<'_>) -> Option<PathBuf> {
        if directive.rest.is_empty() {
            self.error(line_no, format!("{} requires a path", directive.name));
            return None;
        }
        Some(PathBuf::from(unquote(directive.rest)))
    }

    fn file_directive(&mut self, line_no: usize, directive: &DirectiveLine<'_>) {
        if !self.no_params(line_no, directive) {
            return;
        }
        if let Some(path) = self.required_path(line_no, directive) {
            self.scoped_path = Some(path);
        }
    }

    fn open_file_block(&mut self, line_no: usize, directive: &DirectiveLine<'_>, state: State) {
        let params_ok = self.no_params(line_no, directive);
        let path = self.scoped_target(line_no, directive);
        // Collect the body even after an error so the next directive is found.
        self.file = Some(PendingFile {
            line: line_no,
            path: path.filter(|_| params_ok),
        });
        self.begin_body(line_no, state);
    }

    fn delete(&mut self, line_no: usize, directive: &DirectiveLine<'_>) {
        let params_ok = self.no_params(line_no, directive);
        if let Some(path) = self.scoped_target(line_no, directive) {
            if params_ok {
                self.push(line_no, Operation::Delete { path });
            }
        }
    }

    fn move_directive(&mut self, line_no: usize, directive: &DirectiveLine<'_>) {
        if !self.no_params(line_no, directive) {
            return;
        }
        let args = match split_args(directive.rest) {
            Ok(args) => args,
            Err(reason) => return self.error(line_no, format!("MOVE: {reason}")),
        };

        let (src, dst) = match args.as_slice() {
            [src, dst] => (PathBuf::from(src), PathBuf::from(dst)),
            [dst] => match &self.scoped_path {
                Some(src) => (src.clone(), PathBuf::from(dst)),
                None => {
                    return self.error(
                        line_no,
                        "MOVE with a single path needs a FILE directive in scope",
                    )
                }
            },
            [] => return self.error(line_no, "MOVE requires source and destination paths"),
            _ => {
                return self.error(
                    line_no,
                    "MOVE takes at most two paths (quote paths containing spaces)",
                )
            }
        };
        self.push(line_no, Operation::Move { src, dst });
    }

    fn open_search_replace(&mut self, line_no: usize, directive: &DirectiveLine<'_>) {
        let params = self.typed(line_no, directive, ReplaceParams::from_params);
        let path = self.scoped_target(line_no, directive);
        let failed = params.is_none() || path.is_none();
        self.replace = Some(PendingReplace {
            line: line_no,
            path,
            params: params.unwrap_or_default(),
            rules: Vec::new(),
            before: None,
            failed,
        });
        self.state = State::InSearchReplace;
    }

    fn read(&mut self, line_no: usize, directive: &DirectiveLine<'_>) {
        let params_ok = self.no_params(line_no, directive);
        if let Some(path) = self.required_path(line_no, directive) {
            if params_ok {
                self.push(line_no, Operation::Read { path });
            }
        }
    }

    fn tree(&mut self, line_no: usize, directive: &DirectiveLine<'_>) {
        // `TREE <path>(depth=2)` puts the parameters after the path.
        let (path_text, trailing) = split_trailing_params(directive.rest);
        let merged = DirectiveLine {
            name: directive.name,
            params: directive.params.or(trailing),
            rest: path_text,
        };
        if directive.params.is_some() && trailing.is_some() {
            return self.error(line_no, "TREE parameters given twice");
        }

        let params = self.typed(line_no, &merged, TreeParams::from_params);
        let path = self.required_path(line_no, &merged);
        if let (Some(params), Some(path)) = (params, path) {
            self.push(line_no, Operation::Tree { path, params });
        }
    }

    fn find(&mut self, line_no: usize, directive: &DirectiveLine<'_>) {
        let params = self.typed(line_no, directive, FindParams::from_params);
        let path = self.required_path(line_no, directive);
        if let (Some(params), Some(path)) = (params, path) {
            self.push(line_no, Operation::Find { path, params });
        }
    }

    fn run(&mut self, line_no: usize, directive: &DirectiveLine<'_>) {
        let params = self.typed(line_no, directive, RunParams::from_params);
        if directive.rest.is_empty() {
            return self.error(line_no, "RUN requires a command");
        }
        if let Some(params) = params {
            self.push(
                line_no,
                Operation::Run {
                    command: directive.rest.to_string(),
                    cwd: params.cwd,
                    timeout: params.timeout,
                    shell: params.shell,
                },
            );
        }
    }

    fn begin_body(&mut self, line_no: usize, state: State) {
        self.body.clear();
        self.body_line = line_no;
        self.state = state;
    }

    fn collect_body(&mut self, line_no: usize, raw: &str, end: &str) {
        let trimmed = raw.trim();
        if let Some(Ok(directive)) = split_directive(trimmed) {
            if directive.name == end {
                if directive.params.is_some() || !directive.rest.is_empty() {
                    self.error(line_no, format!("unexpected text after {end}"));
                }
                return self.close_body(line_no);
            }
        }
        self.body.push_str(raw);
    }

    fn close_body(&mut self, line_no: usize) {
        let body = std::mem::take(&mut self.body);
        match self.state {
            State::InCreate | State::InOverwrite => {
                let create = self.state == State::InCreate;
                self.state = State::TopLevel;
                let Some(PendingFile { line, path }) = self.file.take() else {
                    return;
                };
                let Some(path) = path else {
                    return;
                };
                let operation = if create {
                    Operation::Create {
                        path,
                        content: body,
                    }
                } else {
                    Operation::Overwrite {
                        path,
                        content: body,
                    }
                };
                self.push(line, operation);
            }
            State::InBefore => {
                self.state = State::InSearchReplace;
                let before = strip_one_newline(body);
                let start = self.body_line;
                if before.is_empty() {
                    self.error(start, "empty BEFORE block");
                    self.fail_replace();
                }
                if let Some(replace) = self.replace.as_mut() {
                    replace.before = Some((start, before));
                }
            }
            State::InAfter => {
                self.state = State::InSearchReplace;
                let after = strip_one_newline(body);
                let Some(replace) = self.replace.as_mut() else {
                    return;
                };
                let Some((before_line, before)) = replace.before.take() else {
                    // AFTER without BEFORE was already reported.
                    return;
                };
                let rule = replace.params.rule(before, after);
                let index = replace.rules.len() + 1;
                if let Err(err) = check_rule(&rule, index) {
                    if !rule.before.is_empty() {
                        self.error(before_line, err.to_string());
                    }
                    self.fail_replace();
                }
                if let Some(replace) = self.replace.as_mut() {
                    replace.rules.push(rule);
                }
            }
            State::TopLevel | State::InSearchReplace => {
                debug!(line_no, "body closed outside of a body state");
            }
        }
    }

    fn fail_replace(&mut self) {
        if let Some(replace) = self.replace.as_mut() {
            replace.failed = true;
        }
    }

    fn in_search_replace(&mut self, line_no: usize, raw: &str) {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            return;
        }

        let directive = match split_directive(line) {
            Some(Ok(directive)) => directive,
            Some(Err(reason)) => return self.error(line_no, reason),
            None => {
                return self.error(
                    line_no,
                    format!(
                        "expected BEFORE, AFTER or END_SEARCH_AND_REPLACE, found '{}'",
                        abbreviate(line)
                    ),
                )
            }
        };
        if directive.params.is_some() || !directive.rest.is_empty() {
            self.error(line_no, format!("unexpected text after {}", directive.name));
        }

        match directive.name {
            "BEFORE" => {
                let dangling = self
                    .replace
                    .as_mut()
                    .and_then(|replace| replace.before.take());
                if let Some((before_line, _)) = dangling {
                    self.error(before_line, "BEFORE block without a following AFTER");
                    self.fail_replace();
                }
                self.begin_body(line_no, State::InBefore);
            }
            "AFTER" => {
                let has_before = self
                    .replace
                    .as_ref()
                    .is_some_and(|replace| replace.before.is_some());
                if !has_before {
                    self.error(line_no, "AFTER without a preceding BEFORE");
                    self.fail_replace();
                }
                self.begin_body(line_no, State::InAfter);
            }
            "END_SEARCH_AND_REPLACE" => self.close_search_replace(line_no),
            other => {
                self.error(
                    line_no,
                    format!("unexpected {other} inside SEARCH_AND_REPLACE (missing END_SEARCH_AND_REPLACE?)"),
                );
                self.fail_replace();
            }
        }
    }

    fn close_search_replace(&mut self, line_no: usize) {
        self.state = State::TopLevel;
        let Some(replace) = self.replace.take() else {
            return;
        };

        let mut failed = replace.failed;
        if let Some((before_line, _)) = replace.before {
            self.error(before_line, "BEFORE block without a following AFTER");
            failed = true;
        }
        if replace.rules.is_empty() && !failed {
            self.error(
                replace.line,
                format!("SEARCH_AND_REPLACE ending on line {line_no} contains no BEFORE/AFTER pairs"),
            );
            failed = true;
        }

        if let (false, Some(path)) = (failed, replace.path) {
            self.push(
                replace.line,
                Operation::SearchReplace {
                    path,
                    rules: replace.rules,
                },
            );
        }
    }
}

/// Split a trimmed line into a directive, if it starts with the tag.
///
/// Returns `None` for lines that are not directives at all and `Some(Err)`
/// for tagged lines that are malformed.
fn split_directive(line: &str) -> Option<Result<DirectiveLine<'_>, String>> {
    let after_tag = line.strip_prefix(TAG)?;
    if !after_tag.is_empty() && !after_tag.starts_with(char::is_whitespace) {
        return None;
    }
    let after_tag = after_tag.trim_start();

    let name_len = after_tag
        .find(|c: char| !(c.is_ascii_uppercase() || c == '_'))
        .unwrap_or(after_tag.len());
    let (name, mut rest) = after_tag.split_at(name_len);
    if name.is_empty() {
        return Some(Err(format!("expected directive name after {TAG}")));
    }

    let mut params = None;
    if rest.starts_with('(') {
        match find_closing_paren(rest) {
            Some(close) => {
                params = Some(&rest[1..close]);
                rest = &rest[close + 1..];
            }
            None => return Some(Err(format!("{name}: unclosed parameter list"))),
        }
    } else if !rest.is_empty() && !rest.starts_with(char::is_whitespace) {
        return Some(Err(format!("unknown directive '{name}{}'", abbreviate(rest))));
    }

    Some(Ok(DirectiveLine {
        name,
        params,
        rest: rest.trim(),
    }))
}

/// Byte index of the `)` closing the `(` at the start of `text`.
fn find_closing_paren(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for (idx, c) in text.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => quote = Some(c),
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(idx);
                }
            }
            _ => {}
        }
    }
    None
}

/// Split `path(params)` into the path and the parameter text, when the
/// trailing group looks like a parameter list.
fn split_trailing_params(rest: &str) -> (&str, Option<&str>) {
    let Some(body) = rest.strip_suffix(')') else {
        return (rest, None);
    };
    let Some(open) = body.rfind('(') else {
        return (rest, None);
    };
    let inner = &body[open + 1..];
    if !inner.contains('=') {
        return (rest, None);
    }
    (body[..open].trim_end(), Some(inner))
}

/// Whitespace-separated arguments, honoring double quotes.
fn split_args(text: &str) -> Result<Vec<String>, String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut has_token = false;

    for c in text.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                has_token = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                if has_token {
                    args.push(std::mem::take(&mut current));
                    has_token = false;
                }
            }
            c => {
                current.push(c);
                has_token = true;
            }
        }
    }
    if in_quotes {
        return Err("unterminated quoted path".to_string());
    }
    if has_token {
        args.push(current);
    }
    Ok(args)
}

fn unquote(text: &str) -> &str {
    text.strip_prefix('"')
        .and_then(|t| t.strip_suffix('"'))
        .unwrap_or(text)
}

/// Drop exactly one trailing line break.
fn strip_one_newline(mut text: String) -> String {
    if text.ends_with('\n') {
        text.pop();
        if text.ends_with('\r') {
            text.pop();
        }
    }
    text
}

fn abbreviate(text: &str) -> String {
    const LIMIT: usize = 40;
    match text.char_indices().nth(LIMIT) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::operation::OperationKind;
    use std::time::Duration;

    fn ops(text: &str) -> Vec<Operation> {
        parse(text)
            .unwrap()
            .directives
            .into_iter()
            .map(|d| d.operation)
            .collect()
    }

    fn errors(text: &str) -> Vec<ParseError> {
        parse(text).unwrap_err().errors
    }

    #[test]
    fn test_create_body_is_verbatim() {
        let script = "@Kif CREATE src/new.txt\nhello\n  indented\n\n@Kif END_CREATE\n";
        assert_eq!(
            ops(script),
            vec![Operation::Create {
                path: PathBuf::from("src/new.txt"),
                content: "hello\n  indented\n\n".to_string(),
            }]
        );
    }

    #[test]
    fn test_body_does_not_interpret_directives() {
        let script = "@Kif OVERWRITE_FILE a.txt\n@Kif DELETE b.txt\n# not a comment\n@Kif END_OVERWRITE_FILE\n";
        assert_eq!(
            ops(script),
            vec![Operation::Overwrite {
                path: PathBuf::from("a.txt"),
                content: "@Kif DELETE b.txt\n# not a comment\n".to_string(),
            }]
        );
    }

    #[test]
    fn test_file_scope_applies_to_following_directives() {
        let script = "\
@Kif FILE src/lib.rs
@Kif SEARCH_AND_REPLACE
@Kif BEFORE
var x = 1;
@Kif END_BEFORE
@Kif AFTER
let x = 1;
@Kif END_AFTER
@Kif END_SEARCH_AND_REPLACE
@Kif DELETE
";
        let parsed = ops(script);
        assert_eq!(parsed.len(), 2);
        assert_eq!(
            parsed[0],
            Operation::SearchReplace {
                path: PathBuf::from("src/lib.rs"),
                rules: vec![ReplacementRule::literal("var x = 1;", "let x = 1;")],
            }
        );
        assert_eq!(
            parsed[1],
            Operation::Delete {
                path: PathBuf::from("src/lib.rs")
            }
        );
    }

    #[test]
    fn test_missing_scope_is_error() {
        let errs = errors("@Kif DELETE\n");
        assert_eq!(errs.len(), 1);
        assert_eq!(errs[0].line, 1);
        assert!(errs[0].reason.contains("no FILE directive"));
    }

    #[test]
    fn test_multiple_pairs_in_order_with_params() {
        let script = "\
@Kif FILE a.txt
@Kif SEARCH_AND_REPLACE(replace_all=true, regex=true)
@Kif BEFORE
a+
@Kif END_BEFORE
@Kif AFTER
b
@Kif END_AFTER

# second pair
@Kif BEFORE
c
@Kif END_BEFORE
@Kif AFTER
d

@Kif END_AFTER
@Kif END_SEARCH_AND_REPLACE
";
        let parsed = ops(script);
        let Operation::SearchReplace { rules, .. } = &parsed[0] else {
            panic!("expected SearchReplace");
        };
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].before, "a+");
        assert!(rules[0].regex && rules[0].replace_all);
        assert_eq!(rules[1].before, "c");
        // Only one trailing newline is removed.
        assert_eq!(rules[1].after, "d\n");
    }

    #[test]
    fn test_unterminated_block() {
        let errs = errors("@Kif CREATE a.txt\nbody\n");
        assert_eq!(errs.len(), 1);
        assert!(errs[0].reason.contains("unterminated CREATE"));

        let errs = errors("@Kif FILE a\n@Kif SEARCH_AND_REPLACE\n@Kif BEFORE\nx\n");
        assert!(errs.iter().any(|e| e.reason.contains("unterminated BEFORE")));
        assert!(errs
            .iter()
            .any(|e| e.reason.contains("unterminated SEARCH_AND_REPLACE")));
    }

    #[test]
    fn test_reports_every_error() {
        let script = "\
@Kif DELETE
@Kif FROB x
@Kif SEARCH_AND_REPLACE(colour=red) a.txt
@Kif BEFORE
x
@Kif END_BEFORE
@Kif AFTER
y
@Kif END_AFTER
@Kif END_SEARCH_AND_REPLACE
@Kif READ
";
        let errs = errors(script);
        let lines: Vec<usize> = errs.iter().map(|e| e.line).collect();
        assert_eq!(lines, vec![1, 2, 3, 11]);
    }

    #[test]
    fn test_empty_before_is_error() {
        let script = "\
@Kif FILE a
@Kif SEARCH_AND_REPLACE
@Kif BEFORE
@Kif END_BEFORE
@Kif AFTER
x
@Kif END_AFTER
@Kif END_SEARCH_AND_REPLACE
";
        let errs = errors(script);
        assert_eq!(errs.len(), 1);
        assert_eq!(errs[0].line, 3);
        assert!(errs[0].reason.contains("empty BEFORE"));
    }

    #[test]
    fn test_invalid_regex_before_is_error() {
        let script = "\
@Kif FILE a
@Kif SEARCH_AND_REPLACE(regex=true)
@Kif BEFORE
(unclosed
@Kif END_BEFORE
@Kif AFTER
x
@Kif END_AFTER
@Kif END_SEARCH_AND_REPLACE
";
        let errs = errors(script);
        assert_eq!(errs.len(), 1);
        assert!(errs[0].reason.contains("invalid pattern"));
    }

    #[test]
    fn test_pairing_errors() {
        let script = "\
@Kif FILE a
@Kif SEARCH_AND_REPLACE
@Kif AFTER
x
@Kif END_AFTER
@Kif END_SEARCH_AND_REPLACE
";
        let errs = errors(script);
        assert!(errs[0].reason.contains("AFTER without a preceding BEFORE"));

        let errs = errors("@Kif FILE a\n@Kif SEARCH_AND_REPLACE\n@Kif END_SEARCH_AND_REPLACE\n");
        assert!(errs[0].reason.contains("no BEFORE/AFTER pairs"));
    }

    #[test]
    fn test_stray_text_is_error() {
        let errs = errors("just some prose\n");
        assert!(errs[0].reason.contains("expected a @Kif directive"));
    }

    #[test]
    fn test_comments_and_blank_lines_ignored() {
        let parsed = ops("# heading\n\n   # indented comment\n@Kif READ notes.md\n");
        assert_eq!(
            parsed,
            vec![Operation::Read {
                path: PathBuf::from("notes.md")
            }]
        );
    }

    #[test]
    fn test_move_forms() {
        let parsed = ops("@Kif MOVE a.txt b/a.txt\n@Kif FILE c.txt\n@Kif MOVE d.txt\n@Kif MOVE \"e f.txt\" \"g h.txt\"\n");
        assert_eq!(
            parsed,
            vec![
                Operation::Move {
                    src: PathBuf::from("a.txt"),
                    dst: PathBuf::from("b/a.txt")
                },
                Operation::Move {
                    src: PathBuf::from("c.txt"),
                    dst: PathBuf::from("d.txt")
                },
                Operation::Move {
                    src: PathBuf::from("e f.txt"),
                    dst: PathBuf::from("g h.txt")
                },
            ]
        );

        let errs = errors("@Kif MOVE a b c\n");
        assert!(errs[0].reason.contains("at most two paths"));
    }

    #[test]
    fn test_tree_params_before_or_after_path() {
        let parsed = ops("@Kif TREE src(depth=2)\n@Kif TREE(show_hidden=true) .\n");
        assert_eq!(
            parsed,
            vec![
                Operation::Tree {
                    path: PathBuf::from("src"),
                    params: TreeParams {
                        depth: Some(2),
                        ..TreeParams::default()
                    }
                },
                Operation::Tree {
                    path: PathBuf::from("."),
                    params: TreeParams {
                        show_hidden: true,
                        ..TreeParams::default()
                    }
                },
            ]
        );
    }

    #[test]
    fn test_tree_path_with_parentheses_kept() {
        let parsed = ops("@Kif TREE docs (draft)\n");
        assert_eq!(
            parsed,
            vec![Operation::Tree {
                path: PathBuf::from("docs (draft)"),
                params: TreeParams::default(),
            }]
        );
    }

    #[test]
    fn test_find_and_run() {
        let parsed = ops(
            "@Kif FIND(pattern=\"\\.rs$\", depth=3) src\n@Kif RUN(timeout=5, cwd=build) cargo test -- --nocapture\n",
        );
        assert_eq!(parsed[0].kind(), OperationKind::Find);
        let Operation::Find { path, params } = &parsed[0] else {
            panic!("expected Find");
        };
        assert_eq!(path, &PathBuf::from("src"));
        assert!(params.match_pattern.is_match("lib.rs"));
        assert_eq!(params.depth, Some(3));

        assert_eq!(
            parsed[1],
            Operation::Run {
                command: "cargo test -- --nocapture".to_string(),
                cwd: Some(PathBuf::from("build")),
                timeout: Some(Duration::from_secs(5)),
                shell: true,
            }
        );
    }

    #[test]
    fn test_read_requires_inline_path() {
        let errs = errors("@Kif FILE a.txt\n@Kif READ\n");
        assert!(errs[0].reason.contains("READ requires a path"));
    }

    #[test]
    fn test_unknown_param_for_plain_directive() {
        let errs = errors("@Kif DELETE(force=true) a.txt\n");
        assert!(errs[0].reason.contains("unknown parameter 'force' for DELETE"));
    }

    #[test]
    fn test_directive_lines_record_start_line() {
        let script = parse("\n@Kif CREATE a\nx\n@Kif END_CREATE\n@Kif DELETE b\n").unwrap();
        let lines: Vec<usize> = script.directives.iter().map(|d| d.line).collect();
        assert_eq!(lines, vec![2, 5]);
    }

    #[test]
    fn test_crlf_scripts() {
        let parsed = ops("@Kif CREATE a.txt\r\nhi\r\n@Kif END_CREATE\r\n");
        assert_eq!(
            parsed,
            vec![Operation::Create {
                path: PathBuf::from("a.txt"),
                content: "hi\r\n".to_string(),
            }]
        );
    }
}
