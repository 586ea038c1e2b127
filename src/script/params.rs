//! `(key=value, ...)` directive parameters.
//!
//! Values are typed by syntax: `true`/`false` are booleans, all-digit text is
//! an integer, anything else (quoted or bare) is a string. Each directive
//! kind then folds its raw list into a typed struct, rejecting unknown keys.

use crate::replace::ReplacementRule;
use regex::Regex;
use std::fmt;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamValue {
    Bool(bool),
    Int(u64),
    Str(String),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Bool(value) => write!(f, "{value}"),
            ParamValue::Int(value) => write!(f, "{value}"),
            ParamValue::Str(value) => write!(f, "{value:?}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub key: String,
    pub value: ParamValue,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParamError {
    #[error("unknown parameter '{key}' for {directive}")]
    UnknownKey { directive: String, key: String },

    #[error("parameter '{key}' expects {expected}, got {found}")]
    InvalidValue {
        key: String,
        expected: &'static str,
        found: String,
    },

    #[error("parameter '{key}' given more than once")]
    Duplicate { key: String },

    #[error("invalid regex for '{key}': {message}")]
    InvalidRegex { key: String, message: String },

    #[error("malformed parameter list: {0}")]
    Syntax(String),
}

/// Parse the text between the parentheses of a directive.
pub fn parse_param_list(src: &str) -> Result<Vec<Param>, ParamError> {
    let mut params: Vec<Param> = Vec::new();
    let mut chars = src.char_indices().peekable();

    loop {
        skip_whitespace(&mut chars);
        let Some(&(start, first)) = chars.peek() else {
            break;
        };
        if !(first.is_ascii_alphabetic() || first == '_') {
            return Err(ParamError::Syntax(format!(
                "expected parameter name at '{}'",
                &src[start..]
            )));
        }

        let mut end = start;
        while let Some(&(idx, c)) = chars.peek() {
            if c.is_ascii_alphanumeric() || c == '_' {
                end = idx + c.len_utf8();
                chars.next();
            } else {
                break;
            }
        }
        let key = src[start..end].to_string();

        skip_whitespace(&mut chars);
        match chars.next() {
            Some((_, '=')) => {}
            _ => {
                return Err(ParamError::Syntax(format!(
                    "expected '=' after '{key}'"
                )))
            }
        }
        skip_whitespace(&mut chars);

        let value = match chars.peek() {
            Some(&(_, quote @ ('"' | '\''))) => {
                chars.next();
                ParamValue::Str(read_quoted(&mut chars, quote, &key)?)
            }
            Some(_) => {
                let mut bare = String::new();
                while let Some(&(_, c)) = chars.peek() {
                    if c == ',' {
                        break;
                    }
                    bare.push(c);
                    chars.next();
                }
                classify_bare(bare.trim(), &key)?
            }
            None => {
                return Err(ParamError::Syntax(format!("missing value for '{key}'")));
            }
        };

        if params.iter().any(|p| p.key == key) {
            return Err(ParamError::Duplicate { key });
        }
        params.push(Param { key, value });

        skip_whitespace(&mut chars);
        match chars.next() {
            None => break,
            Some((_, ',')) => continue,
            Some((idx, _)) => {
                return Err(ParamError::Syntax(format!(
                    "expected ',' before '{}'",
                    &src[idx..]
                )))
            }
        }
    }

    Ok(params)
}

type CharStream<'a> = std::iter::Peekable<std::str::CharIndices<'a>>;

fn skip_whitespace(chars: &mut CharStream<'_>) {
    while chars.peek().is_some_and(|(_, c)| c.is_whitespace()) {
        chars.next();
    }
}

fn read_quoted(chars: &mut CharStream<'_>, quote: char, key: &str) -> Result<String, ParamError> {
    let mut value = String::new();
    while let Some((_, c)) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some((_, 'n')) => value.push('\n'),
                Some((_, 't')) => value.push('\t'),
                Some((_, 'r')) => value.push('\r'),
                Some((_, escaped @ ('\\' | '"' | '\''))) => value.push(escaped),
                // Unknown escapes are kept as written so regex values survive.
                Some((_, other)) => {
                    value.push('\\');
                    value.push(other);
                }
                None => break,
            },
            c if c == quote => return Ok(value),
            c => value.push(c),
        }
    }
    Err(ParamError::Syntax(format!(
        "unterminated quoted value for '{key}'"
    )))
}

fn classify_bare(raw: &str, key: &str) -> Result<ParamValue, ParamError> {
    if raw.is_empty() {
        return Err(ParamError::Syntax(format!("missing value for '{key}'")));
    }
    if raw.eq_ignore_ascii_case("true") {
        return Ok(ParamValue::Bool(true));
    }
    if raw.eq_ignore_ascii_case("false") {
        return Ok(ParamValue::Bool(false));
    }
    if raw.bytes().all(|b| b.is_ascii_digit()) {
        return raw
            .parse()
            .map(ParamValue::Int)
            .map_err(|_| ParamError::InvalidValue {
                key: key.to_string(),
                expected: "an integer that fits in 64 bits",
                found: raw.to_string(),
            });
    }
    Ok(ParamValue::Str(raw.to_string()))
}

fn expect_bool(param: &Param) -> Result<bool, ParamError> {
    match &param.value {
        ParamValue::Bool(value) => Ok(*value),
        other => Err(invalid(param, "true or false", other)),
    }
}

fn expect_positive(param: &Param) -> Result<NonZeroUsize, ParamError> {
    match &param.value {
        ParamValue::Int(value) => usize::try_from(*value)
            .ok()
            .and_then(NonZeroUsize::new)
            .ok_or_else(|| invalid(param, "a positive integer", &param.value)),
        other => Err(invalid(param, "a positive integer", other)),
    }
}

/// Strings accept any syntax; `cwd=123` is a directory name, not a number.
fn expect_string(param: &Param) -> String {
    match &param.value {
        ParamValue::Str(value) => value.clone(),
        ParamValue::Int(value) => value.to_string(),
        ParamValue::Bool(value) => value.to_string(),
    }
}

fn expect_regex(param: &Param) -> Result<Regex, ParamError> {
    Regex::new(&expect_string(param)).map_err(|e| ParamError::InvalidRegex {
        key: param.key.clone(),
        message: e.to_string(),
    })
}

fn invalid(param: &Param, expected: &'static str, found: &ParamValue) -> ParamError {
    ParamError::InvalidValue {
        key: param.key.clone(),
        expected,
        found: found.to_string(),
    }
}

fn unknown(directive: &str, param: &Param) -> ParamError {
    ParamError::UnknownKey {
        directive: directive.to_string(),
        key: param.key.clone(),
    }
}

/// Reject any parameters on a directive that takes none.
pub fn expect_none(directive: &str, params: &[Param]) -> Result<(), ParamError> {
    match params.first() {
        Some(param) => Err(unknown(directive, param)),
        None => Ok(()),
    }
}

/// Matching options for a `SEARCH_AND_REPLACE` block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplaceParams {
    pub replace_all: bool,
    pub count: NonZeroUsize,
    pub regex: bool,
    pub ignore_whitespace: bool,
    pub fuzzy: bool,
}

impl Default for ReplaceParams {
    fn default() -> Self {
        Self {
            replace_all: false,
            count: NonZeroUsize::MIN,
            regex: false,
            ignore_whitespace: false,
            fuzzy: false,
        }
    }
}

impl ReplaceParams {
    pub fn from_params(params: &[Param]) -> Result<Self, ParamError> {
        let mut parsed = Self::default();
        for param in params {
            match param.key.as_str() {
                "replace_all" => parsed.replace_all = expect_bool(param)?,
                "count" => parsed.count = expect_positive(param)?,
                "regex" => parsed.regex = expect_bool(param)?,
                "ignore_whitespace" => parsed.ignore_whitespace = expect_bool(param)?,
                "fuzzy_match" => parsed.fuzzy = expect_bool(param)?,
                _ => return Err(unknown("SEARCH_AND_REPLACE", param)),
            }
        }
        Ok(parsed)
    }

    /// Build the rule for one BEFORE/AFTER pair under these options.
    pub fn rule(&self, before: String, after: String) -> ReplacementRule {
        ReplacementRule {
            before,
            after,
            replace_all: self.replace_all,
            count: self.count,
            regex: self.regex,
            ignore_whitespace: self.ignore_whitespace,
            fuzzy: self.fuzzy,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeParams {
    /// `None` walks the whole tree.
    pub depth: Option<usize>,
    pub show_hidden: bool,
    pub include_files: bool,
}

impl Default for TreeParams {
    fn default() -> Self {
        Self {
            depth: None,
            show_hidden: false,
            include_files: true,
        }
    }
}

impl TreeParams {
    pub fn from_params(params: &[Param]) -> Result<Self, ParamError> {
        let mut parsed = Self::default();
        for param in params {
            match param.key.as_str() {
                "depth" => parsed.depth = Some(expect_positive(param)?.get()),
                "show_hidden" => parsed.show_hidden = expect_bool(param)?,
                "include_files" => parsed.include_files = expect_bool(param)?,
                _ => return Err(unknown("TREE", param)),
            }
        }
        Ok(parsed)
    }
}

#[derive(Debug, Clone)]
pub struct FindParams {
    /// Matched against file names.
    pub match_pattern: Regex,
    /// Relative paths must match this, when set.
    pub include: Option<Regex>,
    /// Relative paths matching this are dropped.
    pub exclude: Option<Regex>,
    pub depth: Option<usize>,
}

impl Default for FindParams {
    fn default() -> Self {
        Self {
            match_pattern: match_everything(),
            include: None,
            exclude: None,
            depth: None,
        }
    }
}

impl PartialEq for FindParams {
    fn eq(&self, other: &Self) -> bool {
        fn source(regex: &Option<Regex>) -> Option<&str> {
            regex.as_ref().map(Regex::as_str)
        }
        self.match_pattern.as_str() == other.match_pattern.as_str()
            && source(&self.include) == source(&other.include)
            && source(&self.exclude) == source(&other.exclude)
            && self.depth == other.depth
    }
}

impl Eq for FindParams {}

fn match_everything() -> Regex {
    Regex::new(".*").expect("'.*' is a valid regex")
}

impl FindParams {
    pub fn from_params(params: &[Param]) -> Result<Self, ParamError> {
        let mut parsed = Self::default();
        for param in params {
            match param.key.as_str() {
                "match_pattern" | "pattern" => parsed.match_pattern = expect_regex(param)?,
                "include" => parsed.include = Some(expect_regex(param)?),
                "exclude" => parsed.exclude = Some(expect_regex(param)?),
                "depth" => parsed.depth = Some(expect_positive(param)?.get()),
                _ => return Err(unknown("FIND", param)),
            }
        }
        Ok(parsed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunParams {
    pub timeout: Option<Duration>,
    pub cwd: Option<PathBuf>,
    pub shell: bool,
}

impl Default for RunParams {
    fn default() -> Self {
        Self {
            timeout: None,
            cwd: None,
            shell: true,
        }
    }
}

impl RunParams {
    pub fn from_params(params: &[Param]) -> Result<Self, ParamError> {
        let mut parsed = Self::default();
        for param in params {
            match param.key.as_str() {
                "timeout" => {
                    let secs = expect_positive(param)?.get() as u64;
                    parsed.timeout = Some(Duration::from_secs(secs));
                }
                "cwd" => parsed.cwd = Some(expand_home(&expect_string(param))),
                "shell" => parsed.shell = expect_bool(param)?,
                _ => return Err(unknown("RUN", param)),
            }
        }
        Ok(parsed)
    }
}

fn expand_home(raw: &str) -> PathBuf {
    let rest = match raw.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => rest.trim_start_matches('/'),
        _ => return PathBuf::from(raw),
    };
    match home::home_dir() {
        Some(home) if rest.is_empty() => home,
        Some(home) => home.join(rest),
        None => PathBuf::from(raw),
    }
}
