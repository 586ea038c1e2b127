//! Applying BEFORE/AFTER rules to file text.
//!
//! Rules run strictly in order; each sees the output of the previous one.
//! Matches are enumerated left-to-right without overlap, and the selected
//! ones are applied as a single batch of verified [`Splice`]s.

use crate::edit::{splice_all, Splice};
use crate::replace::errors::MatchError;
use crate::replace::whitespace::{trim_line_ends, NormalizedView};
use regex::{Regex, RegexBuilder};
use std::borrow::Cow;
use std::num::NonZeroUsize;

/// One BEFORE/AFTER pair and the options that govern how it matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplacementRule {
    pub before: String,
    /// Replacement text; a `$1` / `${name}` template in regex mode.
    pub after: String,
    /// Replace every match; takes priority over `count`.
    pub replace_all: bool,
    pub count: NonZeroUsize,
    pub regex: bool,
    pub ignore_whitespace: bool,
    /// Accepted for compatibility; has no effect on matching.
    pub fuzzy: bool,
}

impl ReplacementRule {
    /// A literal rule replacing the first occurrence of `before`.
    pub fn literal(before: impl Into<String>, after: impl Into<String>) -> Self {
        Self {
            before: before.into(),
            after: after.into(),
            replace_all: false,
            count: NonZeroUsize::MIN,
            regex: false,
            ignore_whitespace: false,
            fuzzy: false,
        }
    }

    /// The pattern text actually searched for.
    fn effective_pattern(&self) -> Cow<'_, str> {
        if self.ignore_whitespace {
            Cow::Owned(trim_line_ends(&self.before))
        } else {
            Cow::Borrowed(&self.before)
        }
    }
}

/// A match of a rule in the original text, with its expanded replacement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleMatch {
    pub byte_start: usize,
    pub byte_end: usize,
    pub replacement: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplaceOutcome {
    pub text: String,
    /// Matches replaced by each rule, in rule order.
    pub replacements: Vec<usize>,
}

impl ReplaceOutcome {
    pub fn total(&self) -> usize {
        self.replacements.iter().sum()
    }
}

enum Matcher {
    Literal(String),
    Pattern(Regex),
}

/// Compile a BEFORE block the way regex rules are matched: multi-line
/// anchors on, `.` not matching a newline.
pub fn compile_pattern(source: &str) -> Result<Regex, regex::Error> {
    RegexBuilder::new(source)
        .multi_line(true)
        .dot_matches_new_line(false)
        .build()
}

impl Matcher {
    fn new(rule: &ReplacementRule, pattern: &str, index: usize) -> Result<Self, MatchError> {
        if pattern.is_empty() || (rule.ignore_whitespace && pattern.trim().is_empty()) {
            return Err(MatchError::EmptyPattern { rule: index });
        }
        if !rule.regex {
            return Ok(Matcher::Literal(pattern.to_string()));
        }
        compile_pattern(pattern)
            .map(Matcher::Pattern)
            .map_err(|e| MatchError::InvalidPattern {
                rule: index,
                message: e.to_string(),
            })
    }

    /// Non-overlapping matches in `haystack` as `(start, end, replacement)`.
    fn find(&self, haystack: &str, after: &str) -> Vec<(usize, usize, String)> {
        match self {
            Matcher::Literal(needle) => haystack
                .match_indices(needle.as_str())
                .map(|(start, m)| (start, start + m.len(), after.to_string()))
                .collect(),
            Matcher::Pattern(regex) => regex
                .captures_iter(haystack)
                .filter_map(|caps| {
                    let whole = caps.get(0)?;
                    let mut replacement = String::new();
                    caps.expand(after, &mut replacement);
                    Some((whole.start(), whole.end(), replacement))
                })
                .collect(),
        }
    }
}

/// Check that a rule can be compiled, without matching it against anything.
pub fn check_rule(rule: &ReplacementRule, index: usize) -> Result<(), MatchError> {
    Matcher::new(rule, &rule.effective_pattern(), index).map(|_| ())
}

/// Every non-overlapping match of `rule` in `text`, in original coordinates.
///
/// `index` is the 1-based rule number used in errors.
pub fn find_matches(
    text: &str,
    rule: &ReplacementRule,
    index: usize,
) -> Result<Vec<RuleMatch>, MatchError> {
    let pattern = rule.effective_pattern();
    let matcher = Matcher::new(rule, &pattern, index)?;

    if !rule.ignore_whitespace {
        return Ok(matcher
            .find(text, &rule.after)
            .into_iter()
            .map(|(byte_start, byte_end, replacement)| RuleMatch {
                byte_start,
                byte_end,
                replacement,
            })
            .collect());
    }

    let view = NormalizedView::new(text);
    Ok(matcher
        .find(view.text(), &rule.after)
        .into_iter()
        .map(|(start, end, replacement)| {
            let byte_start = view.original_start(start);
            let byte_end = if end == start {
                byte_start
            } else {
                view.original_end(end).max(byte_start)
            };
            RuleMatch {
                byte_start,
                byte_end,
                replacement,
            }
        })
        .collect())
}

fn select(
    mut matches: Vec<RuleMatch>,
    rule: &ReplacementRule,
    index: usize,
) -> Result<Vec<RuleMatch>, MatchError> {
    if matches.is_empty() {
        return Err(MatchError::NotFound { rule: index });
    }
    if rule.replace_all {
        return Ok(matches);
    }

    let required = rule.count.get();
    if matches.len() < required {
        return Err(MatchError::TooFewMatches {
            rule: index,
            found: matches.len(),
            required,
        });
    }
    matches.truncate(required);
    Ok(matches)
}

/// Apply one rule to `text`, returning the new text and how many matches
/// were replaced.
pub fn apply_rule(
    text: &str,
    rule: &ReplacementRule,
    index: usize,
) -> Result<(String, usize), MatchError> {
    let selected = select(find_matches(text, rule, index)?, rule, index)?;

    let splices: Vec<Splice> = selected
        .iter()
        .map(|m| {
            Splice::new(
                m.byte_start,
                m.byte_end,
                m.replacement.as_str(),
                &text[m.byte_start..m.byte_end],
            )
        })
        .collect();

    let out = splice_all(text, &splices)?;
    Ok((out, selected.len()))
}

/// Apply `rules` in order, each to the output of the previous one.
///
/// Nothing is returned unless every rule succeeds.
pub fn apply(text: &str, rules: &[ReplacementRule]) -> Result<ReplaceOutcome, MatchError> {
    let mut current = text.to_string();
    let mut replacements = Vec::with_capacity(rules.len());

    for (offset, rule) in rules.iter().enumerate() {
        let (next, count) = apply_rule(&current, rule, offset + 1)?;
        tracing::trace!(rule = offset + 1, replaced = count, "applied rule");
        replacements.push(count);
        current = next;
    }

    Ok(ReplaceOutcome {
        text: current,
        replacements,
    })
}
