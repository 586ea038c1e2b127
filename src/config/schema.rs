use crate::command::{PolicyBuilder, PolicyMode};
use regex::Regex;
use serde::Deserialize;
use std::fmt;
use std::time::Duration;

/// One layer of command-policy configuration.
///
/// ```toml
/// [commands]
/// mode = "allowlist"
/// default_timeout = 60
/// max_timeout = 600
/// allow = ["^just\\s+.*"]
/// block = ["^terraform\\s+destroy.*"]
/// ```
#[derive(Debug, Deserialize, Default, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PolicyFile {
    #[serde(default)]
    pub commands: CommandSection,
}

#[derive(Debug, Deserialize, Default, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct CommandSection {
    #[serde(default)]
    pub mode: Option<PolicyMode>,
    /// Seconds
    #[serde(default)]
    pub default_timeout: Option<u64>,
    /// Seconds
    #[serde(default)]
    pub max_timeout: Option<u64>,
    #[serde(default)]
    pub allow: Vec<String>,
    #[serde(default)]
    pub block: Vec<String>,
}

impl PolicyFile {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut issues = Vec::new();
        let commands = &self.commands;

        for (field, value) in [
            ("default_timeout", commands.default_timeout),
            ("max_timeout", commands.max_timeout),
        ] {
            if value == Some(0) {
                issues.push(ValidationIssue::ZeroTimeout { field });
            }
        }
        if let (Some(default), Some(max)) = (commands.default_timeout, commands.max_timeout) {
            if default > max {
                issues.push(ValidationIssue::TimeoutAboveMax { default, max });
            }
        }

        for (list, patterns) in [("allow", &commands.allow), ("block", &commands.block)] {
            for pattern in patterns {
                if pattern.trim().is_empty() {
                    issues.push(ValidationIssue::EmptyPattern { list });
                } else if let Err(error) = Regex::new(pattern) {
                    issues.push(ValidationIssue::InvalidPattern {
                        list,
                        pattern: pattern.clone(),
                        message: error.to_string(),
                    });
                }
            }
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { issues })
        }
    }

    /// Fold this layer into `builder`: patterns are added, mode and
    /// timeouts replace what came before.
    pub fn apply_to(&self, builder: &mut PolicyBuilder) {
        let commands = &self.commands;
        if let Some(mode) = commands.mode {
            builder.set_mode(mode);
        }
        if let Some(secs) = commands.default_timeout {
            builder.set_default_timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = commands.max_timeout {
            builder.set_max_timeout(Duration::from_secs(secs));
        }
        for pattern in &commands.allow {
            builder.allow_pattern(pattern.as_str());
        }
        for pattern in &commands.block {
            builder.block_pattern(pattern.as_str());
        }
    }
}

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub issues: Vec<ValidationIssue>,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, issue) in self.issues.iter().enumerate() {
            if idx > 0 {
                writeln!(f)?;
            }
            write!(f, "{issue}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

#[derive(Debug, Clone)]
pub enum ValidationIssue {
    ZeroTimeout {
        field: &'static str,
    },
    TimeoutAboveMax {
        default: u64,
        max: u64,
    },
    EmptyPattern {
        list: &'static str,
    },
    InvalidPattern {
        list: &'static str,
        pattern: String,
        message: String,
    },
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationIssue::ZeroTimeout { field } => {
                write!(f, "commands.{field} must be at least 1 second")
            }
            ValidationIssue::TimeoutAboveMax { default, max } => write!(
                f,
                "commands.default_timeout ({default}s) exceeds commands.max_timeout ({max}s)"
            ),
            ValidationIssue::EmptyPattern { list } => {
                write!(f, "commands.{list} contains an empty pattern")
            }
            ValidationIssue::InvalidPattern {
                list,
                pattern,
                message,
            } => write!(f, "commands.{list} pattern '{pattern}' is invalid: {message}"),
        }
    }
}
