//! Allow/block evaluation for `RUN` commands.
//!
//! A [`CommandPolicy`] is an immutable value folded together once at startup
//! (built-in defaults, then project config, then user config) and passed by
//! reference into the driver.

use crate::command::errors::PolicyError;
use regex::{Regex, RegexBuilder};
use serde::Deserialize;
use std::fmt;
use std::time::Duration;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const MAX_TIMEOUT: Duration = Duration::from_secs(300);

/// Common development commands that are allowed in allowlist mode.
pub const DEFAULT_ALLOW_PATTERNS: &[&str] = &[
    // version control
    r"^git\s+(status|log|diff|branch|checkout|pull|fetch|add|commit|push|clone|stash).*",
    // package managers
    r"^npm\s+(install|test|run|start|build|list|ci).*",
    r"^yarn\s+(install|test|run|start|build|list).*",
    r"^pip\s+(install|list|show|freeze).*",
    r"^cargo\s+(build|test|check|run|clippy).*",
    r"^flutter\s+(pub\s+get|test|build|run|doctor|clean|analyze).*",
    r"^poetry\s+(install|run|build|test).*",
    // read-only file inspection
    r"^ls\s+.*",
    r"^cat\s+.*",
    r"^grep\s+.*",
    r"^find\s+.*",
    r"^tree\s+.*",
    r"^head\s+.*",
    r"^tail\s+.*",
    r"^wc\s+.*",
    r"^file\s+.*",
    // system info
    r"^pwd$",
    r"^whoami$",
    r"^date$",
    r"^uname.*",
    r"^which\s+.*",
    r"^echo\s+.*",
    r"^env$",
    r"^printenv.*",
    // testing and linting
    r"^pytest.*",
    r"^jest.*",
    r"^eslint.*",
    r"^pylint.*",
    r"^black.*",
    r"^flake8.*",
    r"^mypy.*",
    // build tools
    r"^make\s+(build|test|clean)$",
    r"^cmake\s+.*",
    r"^mvn\s+(clean|install|test|package).*",
    r"^gradle\s+(build|test|clean).*",
];

/// Dangerous commands, rejected in every mode.
pub const DEFAULT_BLOCK_PATTERNS: &[&str] = &[
    // destructive
    r".*rm\s+-rf.*",
    r".*rm\s+-fr.*",
    r".*rm\s+.*\*.*",
    r".*rmdir.*",
    r"^dd\s+.*",
    r".*\|\s*dd\s+.*",
    r".*mkfs.*",
    r".*format.*",
    // privilege escalation
    r".*sudo.*",
    r".*su\s+.*",
    r".*doas.*",
    // system modification
    r"^chmod.*777.*",
    r"^chown\s+.*",
    r"^shutdown.*",
    r"^reboot$",
    r"^halt$",
    r"^init\s+[06].*",
    // remote code and process replacement
    r".*curl.*\|.*sh.*",
    r".*wget.*\|.*sh.*",
    r".*>\s*/dev/sd.*",
    r"^eval\s+.*",
    r"^exec\s+.*",
    r".*;\s*exec\s+.*",
    r".*\|\s*exec\s+.*",
    // process manipulation
    r"^kill\s+-9.*",
    r"^killall\s+.*",
    r"^pkill\s+.*",
    // writes into system directories
    r".*>\s*/etc/.*",
    r".*>\s*/usr/bin/.*",
    r".*>\s*/var/.*",
    r".*>\s*/sys/.*",
    r".*>\s*/proc/.*",
    // package removal
    r"^apt\s+(remove|purge|autoremove).*",
    r"^apt-get\s+(remove|purge|autoremove).*",
    r"^yum\s+remove.*",
    r"^brew\s+uninstall.*",
    r"^pip\s+uninstall.*",
];

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PolicyMode {
    /// Only commands matching an allow pattern run.
    Allowlist,
    /// Everything not matching a block pattern runs.
    #[default]
    Blocklist,
}

impl fmt::Display for PolicyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyMode::Allowlist => write!(f, "allowlist"),
            PolicyMode::Blocklist => write!(f, "blocklist"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockReason {
    /// The source of the block pattern that matched.
    Pattern(String),
    NotInAllowlist,
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockReason::Pattern(pattern) => write!(f, "matches blocked pattern '{pattern}'"),
            BlockReason::NotInAllowlist => write!(f, "not in allowlist"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Allowed,
    Blocked(BlockReason),
}

impl Verdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Verdict::Allowed)
    }
}

#[derive(Debug, Clone)]
struct CompiledPattern {
    source: String,
    regex: Regex,
}

impl CompiledPattern {
    fn compile(source: &str) -> Result<Self, PolicyError> {
        // Anchored at the start, like a prefix match over the whole command.
        let regex = RegexBuilder::new(&format!("^(?:{source})"))
            .case_insensitive(true)
            .build()
            .map_err(|error| PolicyError {
                pattern: source.to_string(),
                source: error,
            })?;
        Ok(Self {
            source: source.to_string(),
            regex,
        })
    }
}

#[derive(Debug, Clone)]
pub struct CommandPolicy {
    mode: PolicyMode,
    allow: Vec<CompiledPattern>,
    block: Vec<CompiledPattern>,
    default_timeout: Duration,
    max_timeout: Duration,
}

impl CommandPolicy {
    /// The built-in policy: blocklist mode with the default pattern lists.
    pub fn builtin() -> Self {
        PolicyBuilder::with_defaults()
            .build()
            .expect("built-in command patterns are valid regexes")
    }

    pub fn builder() -> PolicyBuilder {
        PolicyBuilder::new()
    }

    /// Decide whether `command` may run.
    ///
    /// Block patterns are checked first in both modes.
    pub fn evaluate(&self, command: &str) -> Verdict {
        let normalized = normalize_command(command);

        if let Some(hit) = self.block.iter().find(|p| p.regex.is_match(&normalized)) {
            return Verdict::Blocked(BlockReason::Pattern(hit.source.clone()));
        }

        match self.mode {
            PolicyMode::Blocklist => Verdict::Allowed,
            PolicyMode::Allowlist => {
                if self.allow.iter().any(|p| p.regex.is_match(&normalized)) {
                    Verdict::Allowed
                } else {
                    Verdict::Blocked(BlockReason::NotInAllowlist)
                }
            }
        }
    }

    /// The timeout to enforce for a command: the requested one, or the
    /// default, never more than the maximum.
    pub fn effective_timeout(&self, requested: Option<Duration>) -> Duration {
        requested
            .unwrap_or(self.default_timeout)
            .min(self.max_timeout)
    }

    pub fn mode(&self) -> PolicyMode {
        self.mode
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    pub fn max_timeout(&self) -> Duration {
        self.max_timeout
    }

    pub fn allow_patterns(&self) -> impl Iterator<Item = &str> {
        self.allow.iter().map(|p| p.source.as_str())
    }

    pub fn block_patterns(&self) -> impl Iterator<Item = &str> {
        self.block.iter().map(|p| p.source.as_str())
    }
}

impl Default for CommandPolicy {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Collapse runs of whitespace into single spaces and trim the ends.
///
/// Only used for matching; the original command string is what executes.
pub fn normalize_command(command: &str) -> String {
    command.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Mutable accumulator for a [`CommandPolicy`].
///
/// Patterns are unioned in insertion order without duplicates; mode and
/// timeouts are last-writer-wins.
#[derive(Debug, Clone)]
pub struct PolicyBuilder {
    mode: PolicyMode,
    allow: Vec<String>,
    block: Vec<String>,
    default_timeout: Duration,
    max_timeout: Duration,
}

impl PolicyBuilder {
    /// Empty pattern lists, blocklist mode, default timeouts.
    pub fn new() -> Self {
        Self {
            mode: PolicyMode::Blocklist,
            allow: Vec::new(),
            block: Vec::new(),
            default_timeout: DEFAULT_TIMEOUT,
            max_timeout: MAX_TIMEOUT,
        }
    }

    pub fn with_defaults() -> Self {
        let mut builder = Self::new();
        for pattern in DEFAULT_ALLOW_PATTERNS {
            builder.allow_pattern(*pattern);
        }
        for pattern in DEFAULT_BLOCK_PATTERNS {
            builder.block_pattern(*pattern);
        }
        builder
    }

    pub fn allow_pattern(&mut self, pattern: impl Into<String>) -> &mut Self {
        let pattern = pattern.into();
        if !self.allow.contains(&pattern) {
            self.allow.push(pattern);
        }
        self
    }

    pub fn block_pattern(&mut self, pattern: impl Into<String>) -> &mut Self {
        let pattern = pattern.into();
        if !self.block.contains(&pattern) {
            self.block.push(pattern);
        }
        self
    }

    pub fn set_mode(&mut self, mode: PolicyMode) -> &mut Self {
        self.mode = mode;
        self
    }

    pub fn set_default_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.default_timeout = timeout;
        self
    }

    pub fn set_max_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.max_timeout = timeout;
        self
    }

    pub fn build(&self) -> Result<CommandPolicy, PolicyError> {
        let allow = self
            .allow
            .iter()
            .map(|p| CompiledPattern::compile(p))
            .collect::<Result<Vec<_>, _>>()?;
        let block = self
            .block
            .iter()
            .map(|p| CompiledPattern::compile(p))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(CommandPolicy {
            mode: self.mode,
            allow,
            block,
            default_timeout: self.default_timeout.min(self.max_timeout),
            max_timeout: self.max_timeout,
        })
    }
}

impl Default for PolicyBuilder {
    fn default() -> Self {
        Self::new()
    }
}
