use crate::command::{CommandPolicy, PolicyBuilder, PolicyError};
use crate::config::schema::{PolicyFile, ValidationError};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Directory holding per-project and per-user configuration.
pub const CONFIG_DIR: &str = ".kifdiff";
pub const CONFIG_FILE: &str = "config.toml";

#[derive(Debug)]
pub enum ConfigError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Toml {
        path: Option<PathBuf>,
        source: toml_edit::de::Error,
    },
    Validation {
        path: Option<PathBuf>,
        source: ValidationError,
    },
    Policy {
        source: PolicyError,
    },
}

impl ConfigError {
    fn with_path(self, path: &Path) -> Self {
        let path = path.to_path_buf();
        match self {
            ConfigError::Toml { path: None, source } => ConfigError::Toml {
                path: Some(path),
                source,
            },
            ConfigError::Validation { path: None, source } => ConfigError::Validation {
                path: Some(path),
                source,
            },
            other => other,
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io { path, source } => {
                write!(
                    f,
                    "failed to read kifdiff config from {}: {}",
                    path.display(),
                    source
                )
            }
            ConfigError::Toml { path, source } => match path {
                Some(path) => write!(
                    f,
                    "failed to parse kifdiff config TOML ({}): {}",
                    path.display(),
                    source
                ),
                None => write!(f, "failed to parse kifdiff config TOML: {}", source),
            },
            ConfigError::Validation { path, source } => match path {
                Some(path) => write!(f, "invalid kifdiff config ({}): {}", path.display(), source),
                None => write!(f, "invalid kifdiff config: {}", source),
            },
            ConfigError::Policy { source } => write!(f, "invalid command policy: {}", source),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io { source, .. } => Some(source),
            ConfigError::Toml { source, .. } => Some(source),
            ConfigError::Validation { source, .. } => Some(source),
            ConfigError::Policy { source } => Some(source),
        }
    }
}

pub fn load_from_str(input: &str) -> Result<PolicyFile, ConfigError> {
    let config: PolicyFile = toml_edit::de::from_str(input)
        .map_err(|source| ConfigError::Toml { path: None, source })?;
    config
        .validate()
        .map_err(|source| ConfigError::Validation { path: None, source })?;
    Ok(config)
}

pub fn load_from_path(path: impl AsRef<Path>) -> Result<PolicyFile, ConfigError> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    load_from_str(&contents).map_err(|error| error.with_path(path))
}

/// Where the layered configuration files live.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigSources {
    pub project: Option<PathBuf>,
    pub user: Option<PathBuf>,
}

impl ConfigSources {
    /// `<project_dir>/.kifdiff/config.toml` and `~/.kifdiff/config.toml`.
    pub fn discover(project_dir: &Path) -> Self {
        Self {
            project: Some(project_dir.join(CONFIG_DIR).join(CONFIG_FILE)),
            user: home::home_dir().map(|home| home.join(CONFIG_DIR).join(CONFIG_FILE)),
        }
    }

    /// Layers in merge order.
    pub fn layers(&self) -> impl Iterator<Item = &Path> {
        self.project.iter().chain(self.user.iter()).map(PathBuf::as_path)
    }
}

/// Fold built-in defaults, then the project layer, then the user layer into
/// one policy. Missing files are skipped.
pub fn load_policy(sources: &ConfigSources) -> Result<CommandPolicy, ConfigError> {
    let mut builder = PolicyBuilder::with_defaults();
    for path in sources.layers() {
        if !path.is_file() {
            continue;
        }
        debug!(path = %path.display(), "loading command policy layer");
        load_from_path(path)?.apply_to(&mut builder);
    }
    builder
        .build()
        .map_err(|source| ConfigError::Policy { source })
}
