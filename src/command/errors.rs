use crate::command::policy::BlockReason;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CommandError {
    #[error("command blocked ({reason}): {command}")]
    Blocked { command: String, reason: BlockReason },

    #[error("command timed out after {}s: {command}", timeout.as_secs_f64())]
    Timeout {
        command: String,
        timeout: Duration,
        stdout: String,
        stderr: String,
    },

    #[error("command failed with {}: {command}", describe_exit(*exit_code))]
    Failed {
        command: String,
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
    },

    #[error("failed to start command '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed waiting for command '{command}': {source}")]
    Wait {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("working directory does not exist: {}", path.display())]
    WorkingDirectory { path: PathBuf },
}

impl CommandError {
    /// Captured stderr, when the command got far enough to produce any.
    pub fn stderr(&self) -> Option<&str> {
        match self {
            CommandError::Timeout { stderr, .. } | CommandError::Failed { stderr, .. } => {
                Some(stderr)
            }
            _ => None,
        }
    }
}

fn describe_exit(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "termination by signal".to_string(),
    }
}

#[derive(Error, Debug)]
#[error("invalid command pattern '{pattern}': {source}")]
pub struct PolicyError {
    pub pattern: String,
    #[source]
    pub source: regex::Error,
}
