//! Running an allowed command with captured output and a hard timeout.

use crate::command::errors::CommandError;
use crate::command::policy::{CommandPolicy, Verdict};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(10);
const READER_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// One command to run on behalf of a `RUN` directive.
#[derive(Debug, Clone)]
pub struct CommandRequest<'a> {
    pub command: &'a str,
    pub cwd: Option<&'a Path>,
    pub timeout: Option<Duration>,
    /// Run through the platform shell (`sh -c` / `cmd /C`); otherwise the
    /// command is split on whitespace and executed directly.
    pub shell: bool,
}

impl<'a> CommandRequest<'a> {
    pub fn shell(command: &'a str) -> Self {
        Self {
            command,
            cwd: None,
            timeout: None,
            shell: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub command: String,
    pub cwd: PathBuf,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
}

/// Evaluate `request` against `policy` and, if allowed, run it to completion.
///
/// `default_cwd` is used when the request names no working directory. A
/// non-zero exit status is reported as [`CommandError::Failed`] and an
/// expired timeout as [`CommandError::Timeout`]; on timeout the whole process
/// group is killed.
pub fn run_command(
    policy: &CommandPolicy,
    request: &CommandRequest<'_>,
    default_cwd: &Path,
) -> Result<CommandOutput, CommandError> {
    let command = request.command.to_string();

    if let Verdict::Blocked(reason) = policy.evaluate(request.command) {
        return Err(CommandError::Blocked { command, reason });
    }

    let cwd = request.cwd.unwrap_or(default_cwd).to_path_buf();
    if !cwd.is_dir() {
        return Err(CommandError::WorkingDirectory { path: cwd });
    }

    let timeout = policy.effective_timeout(request.timeout);
    debug!(%command, cwd = %cwd.display(), timeout_secs = timeout.as_secs_f64(), "running command");

    let mut process = build_command(request)?;
    process
        .current_dir(&cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        process.process_group(0);
    }

    let started = Instant::now();
    let mut child = process.spawn().map_err(|source| CommandError::Spawn {
        command: command.clone(),
        source,
    })?;

    let stdout_reader = spawn_reader(child.stdout.take());
    let stderr_reader = spawn_reader(child.stderr.take());

    let status = wait_with_deadline(&mut child, started + timeout).map_err(|source| {
        terminate(&mut child);
        CommandError::Wait {
            command: command.clone(),
            source,
        }
    })?;

    let stdout = collect(stdout_reader);
    let stderr = collect(stderr_reader);
    let elapsed = started.elapsed();

    let Some(status) = status else {
        warn!(%command, "command timed out after {:.1}s", timeout.as_secs_f64());
        return Err(CommandError::Timeout {
            command,
            timeout,
            stdout,
            stderr,
        });
    };

    if !status.success() {
        return Err(CommandError::Failed {
            command,
            exit_code: status.code(),
            stdout,
            stderr,
        });
    }

    debug!(%command, elapsed_ms = elapsed.as_millis() as u64, "command finished");
    Ok(CommandOutput {
        command,
        cwd,
        stdout,
        stderr,
        elapsed,
    })
}

fn build_command(request: &CommandRequest<'_>) -> Result<Command, CommandError> {
    if request.shell {
        #[cfg(windows)]
        let process = {
            let mut process = Command::new("cmd");
            process.arg("/C").arg(request.command);
            process
        };
        #[cfg(not(windows))]
        let process = {
            let mut process = Command::new("sh");
            process.arg("-c").arg(request.command);
            process
        };
        return Ok(process);
    }

    let mut argv = request.command.split_whitespace();
    let Some(program) = argv.next() else {
        return Err(CommandError::Spawn {
            command: request.command.to_string(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty command"),
        });
    };
    let mut process = Command::new(program);
    process.args(argv);
    Ok(process)
}

/// Poll the child until it exits or `deadline` passes.
///
/// Returns `Ok(None)` when the deadline passed; the child has been killed
/// and reaped by then.
fn wait_with_deadline(
    child: &mut Child,
    deadline: Instant,
) -> std::io::Result<Option<ExitStatus>> {
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        let now = Instant::now();
        if now >= deadline {
            terminate(child);
            return Ok(None);
        }
        std::thread::sleep(POLL_INTERVAL.min(deadline - now));
    }
}

/// Kill the child's whole process group, then the child itself, and reap it.
fn terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        if let Ok(pid) = i32::try_from(child.id()) {
            if let Err(errno) = killpg(Pid::from_raw(pid), Signal::SIGKILL) {
                debug!(pid, %errno, "killpg failed");
            }
        }
    }
    let _ = child.kill();
    let _ = child.wait();
}

fn spawn_reader<R>(pipe: Option<R>) -> Option<JoinHandle<Vec<u8>>>
where
    R: Read + Send + 'static,
{
    pipe.map(|mut pipe| {
        std::thread::spawn(move || {
            let mut buffer = Vec::new();
            let _ = pipe.read_to_end(&mut buffer);
            buffer
        })
    })
}

/// Join a reader thread, giving up if a stray descendant keeps the pipe open.
fn collect(reader: Option<JoinHandle<Vec<u8>>>) -> String {
    let Some(handle) = reader else {
        return String::new();
    };

    let deadline = Instant::now() + READER_JOIN_TIMEOUT;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            warn!("output pipe still open after the command exited; output discarded");
            return String::new();
        }
        std::thread::sleep(POLL_INTERVAL);
    }

    match handle.join() {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(_) => String::new(),
    }
}
