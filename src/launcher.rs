//! Detached command launcher
//!
//! Commands are started with a double fork: the daemon forks an intermediate
//! child, which spawns the real command and exits right away without waiting
//! for it. The daemon only waits for the intermediate child, which takes
//! microseconds, and the command is reparented to init (or the nearest
//! subreaper), which reaps it. The daemon never blocks on a command and
//! never collects zombies from them.

use std::ffi::OsStr;
use std::io::{self, Write};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use nix::errno::Errno;
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{fork, ForkResult};
use serde::{Deserialize, Serialize};

/// Exit code of the intermediate child when the failure has no errno
const EXIT_UNKNOWN_FAILURE: i32 = 126;

/// An external program and its arguments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    /// Absolute path of the executable
    pub path: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(path: impl Into<PathBuf>, args: &[&str]) -> Self {
        Self {
            path: path.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    fn to_command(&self) -> Command {
        let mut command = Command::new(&self.path);
        command.args(&self.args).stdin(Stdio::null());
        command
    }
}

impl std::fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.path.display())?;
        for arg in &self.args {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                write!(f, " {:?}", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("forking failed: {0}")]
    Fork(Errno),
    #[error("could not start {path:?}: {source}")]
    Spawn { path: PathBuf, source: io::Error },
    #[error("waiting for launcher process failed: {0}")]
    Wait(Errno),
    #[error("launcher process ended abnormally: {0}")]
    Abnormal(String),
}

/// Start `spec` fully detached from the calling process.
///
/// Returns once the intermediate child has been reaped. Must be called from
/// a single-threaded process: the intermediate child runs ordinary Rust
/// code between fork and exit.
pub fn launch_detached(spec: &CommandSpec) -> Result<(), LaunchError> {
    // Everything the child needs is prepared before forking
    let mut command = spec.to_command();

    // SAFETY: the caller runs single-threaded, so no lock can be held by a
    // thread that does not exist in the child. The child never returns into
    // the caller's code: it spawns and leaves through `_exit`.
    match unsafe { fork() } {
        Err(errno) => Err(LaunchError::Fork(errno)),
        Ok(ForkResult::Child) => {
            let code = match command.spawn() {
                // Dropping the handle does not wait; the grandchild is orphaned
                Ok(_grandchild) => 0,
                Err(e) => {
                    let _ = writeln!(
                        io::stderr(),
                        "padmacro: {}: {}",
                        spec.path.display(),
                        e
                    );
                    failure_exit_code(&e)
                }
            };
            // SAFETY: `_exit` skips atexit handlers and stdio flushing, both
            // of which belong to the parent.
            unsafe { libc::_exit(code) }
        }
        Ok(ForkResult::Parent { child }) => {
            let status = loop {
                match waitpid(child, None) {
                    Err(Errno::EINTR) => continue,
                    other => break other,
                }
            };
            match status {
                Ok(WaitStatus::Exited(_, 0)) => {
                    log::trace!("Launcher process {} reaped", child);
                    Ok(())
                }
                Ok(WaitStatus::Exited(_, code)) => Err(LaunchError::Spawn {
                    path: spec.path.clone(),
                    source: error_from_exit_code(code),
                }),
                Ok(other) => Err(LaunchError::Abnormal(format!("{:?}", other))),
                Err(errno) => Err(LaunchError::Wait(errno)),
            }
        }
    }
}

/// Encode a spawn failure as an exit code, preserving the errno when it fits
fn failure_exit_code(err: &io::Error) -> i32 {
    match err.raw_os_error() {
        Some(errno) if (1..EXIT_UNKNOWN_FAILURE).contains(&errno) => errno,
        _ => EXIT_UNKNOWN_FAILURE,
    }
}

fn error_from_exit_code(code: i32) -> io::Error {
    if (1..EXIT_UNKNOWN_FAILURE).contains(&code) {
        io::Error::from_raw_os_error(code)
    } else {
        io::Error::other(format!("launcher exited with status {}", code))
    }
}

/// Checks that the executable path is absolute and points at something
/// that looks runnable. Used when validating configuration.
pub fn check_executable(path: &Path) -> Result<(), String> {
    if path.as_os_str().is_empty() {
        return Err("executable path is empty".to_string());
    }
    if !path.is_absolute() {
        return Err(format!("executable path {:?} is not absolute", path));
    }
    if path.as_os_str().as_bytes().contains(&0) {
        return Err(format!("executable path {:?} contains a NUL byte", path));
    }
    Ok(())
}

/// True if the path exists and has an execute bit set
pub fn is_executable(path: impl AsRef<OsStr>) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(Path::new(path.as_ref()))
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}
