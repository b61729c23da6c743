//! On-disk state of a running relay.
//!
//! Everything lives under one directory (`$XDG_STATE_HOME/chat-relay` or
//! `/tmp/chat-relay`): the PID file that `stop` and `status` read, and the
//! log that a daemonized relay writes its stdout and stderr to.

use std::fs;
use std::path::{Path, PathBuf};
use std::process;

use anyhow::{bail, Context, Result};
use tracing::debug;

const DIR_NAME: &str = "chat-relay";
const PID_FILE: &str = "relayd.pid";
const DAEMON_LOG: &str = "relayd.log";

/// Directory holding the relay's PID file and daemon log.
#[derive(Debug, Clone)]
pub struct StateDir {
    root: PathBuf,
}

impl StateDir {
    /// The per-user state directory, falling back to `/tmp`.
    pub fn locate() -> Self {
        let base = dirs::state_dir().unwrap_or_else(|| PathBuf::from("/tmp"));
        Self::at(base.join(DIR_NAME))
    }

    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Creates the directory if needed.
    pub fn ensure(&self) -> Result<&Path> {
        fs::create_dir_all(&self.root)
            .with_context(|| format!("Failed to create {}", self.root.display()))?;
        Ok(&self.root)
    }

    pub fn pid_file(&self) -> PidFile {
        PidFile {
            path: self.root.join(PID_FILE),
        }
    }

    pub fn daemon_log(&self) -> PathBuf {
        self.root.join(DAEMON_LOG)
    }
}

/// PID file of the relay process.
#[derive(Debug, Clone)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records the current process as the running relay.
    pub fn claim(&self) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            StateDir::at(dir).ensure()?;
        }
        fs::write(&self.path, process::id().to_string())
            .with_context(|| format!("Failed to write {}", self.path.display()))
    }

    pub fn release(&self) {
        if let Err(e) = fs::remove_file(&self.path) {
            debug!(path = %self.path.display(), error = %e, "PID file not removed");
        }
    }

    /// PID of the live relay, if any. A PID file naming a dead process is
    /// cleared.
    pub fn live_pid(&self) -> Option<u32> {
        let pid = fs::read_to_string(&self.path).ok()?.trim().parse().ok()?;
        if process_alive(pid) {
            return Some(pid);
        }
        self.release();
        None
    }
}

/// Whether a process with `pid` exists.
pub fn process_alive(pid: u32) -> bool {
    #[cfg(unix)]
    {
        let Ok(pid) = libc::pid_t::try_from(pid) else {
            return false;
        };
        // Signal 0 checks for existence; EPERM still means it exists.
        let result = unsafe { libc::kill(pid, 0) };
        result == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
        false
    }
}

/// Asks the relay with `pid` to shut down gracefully.
pub fn request_stop(pid: u32) -> Result<()> {
    #[cfg(unix)]
    {
        let target = libc::pid_t::try_from(pid).context("PID out of range")?;
        if unsafe { libc::kill(target, libc::SIGTERM) } != 0 {
            bail!(
                "Failed to signal relay (PID {pid}): {}",
                std::io::Error::last_os_error()
            );
        }
        Ok(())
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
        bail!("Stopping the relay is only supported on Unix systems");
    }
}
