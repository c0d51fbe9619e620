//! Watchdog — restart the monitor if it is no longer running.
//!
//! Meant to be run from cron. Liveness is judged by the instance lock: if
//! nobody holds it, the monitor has died and a detached
//! `checknetd run --daemon` is spawned in its place.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::{info, warn};

use crate::lock::{read_pid, InstanceLock, LockError};

#[derive(Debug, thiserror::Error)]
pub enum WatchdogError {
    #[error(transparent)]
    Lock(#[from] LockError),

    #[error("failed to restart monitor: {0}")]
    Spawn(#[source] std::io::Error),
}

/// What the watchdog found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogOutcome {
    Alive { pid: Option<u32> },
    Restarted { pid: u32 },
}

/// Arguments forwarded to the restarted monitor.
#[derive(Debug, Clone, Default)]
pub struct RestartArgs {
    pub config: Option<PathBuf>,
    pub log_file: Option<PathBuf>,
    pub verbosity: u8,
}

impl RestartArgs {
    /// Command line for `checknetd run --daemon` with these settings.
    pub fn to_args(&self, lock_file: &Path) -> Vec<String> {
        let mut args = Vec::new();
        if self.verbosity > 0 {
            args.push(format!("-{}", "v".repeat(self.verbosity as usize)));
        }
        if let Some(config) = &self.config {
            args.push("--config".to_string());
            args.push(config.display().to_string());
        }
        if let Some(log_file) = &self.log_file {
            args.push("--log-file".to_string());
            args.push(log_file.display().to_string());
        }
        args.push("run".to_string());
        args.push("--daemon".to_string());
        args.push("--lock-file".to_string());
        args.push(lock_file.display().to_string());
        args
    }
}

/// Report the running monitor, or spawn a detached replacement when nobody
/// holds `lock_file`.
pub fn check(lock_file: &Path, restart: &RestartArgs) -> Result<WatchdogOutcome, WatchdogError> {
    if InstanceLock::is_held(lock_file)? {
        let pid = read_pid(lock_file);
        info!(?pid, "monitor is running");
        return Ok(WatchdogOutcome::Alive { pid });
    }

    warn!(path = %lock_file.display(), "monitor is not running, restarting it");
    let exe = std::env::current_exe().map_err(WatchdogError::Spawn)?;
    let child = Command::new(exe)
        .args(restart.to_args(lock_file))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(WatchdogError::Spawn)?;

    info!(pid = child.id(), "monitor restarted");
    Ok(WatchdogOutcome::Restarted { pid: child.id() })
}
