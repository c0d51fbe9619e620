//! Single-instance guard.
//!
//! The monitor holds an exclusive, non-blocking `flock` on a well-known
//! file for its whole lifetime and writes its PID into it. A second
//! instance fails fast instead of waiting.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum LockError {
    #[error("another instance already holds {path} (pid {pid:?})")]
    AlreadyRunning { path: PathBuf, pid: Option<u32> },

    #[error("cannot use lock file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Exclusive lock on the instance file. Released on drop.
#[derive(Debug)]
pub struct InstanceLock {
    file: File,
    path: PathBuf,
}

impl InstanceLock {
    /// Take the lock without blocking and record our PID in the file.
    pub fn acquire(path: &Path) -> Result<Self, LockError> {
        let io_err = |source| LockError::Io {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(io_err)?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .mode(0o600)
            .open(path)
            .map_err(io_err)?;

        let ret = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if ret != 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::WouldBlock {
                return Err(LockError::AlreadyRunning {
                    path: path.to_path_buf(),
                    pid: read_pid(path),
                });
            }
            return Err(io_err(err));
        }

        let pid = std::process::id();
        file.set_len(0).map_err(io_err)?;
        file.seek(SeekFrom::Start(0)).map_err(io_err)?;
        write!(file, "{pid}").map_err(io_err)?;
        file.flush().map_err(io_err)?;

        info!(path = %path.display(), pid, "process locked to file");
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Whether some other process currently holds the lock.
    ///
    /// Read-only: the file is neither created nor rewritten, so the PID of
    /// a dead monitor stays in place. A missing file means nobody holds it.
    pub fn is_held(path: &Path) -> Result<bool, LockError> {
        let io_err = |source| LockError::Io {
            path: path.to_path_buf(),
            source,
        };

        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(io_err(e)),
        };

        let ret = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if ret != 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::WouldBlock {
                return Ok(true);
            }
            return Err(io_err(err));
        }
        unsafe {
            libc::flock(file.as_raw_fd(), libc::LOCK_UN);
        }
        Ok(false)
    }

    /// Location of the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        unsafe {
            libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
        }
        debug!(path = %self.path.display(), "instance lock released");
    }
}

/// PID recorded in the lock file, if any.
pub fn read_pid(path: &Path) -> Option<u32> {
    let mut content = String::new();
    File::open(path).ok()?.read_to_string(&mut content).ok()?;
    content.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_writes_pid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checknet.lock");

        let lock = InstanceLock::acquire(&path).unwrap();
        assert_eq!(lock.path(), path);
        assert_eq!(read_pid(&path), Some(std::process::id()));
    }

    #[test]
    fn second_acquire_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checknet.lock");

        let _held = InstanceLock::acquire(&path).unwrap();
        match InstanceLock::acquire(&path) {
            Err(LockError::AlreadyRunning { pid, .. }) => {
                assert_eq!(pid, Some(std::process::id()));
            }
            other => panic!("expected AlreadyRunning, got {other:?}"),
        }
        assert!(InstanceLock::is_held(&path).unwrap());
    }

    #[test]
    fn lock_released_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checknet.lock");

        drop(InstanceLock::acquire(&path).unwrap());
        assert!(!InstanceLock::is_held(&path).unwrap());
        assert!(InstanceLock::acquire(&path).is_ok());
    }

    #[test]
    fn creates_missing_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/run/checknet.lock");
        assert!(InstanceLock::acquire(&path).is_ok());
    }

    #[test]
    fn unusable_path_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        // A directory cannot be opened as the lock file.
        let err = InstanceLock::acquire(dir.path()).unwrap_err();
        assert!(matches!(err, LockError::Io { .. }));
    }

    #[test]
    fn is_held_leaves_stale_file_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checknet.lock");
        std::fs::write(&path, "424242").unwrap();

        assert!(!InstanceLock::is_held(&path).unwrap());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "424242");
        assert_eq!(read_pid(&path), Some(424242));
    }

    #[test]
    fn is_held_does_not_create_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent/checknet.lock");

        assert!(!InstanceLock::is_held(&path).unwrap());
        assert!(!path.exists());
        assert!(!path.parent().unwrap().exists());
    }
}
