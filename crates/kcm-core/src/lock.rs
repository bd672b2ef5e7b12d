//! Single-writer advisory lock shared by every invocation on one data root.
//!
//! Exclusion comes from `flock(2)` on the lock file, so the kernel releases
//! the lock when its holder exits, however it exits. The file itself is never
//! removed: unlinking a locked file would let a later invocation lock a fresh
//! inode while an earlier one still waits on the old one. The holder's pid is
//! written into the file for diagnostics only.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use thiserror::Error;
use tracing::debug;

const LOCK_TARGET: &str = "kcm::lock";

/// Held lock; dropping it releases the `flock`.
pub struct WriterLock {
    path: PathBuf,
    _file: Flock<File>,
}

impl WriterLock {
    /// Acquires the lock at `path` without blocking.
    ///
    /// A lock file left behind by an exited holder carries no lock and is
    /// simply reused.
    pub fn acquire(path: &Path) -> Result<Self, LockError> {
        let io_error = |source| LockError::Io {
            path: path.to_path_buf(),
            source,
        };
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .mode(0o600)
            .open(path)
            .map_err(io_error)?;
        let mut locked = match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(locked) => locked,
            Err((_, Errno::EAGAIN)) => {
                return Err(LockError::Held {
                    pid: read_pid(path),
                });
            }
            Err((_, source)) => {
                return Err(LockError::Lock {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        locked.set_len(0).map_err(io_error)?;
        writeln!(locked, "{}", std::process::id()).map_err(io_error)?;
        locked.sync_all().map_err(io_error)?;
        debug!(target: LOCK_TARGET, file = %path.display(), "lock acquired");
        Ok(Self {
            path: path.to_path_buf(),
            _file: locked,
        })
    }

    /// Location of the lock file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl fmt::Debug for WriterLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriterLock")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl Drop for WriterLock {
    fn drop(&mut self) {
        debug!(target: LOCK_TARGET, file = %self.path.display(), "lock released");
    }
}

/// Pid recorded by the current holder, if it has written one yet.
fn read_pid(path: &Path) -> Option<u32> {
    let content = fs::read_to_string(path).ok()?;
    content.trim().parse::<u32>().ok().filter(|pid| *pid != 0)
}

fn describe_holder(pid: Option<&u32>) -> String {
    pid.map(|pid| format!(" (pid {pid})")).unwrap_or_default()
}

/// Errors raised while acquiring the writer lock.
#[derive(Debug, Error)]
pub enum LockError {
    /// Another live invocation holds the lock.
    #[error(
        "another kcm invocation{} is modifying state; try again later",
        describe_holder(.pid.as_ref())
    )]
    Held {
        /// Pid recorded in the lock file, when readable.
        pid: Option<u32>,
    },
    /// `flock(2)` failed for a reason other than contention.
    #[error("failed to lock '{path}': {source}")]
    Lock {
        /// Lock file path.
        path: PathBuf,
        /// Errno reported by `flock(2)`.
        #[source]
        source: Errno,
    },
    /// The lock file could not be opened or written.
    #[error("lock file '{path}': {source}")]
    Io {
        /// Lock file path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}
