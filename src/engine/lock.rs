// src/engine/lock.rs

//! Exclusive lock for mutating runs
//!
//! Two convergence runs against the same machine would race on apt and
//! the group database, so a mutating run holds an advisory `flock` for its
//! whole duration. Check-mode runs and `verify` never take it; `verify`
//! only looks at it to warn that the system may be mid-change.
//!
//! The holder writes its PID into the lock file so a blocked caller can
//! say who is in the way.
//!
//! # Example
//!
//! ```ignore
//! use converge::engine::RunLock;
//!
//! let lock = RunLock::try_acquire("/run/converge.lock")?;
//! // ... converge ...
//! // Lock released on drop
//! ```

use crate::error::{Error, Result};
use crate::plan::Plan;
use fs2::FileExt;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// The process currently holding a run lock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockHolder {
    /// PID recorded in the lock file, if it could be read
    pub pid: Option<u32>,
}

impl fmt::Display for LockHolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.pid {
            Some(pid) => write!(f, "pid {}", pid),
            None => write!(f, "unknown process"),
        }
    }
}

/// Held for the duration of a mutating run
pub struct RunLock {
    file: File,
    path: PathBuf,
}

impl RunLock {
    /// Lock path used when neither the plan nor the command line sets one
    pub const DEFAULT_PATH: &'static str = "/run/converge.lock";

    /// Lock path for `plan`: the explicit path if given, then the plan's
    /// `lock_path` setting, then [`RunLock::DEFAULT_PATH`]
    pub fn path_for(explicit: Option<&Path>, plan: &Plan) -> PathBuf {
        explicit
            .map(Path::to_path_buf)
            .or_else(|| plan.settings.lock_path.clone())
            .unwrap_or_else(|| PathBuf::from(Self::DEFAULT_PATH))
    }

    /// Take the lock or fail immediately with `Error::Locked`
    pub fn try_acquire<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        // Never truncate before the lock is ours; the holder's PID lives here
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => {
                file.set_len(0)?;
                file.seek(SeekFrom::Start(0))?;
                write!(file, "{}", std::process::id())?;
                file.flush()?;
                info!("Acquired run lock at {}", path.display());
                Ok(Self { file, path })
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                let holder = LockHolder {
                    pid: read_pid(&mut file),
                };
                debug!("Run lock at {} held by {}", path.display(), holder);
                Err(Error::Locked(format!("{} ({})", path.display(), holder)))
            }
            Err(e) => Err(Error::IoError(format!(
                "Failed to lock {}: {}",
                path.display(),
                e
            ))),
        }
    }

    /// The process holding the lock at `path`, or `None` when no mutating
    /// run is in progress
    pub fn current_holder<P: AsRef<Path>>(path: P) -> Option<LockHolder> {
        let mut file = File::open(path.as_ref()).ok()?;

        match FileExt::try_lock_shared(&file) {
            Ok(()) => {
                let _ = FileExt::unlock(&file);
                None
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Some(LockHolder {
                pid: read_pid(&mut file),
            }),
            Err(_) => None,
        }
    }
}

fn read_pid(file: &mut File) -> Option<u32> {
    let mut content = String::new();
    file.read_to_string(&mut content).ok()?;
    content.trim().parse().ok()
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = self.file.set_len(0);
        info!("Released run lock at {}", self.path.display());
    }
}
