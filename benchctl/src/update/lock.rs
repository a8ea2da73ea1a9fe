//! Bench-level lock preventing concurrent updates.
//!
//! A PID lock file under `config/pids/`. A lock left behind by a process
//! that is no longer running is treated as stale and replaced.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use sysinfo::{Pid, ProcessesToUpdate, System};
use tracing::{debug, warn};

use crate::errors::BenchError;

/// Held for the duration of an update run; removes the file on drop
#[derive(Debug)]
pub struct UpdateLock {
    path: PathBuf,
}

impl UpdateLock {
    pub fn acquire(path: &Path) -> Result<Self, BenchError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        // One retry after clearing a stale lock
        for _ in 0..2 {
            match OpenOptions::new().write(true).create_new(true).open(path) {
                Ok(mut file) => {
                    write!(file, "{}", std::process::id())?;
                    file.sync_all()?;
                    debug!(path = %path.display(), "Acquired update lock");
                    return Ok(Self {
                        path: path.to_path_buf(),
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => match Self::holder(path) {
                    Some(pid) if is_process_running(pid) => {
                        return Err(BenchError::LockHeld {
                            pid,
                            path: path.to_path_buf(),
                        });
                    }
                    stale => {
                        warn!(path = %path.display(), pid = ?stale, "Removing stale update lock");
                        match fs::remove_file(path) {
                            Ok(()) => {}
                            Err(e) if e.kind() == ErrorKind::NotFound => {}
                            Err(e) => return Err(e.into()),
                        }
                    }
                },
                Err(e) => return Err(e.into()),
            }
        }

        Err(BenchError::Internal(format!(
            "could not acquire update lock at {}",
            path.display()
        )))
    }

    /// PID recorded in an existing lock file
    pub fn holder(path: &Path) -> Option<u32> {
        fs::read_to_string(path).ok()?.trim().parse().ok()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for UpdateLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

fn is_process_running(pid: u32) -> bool {
    let pid = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    system.process(pid).is_some()
}
