//! Exclusive lock on a cgroup subsystem directory.
//!
//! Two supervisors sharing a `--cgname` must not configure or tear down
//! the same control group concurrently. An exclusive `flock(2)` on the
//! group's directory serializes them; the kernel drops the lock when the
//! holder exits, so a crashed supervisor can never wedge the name.

use crate::error::{LrunError, Result};
use std::fs::File;
use std::os::unix::io::AsRawFd;
use std::path::Path;

pub struct CgroupLock {
    file: File,
}

impl CgroupLock {
    /// Block until the directory lock is held.
    pub fn acquire(dir: &Path) -> Result<Self> {
        let file = File::open(dir).map_err(|e| {
            LrunError::Lock(format!("can not open {} for locking: {}", dir.display(), e))
        })?;

        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX) };
        if rc != 0 {
            return Err(LrunError::Lock(format!(
                "flock on {} failed: {}",
                dir.display(),
                std::io::Error::last_os_error()
            )));
        }

        Ok(Self { file })
    }
}

impl Drop for CgroupLock {
    fn drop(&mut self) {
        let _ = unsafe { libc::flock(self.file.as_raw_fd(), libc::LOCK_UN) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_is_exclusive_until_dropped() {
        let dir = std::env::temp_dir();

        let first = CgroupLock::acquire(&dir).unwrap();

        // A second non-blocking attempt on the same directory must fail
        // while the guard is alive.
        let probe = File::open(&dir).unwrap();
        let rc = unsafe { libc::flock(probe.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        assert_eq!(rc, -1);

        drop(first);
        let rc = unsafe { libc::flock(probe.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        assert_eq!(rc, 0);
        unsafe { libc::flock(probe.as_raw_fd(), libc::LOCK_UN) };
    }
}
