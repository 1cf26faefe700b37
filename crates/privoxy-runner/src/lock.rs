use std::fs::{File, OpenOptions};
use std::path::Path;

use crate::error::{Error, Result};

/// Exclusive advisory lock held for the lifetime of one wrapper run.
/// Released on drop (or when the process exits).
#[derive(Debug)]
pub struct RunLock {
    _file: File,
}

impl RunLock {
    /// `Ok(None)` when another process holds the lock.
    pub fn try_acquire(path: &Path) -> Result<Option<Self>> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)
            .map_err(|e| Error::msg(format!("failed to open lock {}: {e}", path.display())))?;

        if !try_lock_exclusive(&file)? {
            return Ok(None);
        }
        tracing::debug!("holding run lock {}", path.display());
        Ok(Some(Self { _file: file }))
    }
}

#[cfg(unix)]
fn try_lock_exclusive(file: &File) -> Result<bool> {
    use std::os::unix::io::AsRawFd;

    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if rc == 0 {
        return Ok(true);
    }
    let err = std::io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::EWOULDBLOCK) {
        return Ok(false);
    }
    Err(Error::msg(format!("flock failed: {err}")))
}

#[cfg(not(unix))]
fn try_lock_exclusive(_file: &File) -> Result<bool> {
    Ok(true)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn second_holder_is_refused_until_release() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("run.lock");

        let first = RunLock::try_acquire(&path).expect("lock").expect("acquired");
        assert!(RunLock::try_acquire(&path).expect("lock").is_none());
        drop(first);
        assert!(RunLock::try_acquire(&path).expect("lock").is_some());
    }
}
