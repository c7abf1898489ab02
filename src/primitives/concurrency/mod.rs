#![allow(unsafe_code)]

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::types::{KeelError, Result};

/// Exclusive advisory lock on a database's `.lock` file.
///
/// Held for as long as a database is open so a second process can neither
/// open nor drop it. The lock is released when this value is dropped.
///
/// On unix this is an `flock`. Elsewhere it only excludes other holders in
/// the same process.
pub struct ProcessLock {
    file: File,
    path: PathBuf,
}

impl ProcessLock {
    /// Takes the lock without blocking; fails with [`KeelError::AlreadyLocked`] if it is held.
    pub fn acquire(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        if !try_lock_exclusive(&file, &path)? {
            return Err(KeelError::AlreadyLocked(path));
        }
        debug!(path = %path.display(), "process_lock.acquired");
        Ok(Self { file, path })
    }

    /// Path of the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ProcessLock {
    fn drop(&mut self) {
        if let Err(err) = unlock(&self.file, &self.path) {
            debug!(path = %self.path.display(), %err, "process_lock.unlock failed");
        }
    }
}

#[cfg(unix)]
fn try_lock_exclusive(file: &File, _path: &Path) -> io::Result<bool> {
    use std::os::unix::io::AsRawFd;
    loop {
        let res = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if res == 0 {
            return Ok(true);
        }
        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            Some(libc::EINTR) => continue,
            Some(libc::EWOULDBLOCK) => return Ok(false),
            _ => return Err(err),
        }
    }
}

#[cfg(unix)]
fn unlock(file: &File, _path: &Path) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;
    let res = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_UN) };
    if res == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// Canonical paths of the lock files held by this process.
#[cfg(not(unix))]
static HELD: parking_lot::Mutex<Vec<PathBuf>> = parking_lot::const_mutex(Vec::new());

#[cfg(not(unix))]
fn try_lock_exclusive(_file: &File, path: &Path) -> io::Result<bool> {
    let key = path.canonicalize()?;
    let mut held = HELD.lock();
    if held.contains(&key) {
        return Ok(false);
    }
    held.push(key);
    Ok(true)
}

#[cfg(not(unix))]
fn unlock(_file: &File, path: &Path) -> io::Result<()> {
    let key = path.canonicalize()?;
    HELD.lock().retain(|held| *held != key);
    Ok(())
}
