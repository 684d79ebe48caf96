//! # Directory Lock
//!
//! Creating a table file is a two step operation (create, then write the
//! header and the initial free chain). Two processes opening the same table
//! for the first time could both see "file missing" and both initialize it.
//! `DirLock` holds an exclusive `flock()` on `<dir>/global.lock` while the
//! exists-check and the initialization run.
//!
//! The lock is released when the guard is dropped. It only orders the first
//! open of a file; no other cross-process ordering is provided.

use std::fs::{self, File, OpenOptions};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use eyre::{bail, Result};

use crate::config::LOCK_FILE_NAME;
use crate::error::StorageError;

#[derive(Debug)]
pub struct DirLock {
    file: File,
    path: PathBuf,
}

impl DirLock {
    /// Blocks until the exclusive lock of `dir` is acquired. The directory is
    /// created if it does not exist yet.
    pub fn acquire(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir).map_err(|e| StorageError::io("create_dir", dir, e))?;

        let path = dir.join(LOCK_FILE_NAME);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| StorageError::io("open", &path, e))?;

        // SAFETY: flock only reads the descriptor number; `file` stays open
        // for the whole call and for the lifetime of the guard.
        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX) };
        if rc != 0 {
            bail!(StorageError::io("flock", &path, std::io::Error::last_os_error()));
        }

        tracing::trace!(path = %path.display(), "directory lock acquired");

        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        // SAFETY: the descriptor is still owned by `self.file`. Closing the
        // file would release the lock as well; unlocking first makes the
        // release point explicit.
        unsafe {
            libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
        }
        tracing::trace!(path = %self.path.display(), "directory lock released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;
    use tempfile::tempdir;

    #[test]
    fn acquire_creates_directory_and_lock_file() {
        let dir = tempdir().unwrap();
        let table_dir = dir.path().join("users");

        let lock = DirLock::acquire(&table_dir).unwrap();

        assert!(table_dir.is_dir());
        assert_eq!(lock.path(), table_dir.join(LOCK_FILE_NAME));
        assert!(lock.path().exists());
    }

    #[test]
    fn second_acquire_waits_for_release() {
        let dir = tempdir().unwrap();
        let path = dir.path().to_path_buf();
        let released = Arc::new(AtomicBool::new(false));

        let lock = DirLock::acquire(&path).unwrap();

        let waiter = {
            let path = path.clone();
            let released = Arc::clone(&released);
            thread::spawn(move || {
                let _lock = DirLock::acquire(&path).unwrap();
                released.load(Ordering::SeqCst)
            })
        };

        thread::sleep(Duration::from_millis(50));
        released.store(true, Ordering::SeqCst);
        drop(lock);

        assert!(waiter.join().unwrap());
    }
}
