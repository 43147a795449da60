//! Advisory locking for a database directory.
//!
//! The system this crate descends from used a single global lock file
//! (`/tmp/vex.lock`) shared by every database on the machine — harmless with
//! one database, a real bug with several, since a writer on database A would
//! block a reader on unrelated database B. This crate instead locks a file
//! inside each database directory, so concurrency is scoped per-database.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fd_lock::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{new_error, ErrorKind, Result};

const LOCK_FILE_NAME: &str = "vexdb.lock";

fn open_lock_file(dir: &Path) -> Result<(PathBuf, Box<RwLock<File>>)> {
    let path = dir.join(LOCK_FILE_NAME);
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .open(&path)?;
    Ok((path, Box::new(RwLock::new(file))))
}

/// An exclusive lock on a database directory, held for the lifetime of a
/// write transaction: at most one writer, exclusive against both other
/// writers and readers.
pub struct WriteLock {
    _guard: RwLockWriteGuard<'static, File>,
    // Keeps the RwLock (and its File) alive as long as the guard borrows it.
    _lock: Box<RwLock<File>>,
    path: PathBuf,
}

impl WriteLock {
    /// Acquire an exclusive lock on `dir`'s lock file, creating it if
    /// necessary. Fails with `LockFailure` if another writer or reader
    /// holds it.
    pub fn acquire(dir: &Path) -> Result<WriteLock> {
        let (path, mut lock) = open_lock_file(dir)?;
        // SAFETY: `lock` is boxed and moved into the returned `WriteLock`
        // alongside the guard that borrows it, so the borrow stays valid for
        // as long as both fields are alive.
        let lock_ref: &'static mut RwLock<File> =
            unsafe { &mut *(lock.as_mut() as *mut RwLock<File>) };
        let guard = lock_ref.try_write().map_err(|_| {
            new_error(ErrorKind::LockFailure {
                path: path.clone(),
            })
        })?;

        Ok(WriteLock {
            _guard: guard,
            _lock: lock,
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// A shared lock on a database directory, held for the lifetime of a read
/// transaction. Any number of readers may hold this concurrently; it is
/// exclusive against a [`WriteLock`].
pub struct ReadLock {
    _guard: RwLockReadGuard<'static, File>,
    _lock: Box<RwLock<File>>,
    path: PathBuf,
}

impl ReadLock {
    /// Acquire a shared lock on `dir`'s lock file, creating it if
    /// necessary. Fails with `LockFailure` if a writer currently holds it.
    pub fn acquire(dir: &Path) -> Result<ReadLock> {
        let (path, mut lock) = open_lock_file(dir)?;
        let lock_ref: &'static mut RwLock<File> =
            unsafe { &mut *(lock.as_mut() as *mut RwLock<File>) };
        let guard = lock_ref.try_read().map_err(|_| {
            new_error(ErrorKind::LockFailure {
                path: path.clone(),
            })
        })?;

        Ok(ReadLock {
            _guard: guard,
            _lock: lock,
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
