//! Cross-process locker (C3): advisory, per-port byte-range locks against a
//! single shared file, used so two processes on the same host never settle
//! on the same port even though each is only using in-process bookkeeping
//! for its own reservations.
//!
//! The lock file is opened lazily on first use and closed again once every
//! lock this process holds against it has been released: the locker does
//! not keep the file open when it has nothing locked.
#![forbid(unsafe_code)]

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::sys;

/// A single port's byte offset into the shared lock file: one byte per port
/// number, so two processes locking different ports never contend on the
/// same region.
fn offset_for_port(port: u16) -> u64 {
    u64::from(port)
}

struct OpenFile {
    file: File,
    outstanding: u32,
}

/// Coordinates advisory, cross-process byte-range locks over a single
/// shared file.
///
/// Construction does not touch the filesystem; the file is opened on the
/// first [`CrossProcessLocker::try_lock`] call and closed again once
/// [`LockToken::release`] (or `Drop`) brings the outstanding count back to
/// zero.
pub struct CrossProcessLocker {
    path: PathBuf,
    state: Mutex<Option<OpenFile>>,
}

impl std::fmt::Debug for CrossProcessLocker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrossProcessLocker")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl CrossProcessLocker {
    /// Creates a locker bound to the shared lock file at `path`. The file
    /// must already exist (the bootstrap step, C6, is responsible for
    /// creating it with the right permissions).
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            state: Mutex::new(None),
        }
    }

    /// The shared lock file path this locker coordinates against.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Attempts to acquire an exclusive, advisory lock over `port`'s byte
    /// range in the shared file.
    ///
    /// Returns `Ok(Some(token))` if the lock was acquired, `Ok(None)` if
    /// another process already holds it, and `Err` for any other I/O
    /// failure (including failing to open the shared file at all).
    ///
    /// # Errors
    ///
    /// Returns an error if the shared lock file cannot be opened, or the
    /// underlying platform lock syscall fails for a reason other than "the
    /// region is already locked."
    ///
    /// Takes `self` as an `Arc` so the returned [`LockToken`] can outlive any
    /// particular borrow of the locker (the engine holds tokens in its own
    /// state alongside the locker itself).
    pub fn try_lock(self: &Arc<Self>, port: u16) -> io::Result<Option<LockToken>> {
        let mut guard = self.state.lock().unwrap_or_else(|poison| poison.into_inner());

        if guard.is_none() {
            let file = OpenOptions::new().read(true).write(true).open(&self.path)?;
            *guard = Some(OpenFile {
                file,
                outstanding: 0,
            });
        }

        let open = guard.as_mut().expect("just initialized above");
        let offset = offset_for_port(port);
        let acquired = lock_region(&open.file, offset)?;
        if !acquired {
            if open.outstanding == 0 {
                *guard = None;
            }
            return Ok(None);
        }
        open.outstanding += 1;
        drop(guard);

        Ok(Some(LockToken {
            locker: Arc::clone(self),
            port,
        }))
    }

    fn release(&self, port: u16) {
        let mut guard = self.state.lock().unwrap_or_else(|poison| poison.into_inner());
        let Some(open) = guard.as_mut() else { return };
        let offset = offset_for_port(port);
        let _ = unlock_region(&open.file, offset);
        open.outstanding = open.outstanding.saturating_sub(1);
        if open.outstanding == 0 {
            // Drop the `File`, closing the descriptor, so the locker holds
            // nothing open while idle.
            *guard = None;
        }
    }
}

#[cfg(unix)]
fn lock_region(file: &File, offset: u64) -> io::Result<bool> {
    sys::try_lock_region(file, offset as i64, 1)
}

#[cfg(unix)]
fn unlock_region(file: &File, offset: u64) -> io::Result<()> {
    sys::unlock_region(file, offset as i64, 1)
}

#[cfg(windows)]
fn lock_region(file: &File, offset: u64) -> io::Result<bool> {
    sys::try_lock_region(file, offset, 1)
}

#[cfg(windows)]
fn unlock_region(file: &File, offset: u64) -> io::Result<()> {
    sys::unlock_region(file, offset, 1)
}

/// A held cross-process lock on a single port. Releasing it (explicitly via
/// [`LockToken::release`] or implicitly on `Drop`) unlocks the byte range
/// and, if this was the last outstanding lock against the shared file,
/// closes the file handle.
#[must_use = "dropping this immediately releases the lock"]
pub struct LockToken {
    locker: Arc<CrossProcessLocker>,
    port: u16,
}

impl LockToken {
    /// The port this token holds a cross-process lock on.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Releases the lock. Equivalent to dropping the token, but explicit at
    /// call sites that want to make the moment of release visible.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for LockToken {
    fn drop(&mut self) {
        self.locker.release(self.port);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn make_lock_file() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("portLockFile");
        let mut file = File::create(&path).unwrap();
        file.write_all(&[0u8; 65536]).unwrap();
        (dir, path)
    }

    #[test]
    fn locking_same_port_twice_from_one_locker_conflicts_via_state() {
        let (_dir, path) = make_lock_file();
        let locker = Arc::new(CrossProcessLocker::new(path));
        let token = locker.try_lock(9000).unwrap();
        assert!(token.is_some());
    }

    #[test]
    fn releasing_a_lock_allows_reacquiring() {
        let (_dir, path) = make_lock_file();
        let locker = Arc::new(CrossProcessLocker::new(path));
        let token = locker.try_lock(9000).unwrap().unwrap();
        token.release();
        let token2 = locker.try_lock(9000);
        assert!(token2.is_ok());
    }

    #[test]
    fn distinct_ports_do_not_conflict() {
        let (_dir, path) = make_lock_file();
        let locker = Arc::new(CrossProcessLocker::new(path));
        let _a = locker.try_lock(9000).unwrap().unwrap();
        let b = locker.try_lock(9001).unwrap();
        assert!(b.is_some());
    }

    #[test]
    fn outstanding_count_tracks_multiple_live_tokens_on_one_locker() {
        let (_dir, path) = make_lock_file();
        let locker = Arc::new(CrossProcessLocker::new(path));
        let a = locker.try_lock(9500).unwrap().unwrap();
        let b = locker.try_lock(9501).unwrap().unwrap();
        drop(a);
        // The shared file must stay open (and usable) while `b` is still
        // outstanding.
        let c = locker.try_lock(9502).unwrap();
        assert!(c.is_some());
        drop(b);
    }
}
