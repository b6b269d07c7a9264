//! POSIX `fcntl`-based byte-range locking and permission widening.

use std::fs::File;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::io::AsRawFd;
use std::path::Path;

/// Attempts a non-blocking, exclusive, advisory byte-range lock via
/// `fcntl(F_SETLK)`.
///
/// Returns `Ok(true)` if the lock was acquired, `Ok(false)` if another
/// process already holds it (`EACCES`/`EAGAIN`), and `Err` for any other
/// I/O failure.
pub(crate) fn try_lock_region(file: &File, offset: i64, len: i64) -> io::Result<bool> {
    let mut flock: libc::flock = unsafe { std::mem::zeroed() };
    flock.l_type = libc::F_WRLCK as libc::c_short;
    flock.l_whence = libc::SEEK_SET as libc::c_short;
    flock.l_start = offset;
    flock.l_len = len;

    // SAFETY: `file` owns a valid, open file descriptor for the duration of
    // this call; `F_SETLK` only inspects/mutates the `flock` struct we just
    // initialized and the kernel's own lock table for this fd.
    let rc = unsafe { libc::fcntl(file.as_raw_fd(), libc::F_SETLK, &flock) };
    if rc == 0 {
        Ok(true)
    } else {
        match io::Error::last_os_error().raw_os_error() {
            Some(libc::EACCES) | Some(libc::EAGAIN) => Ok(false),
            _ => Err(io::Error::last_os_error()),
        }
    }
}

/// Releases a previously acquired byte-range lock.
pub(crate) fn unlock_region(file: &File, offset: i64, len: i64) -> io::Result<()> {
    let mut flock: libc::flock = unsafe { std::mem::zeroed() };
    flock.l_type = libc::F_UNLCK as libc::c_short;
    flock.l_whence = libc::SEEK_SET as libc::c_short;
    flock.l_start = offset;
    flock.l_len = len;

    // SAFETY: same contract as `try_lock_region`; `F_UNLCK` releases the
    // region this process previously locked and is a no-op if it did not.
    let rc = unsafe { libc::fcntl(file.as_raw_fd(), libc::F_SETLK, &flock) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// Widens a path's permission bits so the file/directory is readable and
/// writable by all local users, mirroring the owner's own bits onto the
/// "other" class. Best-effort: failures are the caller's to log and ignore.
pub(crate) fn widen_permissions(path: &Path) -> io::Result<()> {
    let metadata = std::fs::metadata(path)?;
    let mut perms = metadata.permissions();
    let mode = perms.mode();

    // Copy owner rwx bits down into the "other" class, same as the
    // reference implementation's permission-widening step.
    let owner_bits = (mode >> 6) & 0o7;
    let widened = mode | owner_bits | (owner_bits << 3);
    perms.set_mode(widened);
    std::fs::set_permissions(path, perms)
}
