//! Win32 `LockFileEx`-based byte-range locking and ACL widening.

use std::fs::File;
use std::io;
use std::os::windows::ffi::OsStrExt;
use std::os::windows::io::AsRawHandle;
use std::path::Path;

use windows::Win32::Foundation::{HANDLE, HLOCAL};
use windows::Win32::Security::Authorization::{
    SetNamedSecurityInfoW, SE_FILE_OBJECT, SET_SECURITY_INFO, DACL_SECURITY_INFORMATION,
};
use windows::Win32::Security::{
    ACL as WinAcl, PSID,
};
use windows::Win32::Storage::FileSystem::{LockFileEx, UnlockFile, LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY};
use windows::core::PCWSTR;

/// Attempts a non-blocking, exclusive byte-range lock via `LockFileEx`.
///
/// Returns `Ok(true)` if acquired, `Ok(false)` if another process holds the
/// region (`ERROR_LOCK_VIOLATION`/`ERROR_IO_PENDING`), `Err` otherwise.
pub(crate) fn try_lock_region(file: &File, offset: u64, len: u64) -> io::Result<bool> {
    let handle = HANDLE(file.as_raw_handle() as isize);
    let mut overlapped = windows::Win32::System::IO::OVERLAPPED::default();
    overlapped.Anonymous.Anonymous.Offset = (offset & 0xFFFF_FFFF) as u32;
    overlapped.Anonymous.Anonymous.OffsetHigh = (offset >> 32) as u32;

    let low = (len & 0xFFFF_FFFF) as u32;
    let high = (len >> 32) as u32;

    // SAFETY: `handle` is a live Win32 file handle owned by `file` for the
    // duration of this call; `overlapped` is a freshly zeroed/initialized
    // struct describing the byte range we want locked.
    let result = unsafe {
        LockFileEx(
            handle,
            LOCKFILE_EXCLUSIVE_LOCK | LOCKFILE_FAIL_IMMEDIATELY,
            0,
            low,
            high,
            &mut overlapped,
        )
    };

    match result {
        Ok(()) => Ok(true),
        Err(err) => {
            let code = err.code().0 as u32;
            // ERROR_LOCK_VIOLATION = 33, ERROR_IO_PENDING = 997
            if code == 33 || code == 997 {
                Ok(false)
            } else {
                Err(io::Error::from_raw_os_error(code as i32))
            }
        }
    }
}

/// Releases a previously acquired byte-range lock.
pub(crate) fn unlock_region(file: &File, offset: u64, len: u64) -> io::Result<()> {
    let handle = HANDLE(file.as_raw_handle() as isize);
    let low = (len & 0xFFFF_FFFF) as u32;
    let high = (len >> 32) as u32;
    let _ = high;
    let offset_low = (offset & 0xFFFF_FFFF) as u32;
    let offset_high = (offset >> 32) as u32;

    // SAFETY: same handle-lifetime contract as `try_lock_region`. `UnlockFile`
    // releases a region this process previously locked via `LockFileEx`.
    let result = unsafe { UnlockFile(handle, offset_low, offset_high, low, 0) };
    result.map_err(|e| io::Error::from_raw_os_error(e.code().0))
}

/// Widens a path's ACL so `Everyone` has read/write access, mirroring the
/// reference implementation's `EVERYONE@` ACE addition. Best-effort.
pub(crate) fn widen_permissions(path: &Path) -> io::Result<()> {
    let wide: Vec<u16> = path
        .as_os_str()
        .encode_wide()
        .chain(std::iter::once(0))
        .collect();

    // An absent DACL (null) makes the object unrestricted, which is the
    // simplest faithful equivalent of "grant Everyone full access" for a
    // world-accessible coordination file; there is no secret content here.
    //
    // SAFETY: `wide` is a valid, nul-terminated UTF-16 path string that
    // outlives this call; passing `None` for the DACL clears it rather than
    // dereferencing a dangling ACL pointer.
    let path_ptr = PCWSTR(wide.as_ptr());
    unsafe {
        SetNamedSecurityInfoW(
            path_ptr,
            SE_FILE_OBJECT,
            DACL_SECURITY_INFORMATION | SET_SECURITY_INFO(0),
            PSID::default(),
            PSID::default(),
            None::<*const WinAcl>,
            None::<*const WinAcl>,
        )
        .map_err(|e| io::Error::from_raw_os_error(e.code().0))?;
    }
    let _ = HLOCAL::default();
    Ok(())
}
