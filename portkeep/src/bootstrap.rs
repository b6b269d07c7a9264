//! Shared lock-file bootstrap (C6): ensuring the lock file the cross-process
//! locker (C3) needs exists, with permissions wide enough that any local
//! user's process can take part in the coordination, before the engine ever
//! tries to open it.
//!
//! Failures here are logged and otherwise ignored: a missing or
//! under-permissioned lock file surfaces later as a clear I/O error from the
//! locker itself, which is simpler to diagnose than failing construction.
#![forbid(unsafe_code)]

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::logging::Logger;
use crate::sys;

/// The minimum size of a freshly created lock file: one byte per possible
/// port number, matching the locker's `offset_for_port` addressing.
const LOCK_FILE_LEN: u64 = 65536;

/// Resolves the directory every process on this host should use for
/// `portkeep`'s shared coordination files.
///
/// On Windows this is the machine-wide `CommonApplicationData` folder
/// (queried via PowerShell's `[environment]::getfolderpath`, since that is
/// the one reliably available mechanism without adding a Win32 SHGetFolderPath
/// binding); everywhere else it is `/var/tmp`, matching the reference
/// implementation's choice of a world-writable, non-tmpfs location that
/// survives reboots.
#[must_use]
pub fn shared_root() -> PathBuf {
    #[cfg(windows)]
    {
        windows_common_app_data().unwrap_or_else(|| PathBuf::from(r"C:\ProgramData"))
    }
    #[cfg(not(windows))]
    {
        PathBuf::from("/var/tmp")
    }
}

#[cfg(windows)]
fn windows_common_app_data() -> Option<PathBuf> {
    let output = Command::new("powershell.exe")
        .args([
            "-NoProfile",
            "-NonInteractive",
            "-Command",
            "[environment]::getfolderpath('CommonApplicationData')",
        ])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(PathBuf::from(trimmed))
    }
}

/// Ensures a world-accessible lock file exists at `shared_root().join(relative)`,
/// creating any missing parent directories along the way and widening
/// permissions on every segment this call creates.
///
/// Returns the resolved absolute path regardless of whether bootstrapping
/// fully succeeded; callers that go on to open the file will get a clear I/O
/// error if it is still missing or inaccessible.
pub fn ensure_lock_file(relative: &Path, logger: &Logger) -> PathBuf {
    let root = shared_root();
    let full_path = root.join(relative);

    let Some(parent) = full_path.parent() else {
        return full_path;
    };

    if let Err(err) = create_dir_chain(parent, logger) {
        logger.warn(&format!(
            "failed to create lock file directory {}: {err}",
            parent.display()
        ));
    }

    if !full_path.exists() {
        match File::create(&full_path) {
            Ok(file) => {
                if let Err(err) = file.set_len(LOCK_FILE_LEN) {
                    logger.warn(&format!(
                        "failed to size lock file {}: {err}",
                        full_path.display()
                    ));
                }
                drop(file);
                if let Err(err) = sys::widen_permissions(&full_path) {
                    logger.warn(&format!(
                        "failed to widen permissions on {}: {err}",
                        full_path.display()
                    ));
                }
            }
            Err(err) => {
                logger.warn(&format!(
                    "failed to create lock file {}: {err}",
                    full_path.display()
                ));
            }
        }
    }

    full_path
}

/// Creates every missing directory from `root`'s nearest existing ancestor
/// down to `root` itself, widening permissions on each one it creates.
fn create_dir_chain(root: &Path, logger: &Logger) -> std::io::Result<()> {
    let mut to_create = Vec::new();
    let mut cursor = Some(root);
    while let Some(dir) = cursor {
        if dir.exists() {
            break;
        }
        to_create.push(dir.to_path_buf());
        cursor = dir.parent();
    }

    for dir in to_create.into_iter().rev() {
        fs::create_dir(&dir)?;
        if let Err(err) = sys::widen_permissions(&dir) {
            logger.warn(&format!(
                "failed to widen permissions on {}: {err}",
                dir.display()
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::Logger;

    #[test]
    fn ensure_lock_file_creates_missing_directories_and_file() {
        let dir = tempfile::tempdir().unwrap();
        let relative = Path::new("nested/sub/portLockFile");
        let logger = Logger::new(crate::logging::LogLevel::Off);

        let full = dir.path().join(relative);
        create_dir_chain(full.parent().unwrap(), &logger).unwrap();
        let file = File::create(&full).unwrap();
        file.set_len(LOCK_FILE_LEN).unwrap();
        drop(file);

        assert!(full.exists());
        assert_eq!(fs::metadata(&full).unwrap().len(), LOCK_FILE_LEN);
    }

    #[test]
    fn shared_root_is_nonempty() {
        assert!(!shared_root().as_os_str().is_empty());
    }
}
