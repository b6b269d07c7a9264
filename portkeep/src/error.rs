//! Error types for the portkeep library.
//!
//! The public [`Error`] enum carries only the two error kinds that are
//! meant to reach the caller — `InvalidArgument` and
//! `PermanentFailure` — plus `Exhausted`, which surfaces only after a full
//! two-pass bit-scan fails. `TransientVetFailure` and `DiagnosticMismatch`
//! are deliberately *not* variants here: the former drives the internal scan
//! and is represented by [`VetFailure`] in the `engine` module, the latter is
//! logged, never raised.
#![forbid(unsafe_code)]

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for operations that may fail with a portkeep error.
///
/// # Examples
///
/// ```
/// use portkeep::{Error, Result};
///
/// fn example_operation() -> Result<u16> {
///     Ok(8080)
/// }
/// ```
pub type Result<T> = std::result::Result<T, Error>;

/// The public error type for the portkeep library.
///
/// Every variant here maps onto one of two caller-visible kinds
/// (`InvalidArgument`, `PermanentFailure`) or the
/// third kind that is visible only after exhausting the scan
/// (`Exhausted`). See the module documentation for why the other two
/// abstract kinds (`TransientVetFailure`, `DiagnosticMismatch`) have no
/// variant here.
#[derive(Debug, Error)]
pub enum Error {
    /// An invalid port number was provided (out of `[0, 65535]`, or zero).
    #[error("invalid port {value}: {reason}")]
    InvalidPort {
        /// The invalid port value.
        value: u16,
        /// The reason the port is invalid.
        reason: String,
    },

    /// An invalid port range was specified (constructing a [`crate::port::PortRange`]).
    #[error("invalid port range {min}-{max}: {reason}")]
    InvalidPortRange {
        /// The minimum port in the range.
        min: u16,
        /// The maximum port in the range.
        max: u16,
        /// The reason the range is invalid.
        reason: String,
    },

    /// `reserve(port)` was called for a port inside the engine's `Restricted`
    /// set (a system port, the ephemeral range, or an OS-reserved range).
    #[error("port {port} is not reservable: {reason}")]
    NotReservable {
        /// The port that was rejected.
        port: u16,
        /// Which restricted set the port falls in.
        reason: String,
    },

    /// `reserve_many(n)` was called with a non-positive count, or a count
    /// exceeding the number of currently reservable ports.
    #[error("invalid reservation count {requested}: {reason}")]
    InvalidCount {
        /// The requested count.
        requested: i64,
        /// Why the count is invalid.
        reason: String,
    },

    /// No reservable port remained after a full two-pass bit-scan.
    #[error("no reservable port available (scanned both directions from the start index)")]
    Exhausted,

    /// The cross-process lock file could not be opened or is unusable.
    ///
    /// This is the engine's one fatal condition: an I/O error while opening
    /// the shared lock file fails the enclosing reservation with a permanent
    /// error. It does not poison in-process state, but every subsequent
    /// `reserve*` will hit the same unusable file.
    #[error("cross-process lock file {} is unusable: {source}", path.display())]
    LockFileUnavailable {
        /// The lock file's resolved path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A generic I/O failure not tied to the lock file specifically (e.g.
    /// a platform probe's command could not be spawned in an unexpected way,
    /// or the TCP listener setup failed for a reason other than "in use").
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<crate::port::InvalidPortError> for Error {
    fn from(err: crate::port::InvalidPortError) -> Self {
        Self::InvalidPort {
            value: err.value,
            reason: err.reason,
        }
    }
}

impl From<crate::port::InvalidPortRangeError> for Error {
    fn from(err: crate::port::InvalidPortRangeError) -> Self {
        Self::InvalidPortRange {
            min: err.min.value(),
            max: err.max.value(),
            reason: err.reason,
        }
    }
}

impl Error {
    /// Returns `true` for the kinds classified as `InvalidArgument`.
    #[must_use]
    pub fn is_invalid_argument(&self) -> bool {
        matches!(
            self,
            Self::InvalidPort { .. }
                | Self::InvalidPortRange { .. }
                | Self::NotReservable { .. }
                | Self::InvalidCount { .. }
        )
    }

    /// Returns `true` for the kinds classified as `PermanentFailure`.
    #[must_use]
    pub fn is_permanent_failure(&self) -> bool {
        matches!(self, Self::LockFileUnavailable { .. } | Self::Io(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_port_error() {
        let err = Error::InvalidPort {
            value: 0,
            reason: "port 0 is invalid".to_string(),
        };
        let display = format!("{err}");
        assert!(display.contains("invalid port"));
        assert!(display.contains('0'));
        assert!(err.is_invalid_argument());
    }

    #[test]
    fn test_invalid_port_range_error() {
        let err = Error::InvalidPortRange {
            min: 5000,
            max: 4000,
            reason: "max must be >= min".to_string(),
        };
        let display = format!("{err}");
        assert!(display.contains("invalid port range"));
        assert!(display.contains("5000-4000"));
    }

    #[test]
    fn test_not_reservable_error() {
        let err = Error::NotReservable {
            port: 55000,
            reason: "within the ephemeral range".to_string(),
        };
        let display = format!("{err}");
        assert!(display.contains("not reservable"));
        assert!(display.contains("ephemeral"));
        assert!(err.is_invalid_argument());
    }

    #[test]
    fn test_invalid_count_error() {
        let err = Error::InvalidCount {
            requested: -1,
            reason: "count must be positive".to_string(),
        };
        let display = format!("{err}");
        assert!(display.contains("invalid reservation count -1"));
        assert!(err.is_invalid_argument());
    }

    #[test]
    fn test_exhausted_error() {
        let err = Error::Exhausted;
        let display = format!("{err}");
        assert!(display.contains("no reservable port"));
        assert!(!err.is_invalid_argument());
        assert!(!err.is_permanent_failure());
    }

    #[test]
    fn test_lock_file_unavailable_error() {
        let err = Error::LockFileUnavailable {
            path: PathBuf::from("/var/tmp/portkeep/portLockFile"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        let display = format!("{err}");
        assert!(display.contains("portLockFile"));
        assert!(display.contains("denied"));
        assert!(err.is_permanent_failure());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        let display = format!("{err}");
        assert!(display.contains("I/O error"));
        assert!(err.is_permanent_failure());
    }

    #[test]
    fn test_result_type_alias() {
        fn returns_result() -> Result<u16> {
            Err(Error::InvalidPort {
                value: 0,
                reason: "test".to_string(),
            })
        }

        assert!(returns_result().is_err());
    }
}
