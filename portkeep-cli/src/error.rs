//! CLI-specific error types with exit codes.
//!
//! This module defines error types specific to the CLI layer, wrapping
//! library errors and providing appropriate exit codes.

use std::fmt;

use portkeep::Error as LibError;

/// CLI-specific error type with exit code mapping.
#[derive(Debug)]
pub enum CliError {
    /// Library error (wrapped).
    Library(LibError),

    /// Invalid command-line arguments.
    InvalidArguments(String),

    /// I/O error.
    Io(std::io::Error),

    /// The child command passed after `--` exited with a non-zero status.
    ChildFailed(i32),

    /// `reserve(port)` returned no handle: the port is already reserved
    /// in-process, or it failed the bind/lock/connect-refusal vet protocol.
    PortUnavailable(u16),
}

impl CliError {
    /// Gets the appropriate exit code for this error.
    ///
    /// Exit codes:
    /// - 0: Success (not an error)
    /// - 1: Invalid arguments
    /// - 2: Library error classified as `InvalidArgument` (bad port, bad count, not reservable)
    /// - 3: Library error classified as `PermanentFailure` (lock file unusable, I/O)
    /// - 4: Engine exhausted its scan with no reservable port left
    /// - 5: I/O error in the CLI itself
    /// - 6: The held child command exited non-zero (its own exit code is forwarded when possible)
    /// - 7: The requested port was reservable but unavailable right now (already
    ///   reserved in-process, or failed vetting)
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::InvalidArguments(_) => 1,
            CliError::Library(err) if err.is_invalid_argument() => 2,
            CliError::Library(err) if err.is_permanent_failure() => 3,
            CliError::Library(LibError::Exhausted) => 4,
            CliError::Library(_) => 3,
            CliError::Io(_) => 5,
            CliError::ChildFailed(code) => *code,
            CliError::PortUnavailable(_) => 7,
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Library(e) => write!(f, "{e}"),
            CliError::InvalidArguments(msg) => write!(f, "invalid arguments: {msg}"),
            CliError::Io(e) => write!(f, "I/O error: {e}"),
            CliError::ChildFailed(code) => write!(f, "child command exited with status {code}"),
            CliError::PortUnavailable(port) => {
                write!(f, "port {port} is not currently available")
            }
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::Library(e) => Some(e),
            CliError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<LibError> for CliError {
    fn from(e: LibError) -> Self {
        CliError::Library(e)
    }
}

impl From<std::io::Error> for CliError {
    fn from(e: std::io::Error) -> Self {
        CliError::Io(e)
    }
}
