//! Unified error types for scuttle

use nix::errno::Errno;
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// A native call that returned non-zero
///
/// Carries the raw errno so callers can decide which codes are expected
/// (e.g. `EPERM` during probe unmounting, `ENOENT` for an absent OID).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{operation} failed: {errno}")]
pub struct SyscallError {
    /// Operation and target, e.g. `unmount(/jails/web/dev)`
    pub operation: String,
    /// OS error code
    pub errno: Errno,
}

impl SyscallError {
    pub fn new(operation: impl Into<String>, errno: Errno) -> Self {
        Self {
            operation: operation.into(),
            errno,
        }
    }
}

/// Main error type for scuttle operations
#[derive(Error, Debug)]
pub enum Error {
    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    // Config errors
    #[error("Failed to read config file '{path}': {source}")]
    ConfigRead { path: PathBuf, source: io::Error },

    #[error("Failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Config validation failed: {0}")]
    ConfigValidation(String),

    // Jail errors
    #[error("jail '{0}' not found")]
    JailNotFound(String),

    #[error("Failed to parse jail listing: {0}")]
    JailListParse(String),

    // FFI errors
    #[error(transparent)]
    Syscall(#[from] SyscallError),

    #[error("Failed to attach to jail with JID {jid}: {source}")]
    JailAttach { jid: i32, source: SyscallError },

    // Enumeration errors
    #[error("Failed to parse mount table: {0}")]
    MountTableParse(String),

    #[error("Failed to parse interface listing: {0}")]
    InterfaceListParse(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Command '{command}' failed: {message}")]
    CommandFailed { command: String, message: String },

    // Teardown errors
    #[error(
        "epair count in jail '{jail}' did not decrease ({before} -> {after}); refusing to loop"
    )]
    InterfaceCountNotDecreasing {
        jail: String,
        before: usize,
        after: usize,
    },

    #[error("Processes in jail '{jail}' still alive after {timeout:?}")]
    KillTimeout { jail: String, timeout: Duration },

    #[error("Invalid teardown phase transition: {0}")]
    PhaseTransition(String),

    #[error("Isolated cleanup failed: {0}")]
    Isolation(String),
}

impl Error {
    /// Errors that abort the teardown instead of being recorded and skipped
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::JailAttach { .. } | Error::InterfaceCountNotDecreasing { .. }
        )
    }
}

/// Result type alias for scuttle operations
pub type Result<T> = std::result::Result<T, Error>;
