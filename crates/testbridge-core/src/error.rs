//! Error types and error code constants for testbridge.
//!
//! `BridgeError` is the single error type the CLI renders. Subsystem errors
//! are bridged into it with `From` impls; `OutputErrorCode` gives each
//! category a stable exit code:
//! - `2`: Invalid arguments
//! - `3`: Assembly not found
//! - `4`: Worker process could not be spawned
//! - `5`: Worker crashed or spoke a malformed protocol
//! - `10`: Internal errors (including an unusable cache)

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::cache::CacheError;
use crate::protocol::ProtocolError;

// ============================================================================
// Output Error Codes
// ============================================================================

/// Stable codes that map to CLI exit codes and appear in JSON error output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OutputErrorCode {
    InvalidArguments = 2,
    AssemblyNotFound = 3,
    SpawnFailed = 4,
    WorkerFailure = 5,
    InternalError = 10,
}

impl OutputErrorCode {
    pub fn code(&self) -> u8 {
        *self as u8
    }
}

impl fmt::Display for OutputErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

// ============================================================================
// Unified Error Type
// ============================================================================

/// Unified error type for CLI output.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The worker executable could not be launched or never became ready.
    #[error("failed to start worker: {message}")]
    ProcessSpawnFailed { message: String },

    /// The worker exited or closed its channel mid-request.
    #[error("worker crashed: {message}")]
    WorkerCrashed { message: String },

    /// A protocol message could not be understood.
    #[error("protocol error: {message}")]
    ProtocolError { message: String },

    /// The test assembly does not exist.
    #[error("assembly not found: {}", path.display())]
    AssemblyNotFound { path: PathBuf },

    /// The cache could not be read or written.
    #[error("test cache unavailable: {message}")]
    CacheUnavailable { message: String },

    #[error("invalid arguments: {message}")]
    InvalidArguments { message: String },

    #[error("internal error: {message}")]
    InternalError { message: String },
}

pub type BridgeResult<T> = Result<T, BridgeError>;

impl From<&BridgeError> for OutputErrorCode {
    fn from(err: &BridgeError) -> Self {
        match err {
            BridgeError::InvalidArguments { .. } => OutputErrorCode::InvalidArguments,
            BridgeError::AssemblyNotFound { .. } => OutputErrorCode::AssemblyNotFound,
            BridgeError::ProcessSpawnFailed { .. } => OutputErrorCode::SpawnFailed,
            BridgeError::WorkerCrashed { .. } | BridgeError::ProtocolError { .. } => {
                OutputErrorCode::WorkerFailure
            }
            BridgeError::CacheUnavailable { .. } | BridgeError::InternalError { .. } => {
                OutputErrorCode::InternalError
            }
        }
    }
}

impl BridgeError {
    pub fn invalid_args(message: impl Into<String>) -> Self {
        BridgeError::InvalidArguments {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        BridgeError::InternalError {
            message: message.into(),
        }
    }

    pub fn assembly_not_found(path: impl Into<PathBuf>) -> Self {
        BridgeError::AssemblyNotFound { path: path.into() }
    }

    /// Short machine-readable category name, used as the `code` of worker
    /// error responses.
    pub fn category(&self) -> &'static str {
        match self {
            BridgeError::ProcessSpawnFailed { .. } => "process_spawn_failed",
            BridgeError::WorkerCrashed { .. } => "worker_crashed",
            BridgeError::ProtocolError { .. } => "protocol_error",
            BridgeError::AssemblyNotFound { .. } => "assembly_not_found",
            BridgeError::CacheUnavailable { .. } => "cache_unavailable",
            BridgeError::InvalidArguments { .. } => "invalid_arguments",
            BridgeError::InternalError { .. } => "internal_error",
        }
    }

    pub fn error_code(&self) -> OutputErrorCode {
        OutputErrorCode::from(self)
    }
}

// ============================================================================
// Bridges
// ============================================================================

impl From<CacheError> for BridgeError {
    fn from(err: CacheError) -> Self {
        BridgeError::CacheUnavailable {
            message: err.to_string(),
        }
    }
}

impl From<ProtocolError> for BridgeError {
    fn from(err: ProtocolError) -> Self {
        BridgeError::ProtocolError {
            message: err.to_string(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
