//! JSON output types for the `testbridge` CLI.
//!
//! Every command writes exactly one JSON object to stdout. Successful
//! responses carry `"status": "ok"`, failures an [`ErrorResponse`].

use std::io::{self, Write};
use std::path::PathBuf;

use serde::Serialize;

use testbridge_core::error::BridgeError;
use testbridge_core::types::TestNode;

use crate::locate::SourceLocation;
use crate::session::AggregateResult;

/// Schema version of CLI responses.
pub const SCHEMA_VERSION: &str = "1";

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct ErrorInfo {
    /// Numeric code, also used as the exit status.
    pub code: u8,
    pub category: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn from_error(err: &BridgeError) -> Self {
        ErrorInfo {
            code: err.error_code().code(),
            category: err.category().to_string(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub status: String,
    pub schema_version: String,
    pub error: ErrorInfo,
}

impl ErrorResponse {
    pub fn from_error(err: &BridgeError) -> Self {
        ErrorResponse {
            status: "error".to_string(),
            schema_version: SCHEMA_VERSION.to_string(),
            error: ErrorInfo::from_error(err),
        }
    }
}

// ============================================================================
// Command Responses
// ============================================================================

/// Output of `discover`.
#[derive(Debug, Clone, Serialize)]
pub struct DiscoverResponse {
    pub status: String,
    pub schema_version: String,
    pub assembly: PathBuf,
    pub test_count: usize,
    /// `null` when the assembly has no tests.
    pub root: Option<TestNode>,
}

impl DiscoverResponse {
    pub fn new(assembly: PathBuf, root: Option<TestNode>) -> Self {
        DiscoverResponse {
            status: "ok".to_string(),
            schema_version: SCHEMA_VERSION.to_string(),
            assembly,
            test_count: root.as_ref().map(|r| r.leaves().len()).unwrap_or(0),
            root,
        }
    }
}

/// Output of `run`. Test failures are reported here, not as errors.
#[derive(Debug, Clone, Serialize)]
pub struct RunResponse {
    pub status: String,
    pub schema_version: String,
    pub assembly: PathBuf,
    pub result: AggregateResult,
}

impl RunResponse {
    pub fn new(assembly: PathBuf, result: AggregateResult) -> Self {
        RunResponse {
            status: "ok".to_string(),
            schema_version: SCHEMA_VERSION.to_string(),
            assembly,
            result,
        }
    }
}

/// Output of `locate`.
#[derive(Debug, Clone, Serialize)]
pub struct LocateResponse {
    pub status: String,
    pub schema_version: String,
    pub id: String,
    /// `null` when the case could not be located in time.
    pub location: Option<SourceLocation>,
}

impl LocateResponse {
    pub fn new(id: impl Into<String>, location: Option<SourceLocation>) -> Self {
        LocateResponse {
            status: "ok".to_string(),
            schema_version: SCHEMA_VERSION.to_string(),
            id: id.into(),
            location,
        }
    }
}

/// Output of `cache clear`.
#[derive(Debug, Clone, Serialize)]
pub struct CacheClearResponse {
    pub status: String,
    pub schema_version: String,
    /// Number of cache files removed.
    pub removed: usize,
}

impl CacheClearResponse {
    pub fn new(removed: usize) -> Self {
        CacheClearResponse {
            status: "ok".to_string(),
            schema_version: SCHEMA_VERSION.to_string(),
            removed,
        }
    }
}

// ============================================================================
// Response Emission
// ============================================================================

/// Write a response as pretty-printed JSON followed by a newline.
pub fn emit_response<T: Serialize>(response: &T, writer: &mut impl Write) -> io::Result<()> {
    let json = serde_json::to_string_pretty(response)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    writeln!(writer, "{}", json)
}
