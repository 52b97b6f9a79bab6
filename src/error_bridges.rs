//! Conversions from driver- and worker-side errors into `BridgeError`.
//!
//! These live in the root crate because the transport and framework error
//! types are defined here, not in `testbridge-core`.

use testbridge_core::error::BridgeError;

use crate::transport::TransportError;
use crate::worker::FrameworkError;

// ============================================================================
// Bridge: TransportError -> BridgeError
// ============================================================================

impl From<TransportError> for BridgeError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::ExecutableNotFound { .. }
            | TransportError::SpawnFailed { .. }
            | TransportError::HandshakeTimeout { .. } => BridgeError::ProcessSpawnFailed {
                message: err.to_string(),
            },
            TransportError::WorkerCrashed { .. } | TransportError::Io(_) => {
                BridgeError::WorkerCrashed {
                    message: err.to_string(),
                }
            }
            TransportError::Protocol(protocol) => BridgeError::from(protocol),
            TransportError::Timeout { .. } => BridgeError::ProtocolError {
                message: err.to_string(),
            },
            TransportError::WorkerResponse { code, message } => match code.as_str() {
                "assembly_not_found" => BridgeError::AssemblyNotFound {
                    path: message
                        .strip_prefix("assembly not found: ")
                        .unwrap_or(&message)
                        .into(),
                },
                "invalid_arguments" => BridgeError::InvalidArguments { message },
                "protocol_error" => BridgeError::ProtocolError { message },
                _ => BridgeError::InternalError {
                    message: format!("{}: {}", code, message),
                },
            },
        }
    }
}

// ============================================================================
// Bridge: FrameworkError -> BridgeError
// ============================================================================

impl From<FrameworkError> for BridgeError {
    fn from(err: FrameworkError) -> Self {
        match err {
            FrameworkError::AssemblyNotFound { path } => BridgeError::AssemblyNotFound { path },
            FrameworkError::UnknownRunner { .. } => BridgeError::InvalidArguments {
                message: err.to_string(),
            },
            FrameworkError::ListingFailed { .. }
            | FrameworkError::InvalidManifest { .. }
            | FrameworkError::Io(_) => BridgeError::InternalError {
                message: err.to_string(),
            },
        }
    }
}
