//! testbridge: out-of-process test discovery and execution.
//!
//! A host discovers and runs the tests of an assembly through a separate
//! worker process that speaks a JSON-lines protocol over stdin/stdout. A
//! crashing or hanging test takes down the worker, never the host.

// Shared protocol and data types - re-exported from testbridge-core
pub use testbridge_core::cache;
pub use testbridge_core::error;
pub use testbridge_core::hierarchy;
pub use testbridge_core::protocol;
pub use testbridge_core::types;

// Driver side
pub mod config;
pub mod launch;
pub mod locate;
pub mod output;
pub mod pipe;
pub mod scheduler;
pub mod session;
pub mod suite;
pub mod transport;

// Worker side
pub mod worker;

// Error bridges - converts transport and framework errors to BridgeError
mod error_bridges;
