//! Code that runs inside the worker process.
//!
//! The worker reads requests from stdin, answers them with the test
//! framework that matches the assembly, and writes responses and lifecycle
//! events to stdout. It never logs to stdout.

pub mod crash;
pub mod framework;
pub mod libtest;
pub mod manifest;
pub mod server;

pub use crash::CrashLog;
pub use framework::{
    select_framework, CaseRun, DiscoveredCase, ExecutionListener, Failure, FrameworkError,
    FrameworkResult, TestFramework,
};
pub use server::Server;
