//! Core infrastructure for testbridge.
//!
//! This crate holds everything the driver and the worker process must agree on:
//! - Test-case descriptors and the discovered test tree
//! - The hierarchy builder that groups descriptors into a tree
//! - The JSON-lines wire protocol (requests, responses, lifecycle events)
//! - The on-disk test info cache
//! - Error types and error codes

pub mod cache;
pub mod error;
pub mod hierarchy;
pub mod protocol;
pub mod types;
