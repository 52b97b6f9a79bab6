//! The seam between the worker loop and a concrete test framework.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use testbridge_core::protocol::LifecycleEvent;
use testbridge_core::types::TestCaseDescriptor;

use super::libtest::LibtestFramework;
use super::manifest::ManifestFramework;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum FrameworkError {
    #[error("assembly not found: {}", path.display())]
    AssemblyNotFound { path: PathBuf },

    #[error("unknown runner type '{runner_type}'")]
    UnknownRunner { runner_type: String },

    /// The framework could not enumerate the assembly's tests.
    #[error("test listing failed for {}: {reason}", path.display())]
    ListingFailed { path: PathBuf, reason: String },

    #[error("invalid test manifest {}: {reason}", path.display())]
    InvalidManifest { path: PathBuf, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

pub type FrameworkResult<T> = Result<T, FrameworkError>;

// ============================================================================
// Cases and Runs
// ============================================================================

/// A case as a framework knows it: the descriptor plus what is needed to
/// run it.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredCase {
    pub descriptor: TestCaseDescriptor,
    /// Set when the framework marks the case as not to be run.
    pub skip_reason: Option<String>,
    /// Command line for frameworks that run each case as its own process.
    pub command: Option<Vec<String>>,
    pub working_dir: Option<PathBuf>,
}

impl DiscoveredCase {
    pub fn new(descriptor: TestCaseDescriptor) -> Self {
        DiscoveredCase {
            descriptor,
            skip_reason: None,
            command: None,
            working_dir: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.descriptor.id
    }
}

/// Failure detail of one case.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Failure {
    pub exception_types: Vec<String>,
    pub messages: Vec<String>,
    pub stack_traces: Vec<String>,
}

/// Result of running one case.
#[derive(Debug, Clone, PartialEq)]
pub struct CaseRun {
    pub duration: Duration,
    pub output: String,
    /// `None` when the case passed.
    pub failure: Option<Failure>,
}

impl CaseRun {
    pub fn passed(duration: Duration, output: String) -> Self {
        CaseRun {
            duration,
            output,
            failure: None,
        }
    }
}

/// Receives the events a run produces.
pub trait ExecutionListener {
    fn on_event(&mut self, event: LifecycleEvent) -> io::Result<()>;
}

// ============================================================================
// Test Framework
// ============================================================================

/// A test framework the worker can drive.
pub trait TestFramework: Send + Sync {
    fn name(&self) -> &'static str;

    /// Enumerate the cases of `assembly`. No test body runs.
    fn discover(&self, assembly: &Path) -> FrameworkResult<Vec<DiscoveredCase>>;

    /// Run one case to completion.
    fn run_case(&self, assembly: &Path, case: &DiscoveredCase) -> FrameworkResult<CaseRun>;

    /// Run the cases whose id is in `id_filter`, one at a time, in discovery
    /// order. Emits started, then exactly one terminal event, then finished
    /// for each. Returns how many cases were run.
    fn execute(
        &self,
        assembly: &Path,
        id_filter: &[String],
        listener: &mut dyn ExecutionListener,
    ) -> FrameworkResult<usize> {
        if id_filter.is_empty() {
            return Ok(0);
        }
        let cases = self.discover(assembly)?;
        let selected: Vec<&DiscoveredCase> = cases
            .iter()
            .filter(|c| id_filter.iter().any(|id| id == c.id()))
            .collect();
        if selected.len() < id_filter.len() {
            debug!(
                requested = id_filter.len(),
                found = selected.len(),
                "some requested cases were not discovered"
            );
        }

        for case in &selected {
            let id = case.id().to_string();
            listener.on_event(LifecycleEvent::TestStarted {
                test_case_id: id.clone(),
            })?;
            listener.on_event(self.terminal_event(assembly, case))?;
            listener.on_event(LifecycleEvent::TestFinished { test_case_id: id })?;
        }
        Ok(selected.len())
    }

    /// Run one case and turn the outcome into its terminal event. A framework
    /// error while running counts as a failure of that case.
    fn terminal_event(&self, assembly: &Path, case: &DiscoveredCase) -> LifecycleEvent {
        let test_case_id = case.id().to_string();
        if let Some(reason) = &case.skip_reason {
            return LifecycleEvent::TestSkipped {
                test_case_id,
                reason: reason.clone(),
            };
        }
        match self.run_case(assembly, case) {
            Ok(CaseRun {
                duration,
                output,
                failure: None,
            }) => LifecycleEvent::TestPassed {
                test_case_id,
                execution_time_secs: duration.as_secs_f64(),
                output,
            },
            Ok(CaseRun {
                duration,
                output,
                failure: Some(failure),
            }) => LifecycleEvent::TestFailed {
                test_case_id,
                execution_time_secs: duration.as_secs_f64(),
                output,
                exception_types: failure.exception_types,
                messages: failure.messages,
                stack_traces: failure.stack_traces,
            },
            Err(err) => {
                warn!(id = %test_case_id, error = %err, "case could not be run");
                LifecycleEvent::TestFailed {
                    test_case_id,
                    execution_time_secs: 0.0,
                    output: String::new(),
                    exception_types: vec!["FrameworkError".to_string()],
                    messages: vec![err.to_string()],
                    stack_traces: vec![],
                }
            }
        }
    }
}

/// Pick the framework for an assembly. An explicit runner type wins;
/// otherwise a `.json` file is a manifest and anything else a libtest binary.
pub fn select_framework(
    runner_type: Option<&str>,
    assembly: &Path,
) -> FrameworkResult<Box<dyn TestFramework>> {
    let name = match runner_type {
        Some(name) => name.to_ascii_lowercase(),
        None => {
            let is_json = assembly
                .extension()
                .map(|e| e.eq_ignore_ascii_case("json"))
                .unwrap_or(false);
            let inferred = if is_json { "manifest" } else { "libtest" };
            inferred.to_string()
        }
    };
    match name.as_str() {
        "libtest" => Ok(Box::new(LibtestFramework)),
        "manifest" => Ok(Box::new(ManifestFramework)),
        _ => Err(FrameworkError::UnknownRunner { runner_type: name }),
    }
}

// ============================================================================
// Tests
// ============================================================================
