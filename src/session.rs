//! Driver-side test session: discovery and run requests against a worker,
//! with lifecycle events resolved back to the cases they belong to.
//!
//! A session keeps its worker connection open between requests and opens a
//! new one after the previous worker crashed. A run always produces an
//! [`AggregateResult`]: cases the worker never finished are reported as
//! [`CaseOutcome::NotRun`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use testbridge_core::error::{BridgeError, BridgeResult};
use testbridge_core::protocol::{LifecycleEvent, Request, Response, RunRequest};
use testbridge_core::types::TestNode;

use crate::launch::Connector;
use crate::suite::TestDiscoverer;
use crate::transport::{Connection, EventHandler, IgnoreEvents, TransportError, TransportResult};

// ============================================================================
// Results
// ============================================================================

/// Final outcome of one requested case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseOutcome {
    Passed,
    Failed,
    Skipped,
    NotRun,
}

/// Result of one requested case.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaseResult {
    pub id: String,
    pub outcome: CaseOutcome,
    pub time_secs: f64,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub output: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub exception_types: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub stack_traces: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
}

impl CaseResult {
    fn not_run(id: &str) -> Self {
        CaseResult {
            id: id.to_string(),
            outcome: CaseOutcome::NotRun,
            time_secs: 0.0,
            output: String::new(),
            exception_types: Vec::new(),
            messages: Vec::new(),
            stack_traces: Vec::new(),
            skip_reason: None,
        }
    }

    /// Build from a terminal event. `None` for non-terminal events.
    fn from_terminal(event: LifecycleEvent) -> Option<Self> {
        match event {
            LifecycleEvent::TestPassed {
                test_case_id,
                execution_time_secs,
                output,
            } => Some(CaseResult {
                outcome: CaseOutcome::Passed,
                time_secs: execution_time_secs,
                output,
                ..CaseResult::not_run(&test_case_id)
            }),
            LifecycleEvent::TestFailed {
                test_case_id,
                execution_time_secs,
                output,
                exception_types,
                messages,
                stack_traces,
            } => Some(CaseResult {
                outcome: CaseOutcome::Failed,
                time_secs: execution_time_secs,
                output,
                exception_types,
                messages,
                stack_traces,
                ..CaseResult::not_run(&test_case_id)
            }),
            LifecycleEvent::TestSkipped {
                test_case_id,
                reason,
            } => Some(CaseResult {
                outcome: CaseOutcome::Skipped,
                skip_reason: Some(reason),
                ..CaseResult::not_run(&test_case_id)
            }),
            LifecycleEvent::TestStarted { .. } | LifecycleEvent::TestFinished { .. } => None,
        }
    }
}

/// Counters and per-case results of one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AggregateResult {
    /// One entry per requested id, in request order.
    pub cases: Vec<CaseResult>,
    pub passed: usize,
    pub failures: usize,
    pub skipped: usize,
    pub not_run: usize,
    pub time_secs: f64,
    /// The worker went away before the run completed.
    pub worker_crashed: bool,
    /// Crash diagnostics written by the worker, kept when it crashed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crash_log: Option<PathBuf>,
    /// Why the run ended early, if it did.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AggregateResult {
    pub fn case(&self, id: &str) -> Option<&CaseResult> {
        self.cases.iter().find(|c| c.id == id)
    }

    pub fn total(&self) -> usize {
        self.cases.len()
    }
}

// ============================================================================
// Observers and Cancellation
// ============================================================================

/// Receives per-case progress during a run.
pub trait RunObserver: Send {
    fn on_starting(&mut self, _id: &str) {}
    fn on_result(&mut self, _result: &CaseResult) {}
    fn on_finished(&mut self, _id: &str) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl RunObserver for NullObserver {}

/// Shared stop flag. Once set, incoming events are ignored.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        CancellationFlag::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

// ============================================================================
// Event Resolution
// ============================================================================

#[derive(Debug, Default)]
struct CaseRecord {
    started: bool,
    finished: bool,
    result: Option<CaseResult>,
}

/// Maps events of one run onto the requested cases.
struct RunTracker<'a> {
    order: Vec<String>,
    records: HashMap<String, CaseRecord>,
    observer: &'a mut dyn RunObserver,
    cancel: &'a CancellationFlag,
}

impl<'a> RunTracker<'a> {
    fn new(ids: &[String], observer: &'a mut dyn RunObserver, cancel: &'a CancellationFlag) -> Self {
        let mut order = Vec::with_capacity(ids.len());
        let mut records = HashMap::with_capacity(ids.len());
        for id in ids {
            if records.insert(id.clone(), CaseRecord::default()).is_none() {
                order.push(id.clone());
            }
        }
        RunTracker {
            order,
            records,
            observer,
            cancel,
        }
    }

    fn finish(mut self) -> AggregateResult {
        let mut result = AggregateResult::default();
        for id in &self.order {
            let case = self
                .records
                .remove(id)
                .and_then(|r| r.result)
                .unwrap_or_else(|| CaseResult::not_run(id));
            match case.outcome {
                CaseOutcome::Passed => result.passed += 1,
                CaseOutcome::Failed => result.failures += 1,
                CaseOutcome::Skipped => result.skipped += 1,
                CaseOutcome::NotRun => result.not_run += 1,
            }
            result.time_secs += case.time_secs;
            result.cases.push(case);
        }
        result
    }
}

impl EventHandler for RunTracker<'_> {
    fn on_event(&mut self, event: LifecycleEvent) {
        if self.cancel.is_cancelled() {
            return;
        }
        let Some(record) = self.records.get_mut(event.test_case_id()) else {
            debug!(id = event.test_case_id(), "ignoring event for unknown case");
            return;
        };
        match event {
            LifecycleEvent::TestStarted { test_case_id } => {
                if !record.started {
                    record.started = true;
                    self.observer.on_starting(&test_case_id);
                }
            }
            LifecycleEvent::TestFinished { test_case_id } => {
                if !record.finished {
                    record.finished = true;
                    self.observer.on_finished(&test_case_id);
                }
            }
            terminal => {
                if record.result.is_some() {
                    debug!(id = terminal.test_case_id(), "ignoring repeated result");
                    return;
                }
                if let Some(result) = CaseResult::from_terminal(terminal) {
                    self.observer.on_result(&result);
                    record.result = Some(result);
                }
            }
        }
    }
}

// ============================================================================
// Session
// ============================================================================

/// Options for a session's requests.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    /// Forces a framework instead of selection by assembly.
    pub runner_type: Option<String>,
    pub runner_assembly: Option<PathBuf>,
    /// Upper bound for one discovery request. Runs are unbounded.
    pub discovery_timeout: Option<Duration>,
    /// Name reported to the worker with each run.
    pub suite_name: String,
}

/// A driver session over one worker connection at a time.
pub struct TestSession<C: Connector> {
    connector: C,
    connection: Option<Connection>,
    options: SessionOptions,
    observer: Box<dyn RunObserver>,
    cancel: CancellationFlag,
}

impl<C: Connector> TestSession<C> {
    pub fn new(connector: C, options: SessionOptions) -> Self {
        TestSession {
            connector,
            connection: None,
            options,
            observer: Box::new(NullObserver),
            cancel: CancellationFlag::new(),
        }
    }

    pub fn with_observer(mut self, observer: Box<dyn RunObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Flag that stops event handling for the current run when set.
    pub fn cancel_flag(&self) -> CancellationFlag {
        self.cancel.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.as_ref().is_some_and(Connection::is_connected)
    }

    /// Discover the tree of `assembly`. Failures are logged and yield `None`.
    pub fn discover(&mut self, assembly: &Path, support_paths: &[PathBuf]) -> Option<TestNode> {
        match self.try_discover(assembly, support_paths) {
            Ok(root) => root,
            Err(err) => {
                warn!(assembly = %assembly.display(), error = %err, "discovery failed");
                None
            }
        }
    }

    /// Discover the tree of `assembly`, reporting failures.
    pub fn try_discover(
        &mut self,
        assembly: &Path,
        support_paths: &[PathBuf],
    ) -> TransportResult<Option<TestNode>> {
        let request = Request::GetTestInfo {
            path: assembly.to_path_buf(),
            support_assembly_paths: support_paths.to_vec(),
            runner_type: self.options.runner_type.clone(),
        };
        let timeout = self.options.discovery_timeout;
        let response = self.request(request, &mut IgnoreEvents, timeout)?;
        match response {
            Response::TestInfo { root } => Ok(root),
            other => Err(unexpected("test_info", &other)),
        }
    }

    /// Run the cases with the given ids. Only a failure to reach a worker is
    /// an error; a crash mid-run is reported in the result.
    pub fn run_tests(
        &mut self,
        ids: &[String],
        assembly: &Path,
        support_paths: &[PathBuf],
    ) -> TransportResult<AggregateResult> {
        self.cancel.reset();
        let crash_log = tempfile::Builder::new()
            .prefix("testbridge-crash-")
            .suffix(".log")
            .tempfile()
            .map_err(|e| warn!(error = %e, "cannot create crash log"))
            .ok();

        let request = Request::Run(RunRequest {
            id_filter: ids.to_vec(),
            path: assembly.to_path_buf(),
            suite_name: self.options.suite_name.clone(),
            support_assembly_paths: support_paths.to_vec(),
            runner_type: self.options.runner_type.clone(),
            runner_assembly: self.options.runner_assembly.clone(),
            crash_log_path: crash_log.as_ref().map(|f| f.path().to_path_buf()),
        });

        self.connection()?;
        let connection = self.connection.as_mut().ok_or_else(no_connection)?;
        let mut tracker = RunTracker::new(ids, self.observer.as_mut(), &self.cancel);
        let outcome = connection.send_request(request, &mut tracker, None);
        let mut result = tracker.finish();

        match outcome {
            Ok(Response::Run { result: summary }) => {
                debug!(executed = summary.executed, "run response received");
            }
            Ok(other) => result.error = Some(unexpected("run", &other).to_string()),
            Err(err) => {
                if matches!(err, TransportError::WorkerCrashed { .. }) {
                    result.worker_crashed = true;
                    result.crash_log = crash_log.and_then(|f| f.keep().ok()).map(|(_, p)| p);
                }
                if err.is_fatal() {
                    self.drop_connection();
                }
                warn!(error = %err, "run ended early");
                result.error = Some(err.to_string());
            }
        }

        info!(
            passed = result.passed,
            failures = result.failures,
            skipped = result.skipped,
            not_run = result.not_run,
            crashed = result.worker_crashed,
            "run finished"
        );
        Ok(result)
    }

    /// Run every leaf below `node`.
    pub fn run_node(
        &mut self,
        node: &TestNode,
        assembly: &Path,
        support_paths: &[PathBuf],
    ) -> TransportResult<AggregateResult> {
        self.run_tests(&node.leaf_ids(), assembly, support_paths)
    }

    /// Shut the worker down.
    pub fn close(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            connection.disconnect();
        }
    }

    fn request(
        &mut self,
        request: Request,
        handler: &mut dyn EventHandler,
        timeout: Option<Duration>,
    ) -> TransportResult<Response> {
        let result = self.connection()?.send_request(request, handler, timeout);
        if let Err(err) = &result {
            if err.is_fatal() {
                self.drop_connection();
            }
        }
        result
    }

    /// The open connection, connecting first when there is none.
    fn connection(&mut self) -> TransportResult<&mut Connection> {
        if !self.is_connected() {
            self.drop_connection();
            self.connection = Some(self.connector.connect()?);
        }
        self.connection.as_mut().ok_or_else(no_connection)
    }

    fn drop_connection(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            connection.disconnect();
        }
    }
}

fn no_connection() -> TransportError {
    TransportError::WorkerCrashed {
        reason: "no connection".to_string(),
    }
}

fn unexpected(expected: &str, found: &Response) -> TransportError {
    TransportError::Protocol(testbridge_core::protocol::ProtocolError::Unexpected {
        expected: expected.to_string(),
        found: found.op().to_string(),
    })
}

// ============================================================================
// Discoverer
// ============================================================================

/// Discovery for suites through a shared session.
pub struct WorkerDiscoverer<C: Connector> {
    session: Mutex<TestSession<C>>,
}

impl<C: Connector> WorkerDiscoverer<C> {
    pub fn new(session: TestSession<C>) -> Self {
        WorkerDiscoverer {
            session: Mutex::new(session),
        }
    }

    /// Shut down the session's worker. A later discovery reconnects.
    pub fn close(&self) {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .close();
    }
}

impl<C: Connector> TestDiscoverer for WorkerDiscoverer<C> {
    fn discover(&self, assembly: &Path, support_paths: &[PathBuf]) -> BridgeResult<Option<TestNode>> {
        let mut session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        session
            .try_discover(assembly, support_paths)
            .map_err(BridgeError::from)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::launch::InProcessConnector;
    use crate::worker::{CaseRun, DiscoveredCase, Failure, FrameworkResult, TestFramework};
    use std::sync::atomic::AtomicUsize;
    use testbridge_core::types::TestCaseDescriptor;

    /// Framework whose cases are listed up front. A case named `crash`
    /// panics the worker thread, which closes the channel mid-run.
    struct Fixed {
        cases: Vec<&'static str>,
        discoveries: AtomicUsize,
    }

    impl Fixed {
        fn new(cases: &[&'static str]) -> Arc<Self> {
            Arc::new(Fixed {
                cases: cases.to_vec(),
                discoveries: AtomicUsize::new(0),
            })
        }
    }

    impl TestFramework for Fixed {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn discover(&self, _assembly: &Path) -> FrameworkResult<Vec<DiscoveredCase>> {
            self.discoveries.fetch_add(1, Ordering::SeqCst);
            Ok(self
                .cases
                .iter()
                .map(|id| {
                    let mut case = DiscoveredCase::new(TestCaseDescriptor::new(*id, "Suite.Fixture", *id));
                    if id.starts_with("skip") {
                        case.skip_reason = Some("skipped".to_string());
                    }
                    case
                })
                .collect())
        }

        fn run_case(&self, _assembly: &Path, case: &DiscoveredCase) -> FrameworkResult<CaseRun> {
            match case.id() {
                "crash" => panic!("simulated worker crash"),
                id if id.starts_with("fail") => Ok(CaseRun {
                    duration: Duration::from_millis(10),
                    output: "assertion output".to_string(),
                    failure: Some(Failure {
                        exception_types: vec!["panic".to_string()],
                        messages: vec!["expected true".to_string()],
                        stack_traces: vec!["at src/lib.rs:1:1".to_string()],
                    }),
                }),
                _ => Ok(CaseRun::passed(Duration::from_millis(5), "ok".to_string())),
            }
        }
    }

    fn session(framework: Arc<Fixed>) -> TestSession<InProcessConnector> {
        TestSession::new(
            InProcessConnector::with_framework(framework),
            SessionOptions::default(),
        )
    }

    fn ids(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[derive(Default)]
    struct Recording(Arc<Mutex<Vec<String>>>);

    impl RunObserver for Recording {
        fn on_starting(&mut self, id: &str) {
            self.0.lock().unwrap().push(format!("starting:{}", id));
        }
        fn on_result(&mut self, result: &CaseResult) {
            self.0
                .lock()
                .unwrap()
                .push(format!("result:{}:{:?}", result.id, result.outcome));
        }
        fn on_finished(&mut self, id: &str) {
            self.0.lock().unwrap().push(format!("finished:{}", id));
        }
    }

    mod running {
        use super::*;

        #[test]
        fn aggregates_outcomes_in_request_order() {
            let mut session = session(Fixed::new(&["pass1", "fail1", "skip1"]));
            let result = session
                .run_tests(&ids(&["skip1", "fail1", "pass1"]), Path::new("a"), &[])
                .unwrap();

            let outcomes: Vec<(&str, CaseOutcome)> =
                result.cases.iter().map(|c| (c.id.as_str(), c.outcome)).collect();
            assert_eq!(
                outcomes,
                vec![
                    ("skip1", CaseOutcome::Skipped),
                    ("fail1", CaseOutcome::Failed),
                    ("pass1", CaseOutcome::Passed),
                ]
            );
            assert_eq!((result.passed, result.failures, result.skipped), (1, 1, 1));
            assert_eq!(result.not_run, 0);
            assert!(!result.worker_crashed);
            assert!((result.time_secs - 0.015).abs() < 1e-9);

            let failed = result.case("fail1").unwrap();
            assert_eq!(failed.messages, vec!["expected true"]);
            assert_eq!(failed.stack_traces, vec!["at src/lib.rs:1:1"]);
        }

        #[test]
        fn crash_marks_remaining_cases_not_run() {
            let mut session = session(Fixed::new(&["X", "crash", "Y"]));
            let result = session
                .run_tests(&ids(&["X", "crash", "Y"]), Path::new("a"), &[])
                .unwrap();

            assert!(result.worker_crashed);
            assert_eq!(result.case("X").unwrap().outcome, CaseOutcome::Passed);
            assert_eq!(result.case("crash").unwrap().outcome, CaseOutcome::NotRun);
            assert_eq!(result.case("Y").unwrap().outcome, CaseOutcome::NotRun);
            assert_eq!(result.not_run, 2);
            assert!(!session.is_connected());
        }

        #[test]
        fn session_reconnects_after_crash() {
            let framework = Fixed::new(&["X", "crash"]);
            let mut session = session(Arc::clone(&framework));
            let crashed = session
                .run_tests(&ids(&["crash"]), Path::new("a"), &[])
                .unwrap();
            assert!(crashed.worker_crashed);

            let again = session.run_tests(&ids(&["X"]), Path::new("a"), &[]).unwrap();
            assert!(!again.worker_crashed);
            assert_eq!(again.passed, 1);
        }

        #[test]
        fn unknown_ids_are_not_run() {
            let mut session = session(Fixed::new(&["X"]));
            let result = session
                .run_tests(&ids(&["X", "ghost"]), Path::new("a"), &[])
                .unwrap();
            assert_eq!(result.case("ghost").unwrap().outcome, CaseOutcome::NotRun);
            assert_eq!(result.passed, 1);
        }

        #[test]
        fn empty_request_runs_nothing() {
            let mut session = session(Fixed::new(&["X"]));
            let result = session.run_tests(&[], Path::new("a"), &[]).unwrap();
            assert_eq!(result.total(), 0);
            assert!(result.error.is_none());
        }

        #[test]
        fn run_node_runs_every_leaf() {
            let framework = Fixed::new(&["a", "b", "fail_c"]);
            let mut session = session(framework);
            let root = session.discover(Path::new("x"), &[]).unwrap();
            let fixture = root.find_path(&["Suite", "Fixture"]).unwrap();
            let result = session.run_node(fixture, Path::new("x"), &[]).unwrap();
            assert_eq!(result.total(), 3);
            assert_eq!(result.failures, 1);
        }

        #[test]
        fn observer_sees_lifecycle() {
            let log = Arc::new(Mutex::new(Vec::new()));
            let mut session = session(Fixed::new(&["X"]))
                .with_observer(Box::new(Recording(Arc::clone(&log))));
            session.run_tests(&ids(&["X"]), Path::new("a"), &[]).unwrap();
            assert_eq!(
                *log.lock().unwrap(),
                vec!["starting:X", "result:X:Passed", "finished:X"]
            );
        }
    }

    mod tracking {
        use super::*;

        fn passed(id: &str) -> LifecycleEvent {
            LifecycleEvent::TestPassed {
                test_case_id: id.to_string(),
                execution_time_secs: 1.0,
                output: String::new(),
            }
        }

        #[test]
        fn terminal_without_start_is_accepted() {
            let mut observer = NullObserver;
            let cancel = CancellationFlag::new();
            let mut tracker = RunTracker::new(&ids(&["X"]), &mut observer, &cancel);
            tracker.on_event(passed("X"));
            let result = tracker.finish();
            assert_eq!(result.passed, 1);
        }

        #[test]
        fn first_terminal_event_wins() {
            let mut observer = NullObserver;
            let cancel = CancellationFlag::new();
            let mut tracker = RunTracker::new(&ids(&["X"]), &mut observer, &cancel);
            tracker.on_event(passed("X"));
            tracker.on_event(LifecycleEvent::TestSkipped {
                test_case_id: "X".to_string(),
                reason: "late".to_string(),
            });
            let result = tracker.finish();
            assert_eq!(result.case("X").unwrap().outcome, CaseOutcome::Passed);
        }

        #[test]
        fn unknown_ids_are_ignored() {
            let mut observer = NullObserver;
            let cancel = CancellationFlag::new();
            let mut tracker = RunTracker::new(&ids(&["X"]), &mut observer, &cancel);
            tracker.on_event(passed("stranger"));
            let result = tracker.finish();
            assert_eq!(result.total(), 1);
            assert_eq!(result.not_run, 1);
        }

        #[test]
        fn duplicate_requested_ids_count_once() {
            let mut observer = NullObserver;
            let cancel = CancellationFlag::new();
            let tracker = RunTracker::new(&ids(&["X", "X"]), &mut observer, &cancel);
            assert_eq!(tracker.finish().total(), 1);
        }

        #[test]
        fn cancellation_swallows_later_events() {
            let mut observer = NullObserver;
            let cancel = CancellationFlag::new();
            let mut tracker = RunTracker::new(&ids(&["X", "Y"]), &mut observer, &cancel);
            tracker.on_event(passed("X"));
            cancel.cancel();
            tracker.on_event(passed("Y"));
            let result = tracker.finish();
            assert_eq!(result.case("X").unwrap().outcome, CaseOutcome::Passed);
            assert_eq!(result.case("Y").unwrap().outcome, CaseOutcome::NotRun);
        }
    }

    mod discovery {
        use super::*;

        #[test]
        fn discover_builds_tree_in_worker() {
            let mut session = session(Fixed::new(&["a", "b"]));
            let root = session.discover(Path::new("x"), &[]).unwrap();
            assert_eq!(root.leaf_ids(), vec!["a", "b"]);
            assert!(root.find_path(&["Suite", "Fixture", "a"]).is_some());
        }

        #[test]
        fn connection_is_reused() {
            let framework = Fixed::new(&["a"]);
            let mut session = session(Arc::clone(&framework));
            session.discover(Path::new("x"), &[]);
            assert!(session.is_connected());
            session.discover(Path::new("x"), &[]);
            assert_eq!(framework.discoveries.load(Ordering::SeqCst), 2);
            session.close();
            assert!(!session.is_connected());
        }

        #[test]
        fn discoverer_maps_to_bridge_result() {
            let discoverer = WorkerDiscoverer::new(session(Fixed::new(&["a"])));
            let root = discoverer.discover(Path::new("x"), &[]).unwrap();
            assert_eq!(root.map(|r| r.leaf_ids()), Some(vec!["a".to_string()]));
        }
    }
}
