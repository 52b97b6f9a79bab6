//! JSON-lines wire protocol between the driver and the worker process.
//!
//! Every message is a single JSON object on its own line.
//!
//! Driver → worker (requests, correlated by `id`):
//! - `{"id": 1, "op": "get_test_info", "path": "...", "support_assembly_paths": [...]}`
//! - `{"id": 2, "op": "run", "id_filter": [...], "path": "...", "suite_name": "...", ...}`
//! - `{"id": 3, "op": "shutdown"}`
//!
//! Worker → driver (tagged by `kind`):
//! - `{"kind": "ready", "version": "...", "protocol": 1}` once, on startup
//! - `{"kind": "response", "id": 1, "outcome": {"status": "ok", "body": {...}}}`
//! - `{"kind": "event", "event": "test_passed", "test_case_id": "...", ...}`
//!
//! Events are one-way and unsolicited; the worker writes the events a request
//! produces before that request's response.

use std::path::PathBuf;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;

use crate::types::TestNode;

/// Protocol revision announced in the ready message.
pub const PROTOCOL_VERSION: u32 = 1;

// ============================================================================
// Error Types
// ============================================================================

/// Errors from encoding or decoding protocol lines.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// A line could not be parsed as the expected message.
    #[error("malformed message: {reason}: {line}")]
    Malformed { reason: String, line: String },

    /// A message could not be serialized.
    #[error("failed to encode message: {reason}")]
    Encode { reason: String },

    /// The peer speaks a different protocol revision.
    #[error("protocol version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },

    /// A well-formed message arrived where another kind was required.
    #[error("unexpected message: expected {expected}, found {found}")]
    Unexpected { expected: String, found: String },
}

// ============================================================================
// Requests
// ============================================================================

/// A request with its correlation id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub id: u64,
    #[serde(flatten)]
    pub request: Request,
}

/// Requests the driver can send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    /// Discover the test tree of an assembly.
    GetTestInfo {
        path: PathBuf,
        #[serde(default)]
        support_assembly_paths: Vec<PathBuf>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        runner_type: Option<String>,
    },
    /// Run the cases whose ids are listed in the filter.
    Run(RunRequest),
    /// Ask the worker to exit its request loop.
    Shutdown,
}

impl Request {
    /// Operation name as it appears on the wire.
    pub fn op(&self) -> &'static str {
        match self {
            Request::GetTestInfo { .. } => "get_test_info",
            Request::Run(_) => "run",
            Request::Shutdown => "shutdown",
        }
    }
}

/// Parameters of a run request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRequest {
    /// Ids of the cases to run. An empty filter runs nothing.
    pub id_filter: Vec<String>,
    pub path: PathBuf,
    #[serde(default)]
    pub suite_name: String,
    #[serde(default)]
    pub support_assembly_paths: Vec<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runner_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runner_assembly: Option<PathBuf>,
    /// Where the worker writes low-level crash diagnostics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crash_log_path: Option<PathBuf>,
}

// ============================================================================
// Responses
// ============================================================================

/// Successful response bodies, one per request kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Response {
    /// Root of the discovered tree; `None` when nothing was discovered.
    TestInfo { root: Option<TestNode> },
    Run { result: RunSummary },
    Shutdown,
}

impl Response {
    pub fn op(&self) -> &'static str {
        match self {
            Response::TestInfo { .. } => "test_info",
            Response::Run { .. } => "run",
            Response::Shutdown => "shutdown",
        }
    }
}

/// Marker returned when a run completes. Per-case results travel as events.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Number of cases that matched the filter and were run.
    pub executed: usize,
}

/// Outcome of one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ResponseOutcome {
    Ok { body: Response },
    Error { code: String, message: String },
}

// ============================================================================
// Events
// ============================================================================

/// One-way test lifecycle notifications, worker → driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LifecycleEvent {
    TestStarted {
        test_case_id: String,
    },
    TestFinished {
        test_case_id: String,
    },
    TestPassed {
        test_case_id: String,
        execution_time_secs: f64,
        #[serde(default)]
        output: String,
    },
    TestFailed {
        test_case_id: String,
        execution_time_secs: f64,
        #[serde(default)]
        output: String,
        #[serde(default)]
        exception_types: Vec<String>,
        #[serde(default)]
        messages: Vec<String>,
        #[serde(default)]
        stack_traces: Vec<String>,
    },
    TestSkipped {
        test_case_id: String,
        #[serde(default)]
        reason: String,
    },
}

impl LifecycleEvent {
    pub fn test_case_id(&self) -> &str {
        match self {
            LifecycleEvent::TestStarted { test_case_id }
            | LifecycleEvent::TestFinished { test_case_id }
            | LifecycleEvent::TestPassed { test_case_id, .. }
            | LifecycleEvent::TestFailed { test_case_id, .. }
            | LifecycleEvent::TestSkipped { test_case_id, .. } => test_case_id,
        }
    }

    /// Passed, failed and skipped events finalize a case's outcome.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LifecycleEvent::TestPassed { .. }
                | LifecycleEvent::TestFailed { .. }
                | LifecycleEvent::TestSkipped { .. }
        )
    }
}

// ============================================================================
// Worker Messages
// ============================================================================

/// Everything the worker writes to its output stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkerMessage {
    Ready { version: String, protocol: u32 },
    Response { id: u64, outcome: ResponseOutcome },
    Event(LifecycleEvent),
}

impl WorkerMessage {
    pub fn ready() -> Self {
        WorkerMessage::Ready {
            version: env!("CARGO_PKG_VERSION").to_string(),
            protocol: PROTOCOL_VERSION,
        }
    }

    pub fn ok(id: u64, body: Response) -> Self {
        WorkerMessage::Response {
            id,
            outcome: ResponseOutcome::Ok { body },
        }
    }

    pub fn error(id: u64, code: impl Into<String>, message: impl Into<String>) -> Self {
        WorkerMessage::Response {
            id,
            outcome: ResponseOutcome::Error {
                code: code.into(),
                message: message.into(),
            },
        }
    }

    /// Short name for log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            WorkerMessage::Ready { .. } => "ready",
            WorkerMessage::Response { .. } => "response",
            WorkerMessage::Event(_) => "event",
        }
    }
}

// ============================================================================
// Line Codec
// ============================================================================

/// Serialize a message as one line, newline included.
pub fn encode_line<T: Serialize>(message: &T) -> Result<String, ProtocolError> {
    let mut line = serde_json::to_string(message).map_err(|e| ProtocolError::Encode {
        reason: e.to_string(),
    })?;
    line.push('\n');
    Ok(line)
}

fn decode_line<T: DeserializeOwned>(line: &str) -> Result<T, ProtocolError> {
    let trimmed = line.trim();
    serde_json::from_str(trimmed).map_err(|e| ProtocolError::Malformed {
        reason: e.to_string(),
        line: trimmed.to_string(),
    })
}

/// Decode a line written by the worker.
pub fn decode_worker_message(line: &str) -> Result<WorkerMessage, ProtocolError> {
    decode_line(line)
}

/// Decode a line written by the driver.
pub fn decode_request(line: &str) -> Result<RequestEnvelope, ProtocolError> {
    decode_line(line)
}

/// Best-effort recovery of the `id` of a request line that failed to decode,
/// so the worker can still answer it with an error.
pub fn recover_request_id(line: &str) -> Option<u64> {
    let value: serde_json::Value = serde_json::from_str(line.trim()).ok()?;
    value.get("id")?.as_u64()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{TestCaseDescriptor, TestLeaf};
    use serde_json::{json, Value};

    fn roundtrip_worker(message: &WorkerMessage) -> WorkerMessage {
        let line = encode_line(message).unwrap();
        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);
        decode_worker_message(&line).unwrap()
    }

    #[test]
    fn test_request_wire_shape() {
        let envelope = RequestEnvelope {
            id: 7,
            request: Request::GetTestInfo {
                path: PathBuf::from("/tmp/tests.bin"),
                support_assembly_paths: vec![],
                runner_type: None,
            },
        };
        let value: Value = serde_json::from_str(&encode_line(&envelope).unwrap()).unwrap();
        assert_eq!(value["id"], 7);
        assert_eq!(value["op"], "get_test_info");
        assert_eq!(value["path"], "/tmp/tests.bin");
        assert!(value.get("runner_type").is_none());
    }

    #[test]
    fn test_decode_run_request_with_defaults() {
        let line = r#"{"id": 2, "op": "run", "id_filter": ["a", "b"], "path": "/x"}"#;
        let envelope = decode_request(line).unwrap();
        assert_eq!(envelope.id, 2);
        match envelope.request {
            Request::Run(run) => {
                assert_eq!(run.id_filter, vec!["a", "b"]);
                assert_eq!(run.suite_name, "");
                assert!(run.crash_log_path.is_none());
            }
            other => panic!("expected run request, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_shutdown_request() {
        let envelope = decode_request(r#"{"id": 9, "op": "shutdown"}"#).unwrap();
        assert_eq!(envelope.request, Request::Shutdown);
        assert_eq!(envelope.request.op(), "shutdown");
    }

    #[test]
    fn test_unknown_request_op_is_malformed() {
        let err = decode_request(r#"{"id": 3, "op": "explode"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed { .. }));
        assert_eq!(recover_request_id(r#"{"id": 3, "op": "explode"}"#), Some(3));
        assert_eq!(recover_request_id("not json"), None);
    }

    #[test]
    fn test_event_wire_shape() {
        let message = WorkerMessage::Event(LifecycleEvent::TestFailed {
            test_case_id: "A.B.Test1".to_string(),
            execution_time_secs: 0.25,
            output: "out".to_string(),
            exception_types: vec!["AssertionError".to_string()],
            messages: vec!["expected 1".to_string()],
            stack_traces: vec!["at A.B.Test1".to_string()],
        });
        let value: Value = serde_json::from_str(&encode_line(&message).unwrap()).unwrap();
        assert_eq!(value["kind"], "event");
        assert_eq!(value["event"], "test_failed");
        assert_eq!(value["test_case_id"], "A.B.Test1");
        assert_eq!(roundtrip_worker(&message), message);
    }

    #[test]
    fn test_response_carries_tree() {
        let root = TestNode::Group {
            name: String::new(),
            children: vec![TestNode::Leaf(TestLeaf::from_descriptor(
                &TestCaseDescriptor::new("1", "", "Solo").with_arguments(vec![json!(3)]),
            ))],
        };
        let message = WorkerMessage::ok(4, Response::TestInfo { root: Some(root) });
        let value: Value = serde_json::from_str(&encode_line(&message).unwrap()).unwrap();
        assert_eq!(value["kind"], "response");
        assert_eq!(value["outcome"]["status"], "ok");
        assert_eq!(value["outcome"]["body"]["op"], "test_info");
        assert_eq!(roundtrip_worker(&message), message);
    }

    #[test]
    fn test_error_response() {
        let message = WorkerMessage::error(5, "assembly_not_found", "no such file");
        match roundtrip_worker(&message) {
            WorkerMessage::Response {
                id,
                outcome: ResponseOutcome::Error { code, .. },
            } => {
                assert_eq!(id, 5);
                assert_eq!(code, "assembly_not_found");
            }
            other => panic!("expected error response, got {:?}", other),
        }
    }

    #[test]
    fn test_ready_message_announces_protocol() {
        match roundtrip_worker(&WorkerMessage::ready()) {
            WorkerMessage::Ready { protocol, .. } => assert_eq!(protocol, PROTOCOL_VERSION),
            other => panic!("expected ready, got {:?}", other),
        }
    }

    #[test]
    fn test_terminal_events() {
        let started = LifecycleEvent::TestStarted {
            test_case_id: "x".into(),
        };
        let skipped = LifecycleEvent::TestSkipped {
            test_case_id: "x".into(),
            reason: "ignored".into(),
        };
        assert!(!started.is_terminal());
        assert!(skipped.is_terminal());
        assert_eq!(skipped.test_case_id(), "x");
    }
}
