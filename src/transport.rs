//! Driver side of the worker channel: spawns the worker process and talks to
//! it over JSON lines.
//!
//! - Spawn the worker with piped stdin/stdout and wait for its ready message
//! - Send requests with monotonically increasing ids and wait for the
//!   matching response
//! - Deliver lifecycle events that arrive while a request is outstanding
//! - Record the worker pid in `<state_dir>/workers/<name>.pid`
//! - Shut the worker down on disconnect or drop
//!
//! A background thread reads the worker's output and forwards each parsed
//! line through one channel, so events and responses are seen in exactly the
//! order the worker wrote them.

use std::fs;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};
use wait_timeout::ChildExt;

use testbridge_core::protocol::{
    decode_worker_message, encode_line, LifecycleEvent, ProtocolError, Request, RequestEnvelope,
    Response, ResponseOutcome, WorkerMessage, PROTOCOL_VERSION,
};

use crate::config::DEFAULT_HANDSHAKE_TIMEOUT;

// ============================================================================
// Constants
// ============================================================================

/// How long a worker may take to exit after the shutdown request before it
/// is killed.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Worker name used for the pid file when none is configured.
pub const DEFAULT_WORKER_NAME: &str = "testbridge-worker";

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur while talking to a worker.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The worker executable does not exist.
    #[error("worker executable not found: {}", path.display())]
    ExecutableNotFound { path: PathBuf },

    /// The worker process could not be started.
    #[error("failed to spawn worker: {reason}")]
    SpawnFailed { reason: String },

    /// The worker did not send its ready message in time.
    #[error("worker did not become ready within {timeout_secs}s")]
    HandshakeTimeout { timeout_secs: u64 },

    /// A request did not get its response in time.
    #[error("request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// The worker closed its channel (crashed or exited).
    #[error("worker crashed: {reason}")]
    WorkerCrashed { reason: String },

    /// The worker answered with an error response.
    #[error("worker error: {code} - {message}")]
    WorkerResponse { code: String, message: String },

    /// The worker wrote something that is not valid protocol.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

pub type TransportResult<T> = Result<T, TransportError>;

impl TransportError {
    /// Whether the connection is unusable after this error.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, TransportError::WorkerResponse { .. })
    }
}

// ============================================================================
// Events
// ============================================================================

/// Receives lifecycle events delivered by a connection.
pub trait EventHandler {
    fn on_event(&mut self, event: LifecycleEvent);
}

impl<F: FnMut(LifecycleEvent)> EventHandler for F {
    fn on_event(&mut self, event: LifecycleEvent) {
        self(event)
    }
}

/// Handler that drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct IgnoreEvents;

impl EventHandler for IgnoreEvents {
    fn on_event(&mut self, _event: LifecycleEvent) {}
}

// ============================================================================
// Launch Options
// ============================================================================

/// Options for starting a worker.
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    /// Name recorded in the pid file.
    pub name: String,
    /// Extra arguments for the worker executable.
    pub args: Vec<String>,
    /// Extra environment variables for the worker process.
    pub env: Vec<(String, String)>,
    /// Working directory of the worker process.
    pub working_dir: Option<PathBuf>,
    /// Directory holding `workers/<name>.pid`. No pid file when unset.
    pub state_dir: Option<PathBuf>,
    pub handshake_timeout: Duration,
    pub shutdown_grace: Duration,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        LaunchOptions {
            name: DEFAULT_WORKER_NAME.to_string(),
            args: Vec::new(),
            env: Vec::new(),
            working_dir: None,
            state_dir: None,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }
}

// ============================================================================
// Connection
// ============================================================================

/// What the reader thread forwards.
#[derive(Debug)]
enum Incoming {
    Message(WorkerMessage),
    Malformed(ProtocolError),
    /// End of stream, with the read error if there was one.
    Closed(Option<String>),
}

/// A live channel to one worker.
pub struct Connection {
    writer: Option<Box<dyn Write + Send>>,
    incoming: Receiver<Incoming>,
    child: Option<Child>,
    pid_path: Option<PathBuf>,
    next_request_id: u64,
    worker_version: Option<String>,
    closed: bool,
    shutdown_grace: Duration,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("pid", &self.pid())
            .field("worker_version", &self.worker_version)
            .field("closed", &self.closed)
            .finish()
    }
}

impl Connection {
    /// Spawn `executable` and complete the ready handshake.
    pub fn spawn(executable: &Path, options: &LaunchOptions) -> TransportResult<Connection> {
        if !executable.exists() {
            return Err(TransportError::ExecutableNotFound {
                path: executable.to_path_buf(),
            });
        }

        let mut command = Command::new(executable);
        command
            .args(&options.args)
            .envs(options.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());
        if let Some(dir) = &options.working_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|e| TransportError::SpawnFailed {
            reason: format!("{}: {}", executable.display(), e),
        })?;

        let (stdin, stdout) = match (child.stdin.take(), child.stdout.take()) {
            (Some(stdin), Some(stdout)) => (stdin, stdout),
            _ => {
                kill_quietly(&mut child);
                return Err(TransportError::SpawnFailed {
                    reason: "failed to capture worker stdio".to_string(),
                });
            }
        };

        let incoming = match spawn_reader(stdout) {
            Ok(incoming) => incoming,
            Err(e) => {
                kill_quietly(&mut child);
                return Err(TransportError::SpawnFailed {
                    reason: format!("failed to start reader thread: {}", e),
                });
            }
        };

        let pid = child.id();
        let mut connection = Connection::new(Box::new(stdin), incoming, options);
        connection.child = Some(child);
        connection.pid_path = options
            .state_dir
            .as_deref()
            .and_then(|dir| write_pid_file(dir, &options.name, pid));

        connection.handshake(options.handshake_timeout)?;
        info!(pid, executable = %executable.display(), "worker started");
        Ok(connection)
    }

    /// Attach to an existing conduit and complete the ready handshake. The
    /// connection owns no process.
    pub fn attach<R, W>(reader: R, writer: W, options: &LaunchOptions) -> TransportResult<Connection>
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        let incoming = spawn_reader(reader).map_err(|e| TransportError::SpawnFailed {
            reason: format!("failed to start reader thread: {}", e),
        })?;
        let mut connection = Connection::new(Box::new(writer), incoming, options);
        connection.handshake(options.handshake_timeout)?;
        debug!("attached to worker conduit");
        Ok(connection)
    }

    fn new(
        writer: Box<dyn Write + Send>,
        incoming: Receiver<Incoming>,
        options: &LaunchOptions,
    ) -> Connection {
        Connection {
            writer: Some(writer),
            incoming,
            child: None,
            pid_path: None,
            next_request_id: 1,
            worker_version: None,
            closed: false,
            shutdown_grace: options.shutdown_grace,
        }
    }

    /// Whether requests can still be sent.
    pub fn is_connected(&self) -> bool {
        !self.closed && self.writer.is_some()
    }

    /// Version announced in the worker's ready message.
    pub fn worker_version(&self) -> Option<&str> {
        self.worker_version.as_deref()
    }

    /// Pid of the owned worker process, if any.
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().map(|c| c.id())
    }

    /// Send a request and block until its response arrives, delivering every
    /// event received in the meantime to `handler`.
    pub fn send_request(
        &mut self,
        request: Request,
        handler: &mut dyn EventHandler,
        timeout: Option<Duration>,
    ) -> TransportResult<Response> {
        let id = self.next_request_id;
        self.next_request_id += 1;
        let op = request.op();
        self.write_request(RequestEnvelope { id, request })?;
        debug!(id, op, "request sent");

        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            let incoming = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    match self.incoming.recv_timeout(remaining) {
                        Ok(incoming) => incoming,
                        Err(RecvTimeoutError::Timeout) => {
                            return Err(TransportError::Timeout {
                                timeout_secs: timeout.map(|t| t.as_secs()).unwrap_or(0),
                            });
                        }
                        Err(RecvTimeoutError::Disconnected) => Incoming::Closed(None),
                    }
                }
                None => self.incoming.recv().unwrap_or(Incoming::Closed(None)),
            };

            match incoming {
                Incoming::Message(WorkerMessage::Event(event)) => handler.on_event(event),
                Incoming::Message(WorkerMessage::Response {
                    id: response_id,
                    outcome,
                }) => {
                    if response_id != id {
                        warn!(expected = id, found = response_id, "skipping stray response");
                        continue;
                    }
                    debug!(id, op, "response received");
                    return match outcome {
                        ResponseOutcome::Ok { body } => Ok(body),
                        ResponseOutcome::Error { code, message } => {
                            Err(TransportError::WorkerResponse { code, message })
                        }
                    };
                }
                Incoming::Message(WorkerMessage::Ready { .. }) => {
                    warn!("ignoring repeated ready message");
                }
                Incoming::Malformed(err) => {
                    // The rest of the stream can no longer be matched to requests.
                    self.mark_closed();
                    return Err(err.into());
                }
                Incoming::Closed(reason) => {
                    self.mark_closed();
                    return Err(TransportError::WorkerCrashed {
                        reason: reason.unwrap_or_else(|| "unexpected end of stream".to_string()),
                    });
                }
            }
        }
    }

    /// Deliver events that have already arrived without blocking. Returns how
    /// many were delivered.
    pub fn dispatch_pending_events(&mut self, handler: &mut dyn EventHandler) -> usize {
        let mut delivered = 0;
        loop {
            match self.incoming.try_recv() {
                Ok(Incoming::Message(WorkerMessage::Event(event))) => {
                    handler.on_event(event);
                    delivered += 1;
                }
                Ok(Incoming::Message(other)) => {
                    warn!(kind = other.kind(), "skipping message outside of a request");
                }
                Ok(Incoming::Malformed(err)) => warn!(error = %err, "skipping malformed line"),
                Ok(Incoming::Closed(_)) | Err(TryRecvError::Disconnected) => {
                    self.mark_closed();
                    break;
                }
                Err(TryRecvError::Empty) => break,
            }
        }
        delivered
    }

    /// Shut the worker down: best-effort shutdown request, close its input,
    /// wait the grace period, then kill. Safe to call more than once.
    pub fn disconnect(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            if !self.closed {
                let envelope = RequestEnvelope {
                    id: self.next_request_id,
                    request: Request::Shutdown,
                };
                self.next_request_id += 1;
                if let Ok(line) = encode_line(&envelope) {
                    let _ = writer.write_all(line.as_bytes());
                    let _ = writer.flush();
                }
            }
            // Dropping the writer closes the worker's stdin.
        }
        self.closed = true;

        if let Some(mut child) = self.child.take() {
            match child.wait_timeout(self.shutdown_grace) {
                Ok(Some(status)) => debug!(pid = child.id(), %status, "worker exited"),
                Ok(None) => {
                    warn!(pid = child.id(), "worker did not exit in time, killing");
                    kill_quietly(&mut child);
                }
                Err(e) => {
                    warn!(pid = child.id(), error = %e, "cannot wait for worker, killing");
                    kill_quietly(&mut child);
                }
            }
        }

        if let Some(pid_path) = self.pid_path.take() {
            let _ = fs::remove_file(pid_path);
        }
    }

    fn handshake(&mut self, timeout: Duration) -> TransportResult<()> {
        let incoming = match self.incoming.recv_timeout(timeout) {
            Ok(incoming) => incoming,
            Err(RecvTimeoutError::Timeout) => {
                self.disconnect();
                return Err(TransportError::HandshakeTimeout {
                    timeout_secs: timeout.as_secs(),
                });
            }
            Err(RecvTimeoutError::Disconnected) => Incoming::Closed(None),
        };
        let result = match incoming {
            Incoming::Message(WorkerMessage::Ready { version, protocol })
                if protocol == PROTOCOL_VERSION =>
            {
                debug!(%version, "worker ready");
                self.worker_version = Some(version);
                return Ok(());
            }
            Incoming::Message(WorkerMessage::Ready { protocol, .. }) => {
                Err(ProtocolError::VersionMismatch {
                    expected: PROTOCOL_VERSION,
                    found: protocol,
                }
                .into())
            }
            Incoming::Message(other) => Err(ProtocolError::Unexpected {
                expected: "ready".to_string(),
                found: other.kind().to_string(),
            }
            .into()),
            Incoming::Malformed(err) => Err(err.into()),
            Incoming::Closed(reason) => Err(TransportError::SpawnFailed {
                reason: reason
                    .unwrap_or_else(|| "worker exited before sending ready message".to_string()),
            }),
        };
        self.disconnect();
        result
    }

    fn write_request(&mut self, envelope: RequestEnvelope) -> TransportResult<()> {
        if self.closed {
            return Err(TransportError::WorkerCrashed {
                reason: "connection closed".to_string(),
            });
        }
        let line = encode_line(&envelope)?;
        let Some(writer) = self.writer.as_mut() else {
            return Err(TransportError::WorkerCrashed {
                reason: "connection closed".to_string(),
            });
        };
        if let Err(e) = writer.write_all(line.as_bytes()).and_then(|_| writer.flush()) {
            // Broken pipe: the worker is gone.
            self.mark_closed();
            return Err(TransportError::WorkerCrashed {
                reason: e.to_string(),
            });
        }
        Ok(())
    }

    fn mark_closed(&mut self) {
        self.closed = true;
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.disconnect();
    }
}

// ============================================================================
// Reader Thread
// ============================================================================

fn spawn_reader<R: Read + Send + 'static>(reader: R) -> io::Result<Receiver<Incoming>> {
    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
        .name("worker-reader".to_string())
        .spawn(move || read_lines(BufReader::new(reader), tx))?;
    Ok(rx)
}

fn read_lines<R: BufRead>(mut reader: R, tx: Sender<Incoming>) {
    let mut line = String::new();
    loop {
        line.clear();
        let incoming = match reader.read_line(&mut line) {
            Ok(0) => Incoming::Closed(None),
            Ok(_) => {
                if line.trim().is_empty() {
                    continue;
                }
                match decode_worker_message(&line) {
                    Ok(message) => Incoming::Message(message),
                    Err(err) => Incoming::Malformed(err),
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => Incoming::Closed(Some(e.to_string())),
        };
        let closed = matches!(incoming, Incoming::Closed(_));
        if tx.send(incoming).is_err() || closed {
            break;
        }
    }
}

// ============================================================================
// Process Helpers
// ============================================================================

fn kill_quietly(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

/// Record `{pid, name, started_at}` for a spawned worker. Failures are logged
/// and leave the worker without a pid file.
fn write_pid_file(state_dir: &Path, name: &str, pid: u32) -> Option<PathBuf> {
    let workers_dir = state_dir.join("workers");
    let pid_path = workers_dir.join(format!("{}.pid", name));
    let pid_json = serde_json::json!({
        "pid": pid,
        "name": name,
        "started_at": format_timestamp(),
    });
    let written =
        fs::create_dir_all(&workers_dir).and_then(|_| fs::write(&pid_path, pid_json.to_string()));
    match written {
        Ok(()) => Some(pid_path),
        Err(e) => {
            warn!(path = %pid_path.display(), error = %e, "cannot write worker pid file");
            None
        }
    }
}

/// Current time, ISO 8601.
fn format_timestamp() -> String {
    use chrono::{DateTime, Utc};
    use std::time::SystemTime;

    let datetime: DateTime<Utc> = SystemTime::now().into();
    datetime.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

// ============================================================================
// Tests
// ============================================================================
