//! The worker's request loop.

use std::io::{self, BufRead, Write};
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};

use testbridge_core::error::BridgeError;
use testbridge_core::hierarchy::build_hierarchy;
use testbridge_core::protocol::{
    decode_request, encode_line, recover_request_id, LifecycleEvent, Request, Response,
    RunRequest, RunSummary, WorkerMessage,
};
use testbridge_core::types::TestNode;

use super::crash::CrashLog;
use super::framework::{
    select_framework, ExecutionListener, FrameworkError, FrameworkResult, TestFramework,
};

/// Serves discovery and run requests over a line-oriented conduit.
#[derive(Clone, Default)]
pub struct Server {
    crash_log: CrashLog,
    /// Used for every request instead of per-assembly selection.
    framework: Option<Arc<dyn TestFramework>>,
}

impl Server {
    pub fn new() -> Self {
        Server::default()
    }

    /// Record run crash logs through `crash_log`.
    pub fn with_crash_log(mut self, crash_log: CrashLog) -> Self {
        self.crash_log = crash_log;
        self
    }

    /// Serve every assembly with one framework.
    pub fn with_framework(mut self, framework: Arc<dyn TestFramework>) -> Self {
        self.framework = Some(framework);
        self
    }

    /// Write the ready line, then answer requests until `shutdown` or end of
    /// input. Events of a run are written before its response.
    pub fn serve<R: BufRead, W: Write>(&self, reader: R, mut writer: W) -> io::Result<()> {
        write_message(&mut writer, &WorkerMessage::ready())?;

        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let envelope = match decode_request(&line) {
                Ok(envelope) => envelope,
                Err(err) => {
                    match recover_request_id(&line) {
                        Some(id) => write_message(
                            &mut writer,
                            &WorkerMessage::error(id, "protocol_error", err.to_string()),
                        )?,
                        None => warn!(error = %err, "dropping unreadable request"),
                    }
                    continue;
                }
            };

            let id = envelope.id;
            debug!(id, op = envelope.request.op(), "request received");
            let reply = match envelope.request {
                Request::Shutdown => {
                    write_message(&mut writer, &WorkerMessage::ok(id, Response::Shutdown))?;
                    info!("shutdown requested");
                    return Ok(());
                }
                Request::GetTestInfo {
                    path, runner_type, ..
                } => match self.discover(&path, runner_type.as_deref()) {
                    Ok(root) => WorkerMessage::ok(id, Response::TestInfo { root }),
                    Err(err) => error_reply(id, err),
                },
                Request::Run(run) => match self.run(&run, &mut writer) {
                    Ok(executed) => WorkerMessage::ok(
                        id,
                        Response::Run {
                            result: RunSummary { executed },
                        },
                    ),
                    Err(RunError::Write(e)) => return Err(e),
                    Err(RunError::Framework(err)) => error_reply(id, err),
                },
            };
            write_message(&mut writer, &reply)?;
        }

        debug!("input closed");
        Ok(())
    }

    fn framework_for(
        &self,
        runner_type: Option<&str>,
        assembly: &Path,
    ) -> FrameworkResult<Arc<dyn TestFramework>> {
        match &self.framework {
            Some(framework) => Ok(Arc::clone(framework)),
            None => select_framework(runner_type, assembly).map(Arc::from),
        }
    }

    /// Discover and build the tree. A missing assembly yields an empty
    /// result.
    fn discover(
        &self,
        assembly: &Path,
        runner_type: Option<&str>,
    ) -> FrameworkResult<Option<TestNode>> {
        let framework = self.framework_for(runner_type, assembly)?;
        match framework.discover(assembly) {
            Ok(cases) => {
                info!(
                    assembly = %assembly.display(),
                    framework = framework.name(),
                    cases = cases.len(),
                    "discovered tests"
                );
                Ok(build_hierarchy(
                    cases.into_iter().map(|c| c.descriptor).collect(),
                ))
            }
            Err(FrameworkError::AssemblyNotFound { path }) => {
                info!(assembly = %path.display(), "assembly not found, no tests");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    fn run<W: Write>(&self, run: &RunRequest, writer: &mut W) -> Result<usize, RunError> {
        self.crash_log.set(run.crash_log_path.clone());
        if !run.support_assembly_paths.is_empty() || run.runner_assembly.is_some() {
            debug!(
                support = run.support_assembly_paths.len(),
                runner_assembly = ?run.runner_assembly,
                "run carries support assemblies"
            );
        }
        let framework = self.framework_for(run.runner_type.as_deref(), &run.path)?;
        let mut sink = StreamSink {
            writer,
            write_failed: false,
        };
        let result = framework.execute(&run.path, &run.id_filter, &mut sink);
        self.crash_log.set(None);

        match result {
            Ok(executed) => {
                info!(suite = %run.suite_name, executed, "run complete");
                Ok(executed)
            }
            // A broken output stream means the driver is gone.
            Err(FrameworkError::Io(e)) if sink.write_failed => Err(RunError::Write(e)),
            Err(err) => Err(RunError::Framework(err)),
        }
    }
}

/// Error response for a failed request, coded by error category.
fn error_reply(id: u64, err: FrameworkError) -> WorkerMessage {
    let message = err.to_string();
    WorkerMessage::error(id, BridgeError::from(err).category(), message)
}

enum RunError {
    Write(io::Error),
    Framework(FrameworkError),
}

impl From<FrameworkError> for RunError {
    fn from(err: FrameworkError) -> Self {
        RunError::Framework(err)
    }
}

/// Writes events straight to the output stream.
struct StreamSink<'a, W: Write> {
    writer: &'a mut W,
    write_failed: bool,
}

impl<W: Write> ExecutionListener for StreamSink<'_, W> {
    fn on_event(&mut self, event: LifecycleEvent) -> io::Result<()> {
        let written = write_message(&mut *self.writer, &WorkerMessage::Event(event));
        self.write_failed |= written.is_err();
        written
    }
}

fn write_message<W: Write>(writer: &mut W, message: &WorkerMessage) -> io::Result<()> {
    let line = encode_line(message).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    writer.write_all(line.as_bytes())?;
    writer.flush()
}
