//! Ways of getting a [`Connection`] to a worker.
//!
//! [`WorkerLauncher`] spawns the worker executable that matches the
//! configured bitness. [`InProcessConnector`] runs the worker loop on a
//! thread of the current process over in-memory pipes, for hosts that do not
//! need isolation and for tests.

use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use tracing::{debug, warn};

use crate::config::{Bitness, RunnerConfig};
use crate::pipe::pipe;
use crate::transport::{Connection, LaunchOptions, TransportError, TransportResult};
use crate::worker::{Server, TestFramework};

/// Something that can open a connection to a worker.
pub trait Connector: Send + Sync {
    fn connect(&self) -> TransportResult<Connection>;
}

impl<C: Connector + ?Sized> Connector for Arc<C> {
    fn connect(&self) -> TransportResult<Connection> {
        (**self).connect()
    }
}

// ============================================================================
// Process Launcher
// ============================================================================

/// Spawns worker processes.
#[derive(Debug, Clone)]
pub struct WorkerLauncher {
    bitness: Bitness,
    worker_dir: Option<PathBuf>,
    options: LaunchOptions,
}

impl WorkerLauncher {
    pub fn new(bitness: Bitness) -> Self {
        WorkerLauncher {
            bitness,
            worker_dir: None,
            options: LaunchOptions::default(),
        }
    }

    /// Launcher for a resolved configuration. Pid files go to the results
    /// directory.
    pub fn from_config(config: &RunnerConfig) -> Self {
        let options = LaunchOptions {
            handshake_timeout: config.handshake_timeout.value,
            state_dir: Some(config.results_dir().to_path_buf()),
            ..LaunchOptions::default()
        };
        WorkerLauncher {
            bitness: config.bitness(),
            worker_dir: config.worker_dir().map(Path::to_path_buf),
            options,
        }
    }

    pub fn with_worker_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.worker_dir = Some(dir.into());
        self
    }

    pub fn with_options(mut self, options: LaunchOptions) -> Self {
        self.options = options;
        self
    }

    pub fn bitness(&self) -> Bitness {
        self.bitness
    }

    /// Locate the worker executable: the configured worker directory, then
    /// the directory of the current executable (and its parent, which is
    /// where cargo puts binaries relative to test executables), then `PATH`.
    pub fn resolve_executable(&self) -> TransportResult<PathBuf> {
        let file_name = format!(
            "{}{}",
            self.bitness.worker_executable_name(),
            std::env::consts::EXE_SUFFIX
        );

        if let Some(dir) = &self.worker_dir {
            let candidate = dir.join(&file_name);
            return if candidate.is_file() {
                Ok(candidate)
            } else {
                Err(TransportError::ExecutableNotFound { path: candidate })
            };
        }

        if let Ok(current) = std::env::current_exe() {
            let dirs = current.parent().into_iter().flat_map(|d| [Some(d), d.parent()]);
            for dir in dirs.flatten() {
                let candidate = dir.join(&file_name);
                if candidate.is_file() {
                    return Ok(candidate);
                }
            }
        }

        which::which(&file_name).map_err(|_| TransportError::ExecutableNotFound {
            path: PathBuf::from(file_name),
        })
    }
}

impl Connector for WorkerLauncher {
    fn connect(&self) -> TransportResult<Connection> {
        let executable = self.resolve_executable()?;
        debug!(bitness = %self.bitness, executable = %executable.display(), "launching worker");
        Connection::spawn(&executable, &self.options)
    }
}

// ============================================================================
// In-Process Connector
// ============================================================================

/// Runs a [`Server`] on a background thread for each connection.
#[derive(Clone, Default)]
pub struct InProcessConnector {
    server: Server,
    options: LaunchOptions,
}

impl InProcessConnector {
    pub fn new() -> Self {
        InProcessConnector::default()
    }

    /// Serve every assembly with `framework`.
    pub fn with_framework(framework: Arc<dyn TestFramework>) -> Self {
        InProcessConnector {
            server: Server::new().with_framework(framework),
            options: LaunchOptions::default(),
        }
    }
}

impl Connector for InProcessConnector {
    fn connect(&self) -> TransportResult<Connection> {
        let (driver_out, worker_in) = pipe();
        let (worker_out, driver_in) = pipe();
        let server = self.server.clone();
        thread::Builder::new()
            .name("in-process-worker".to_string())
            .spawn(move || {
                if let Err(e) = server.serve(BufReader::new(worker_in), worker_out) {
                    warn!(error = %e, "in-process worker stopped");
                }
            })
            .map_err(|e| TransportError::SpawnFailed {
                reason: format!("failed to start in-process worker: {}", e),
            })?;
        Connection::attach(driver_in, driver_out, &self.options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn worker_dir_is_authoritative() {
        let dir = TempDir::new().unwrap();
        let launcher = WorkerLauncher::new(Bitness::X86).with_worker_dir(dir.path());
        match launcher.resolve_executable() {
            Err(TransportError::ExecutableNotFound { path }) => {
                assert!(path.starts_with(dir.path()));
                assert!(path
                    .to_string_lossy()
                    .contains("testbridge-worker-x86"));
            }
            other => panic!("expected not found, got {:?}", other),
        }

        let exe = dir
            .path()
            .join(format!("testbridge-worker-x86{}", std::env::consts::EXE_SUFFIX));
        fs::write(&exe, b"").unwrap();
        assert_eq!(launcher.resolve_executable().unwrap(), exe);
    }

    #[test]
    fn in_process_connection_handshakes() {
        let connection = InProcessConnector::new().connect().unwrap();
        assert_eq!(connection.worker_version(), Some(env!("CARGO_PKG_VERSION")));
        assert!(connection.is_connected());
        assert!(connection.pid().is_none());
    }
}
