//! Crash log capture inside the worker process.
//!
//! A run request names the file the worker should write crash diagnostics
//! to. The panic hook installed by [`CrashLog::install_panic_hook`] appends
//! the panic message and location to that file before the default hook
//! runs, so the driver can point at it after the channel drops.

use std::fs::OpenOptions;
use std::io::Write;
use std::panic;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

/// Shared handle to the current crash log path.
#[derive(Debug, Clone, Default)]
pub struct CrashLog {
    path: Arc<Mutex<Option<PathBuf>>>,
}

impl CrashLog {
    pub fn new() -> Self {
        CrashLog::default()
    }

    /// Set (or clear) the file the next crash is written to.
    pub fn set(&self, path: Option<PathBuf>) {
        *self.path.lock().unwrap_or_else(PoisonError::into_inner) = path;
    }

    pub fn current(&self) -> Option<PathBuf> {
        self.path
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Append one crash record to the current log, if one is set.
    pub fn record(&self, message: &str, location: Option<&str>) {
        if let Some(path) = self.current() {
            let _ = append_record(&path, message, location);
        }
    }

    /// Chain a panic hook that records every panic before the previous hook
    /// runs.
    pub fn install_panic_hook(&self) {
        let log = self.clone();
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            let payload = info.payload();
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string());
            let location = info
                .location()
                .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()));
            log.record(&message, location.as_deref());
            previous(info);
        }));
    }
}

fn append_record(path: &Path, message: &str, location: Option<&str>) -> std::io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    let now: chrono::DateTime<chrono::Utc> = std::time::SystemTime::now().into();
    let timestamp = now.format("%Y-%m-%dT%H:%M:%SZ");
    writeln!(file, "[{}] worker panicked: {}", timestamp, message)?;
    if let Some(location) = location {
        writeln!(file, "  at {}", location)?;
    }
    file.flush()
}
