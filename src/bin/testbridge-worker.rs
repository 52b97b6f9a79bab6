//! Worker process entry point.
//!
//! Speaks the JSON-lines protocol on stdin/stdout. Logs go to stderr only,
//! since stdout is the protocol channel. `TESTBRIDGE_WORKER_LOG` sets the
//! log level when `RUST_LOG` is not set.

use std::io;
use std::process::ExitCode;

use tracing::error;

use testbridge::worker::{CrashLog, Server};

/// Log level used when neither `RUST_LOG` nor `TESTBRIDGE_WORKER_LOG` is set.
const DEFAULT_LOG_LEVEL: &str = "warn";

fn main() -> ExitCode {
    if std::env::args().nth(1).as_deref() == Some("--version") {
        println!("testbridge-worker {}", env!("CARGO_PKG_VERSION"));
        return ExitCode::SUCCESS;
    }

    init_tracing();

    let crash_log = CrashLog::new();
    crash_log.install_panic_hook();

    let stdin = io::stdin();
    let stdout = io::stdout();
    let server = Server::new().with_crash_log(crash_log);
    match server.serve(stdin.lock(), stdout.lock()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "worker channel failed");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    use tracing_subscriber::fmt::format::FmtSpan;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = std::env::var("TESTBRIDGE_WORKER_LOG")
            .unwrap_or_else(|_| DEFAULT_LOG_LEVEL.to_string());
        EnvFilter::new(level)
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}
