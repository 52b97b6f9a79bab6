//! Binary entry point for the testbridge CLI.
//!
//! Every command prints one JSON object to stdout. Logs go to stderr.
//!
//! ## Usage
//!
//! ```bash
//! # Print the test tree of an assembly (cached between calls)
//! testbridge discover target/debug/deps/mycrate-1a2b3c
//!
//! # Run two cases, or every case when no filter is given
//! testbridge run target/debug/deps/mycrate-1a2b3c --filter tests::a --filter tests::b
//!
//! # Find where a case is defined
//! testbridge locate target/debug/deps/mycrate-1a2b3c tests::a
//!
//! # Drop cached trees
//! testbridge cache clear
//! ```

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;

use testbridge::cache::{clear_all, derive_store_id, TestInfoCache};
use testbridge::config::{Bitness, CliOverrides, RunnerConfig};
use testbridge::error::{BridgeError, BridgeResult};
use testbridge::launch::WorkerLauncher;
use testbridge::locate::{locate_with_timeout, RustSourceLocator, DEFAULT_LOCATE_TIMEOUT};
use testbridge::output::{
    emit_response, CacheClearResponse, DiscoverResponse, ErrorResponse, LocateResponse,
    RunResponse,
};
use testbridge::scheduler::LoadScheduler;
use testbridge::session::{CaseResult, RunObserver, SessionOptions, TestSession, WorkerDiscoverer};
use testbridge::suite::{AssemblySuite, TestDiscoverer};
use testbridge::types::TestNode;

// ============================================================================
// CLI Structure
// ============================================================================

/// Discover and run tests in an isolated worker process.
#[derive(Parser, Debug)]
#[command(name = "testbridge", version, about = "Out-of-process test runner")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,
    #[command(subcommand)]
    command: Command,
}

/// Global arguments shared by all subcommands.
#[derive(Parser, Debug)]
struct GlobalArgs {
    /// Project root holding `testbridge.toml` (default: current directory).
    #[arg(long, global = true)]
    project: Option<PathBuf>,

    /// Log level for tracing output.
    #[arg(long, global = true, value_enum, default_value = "warn")]
    log_level: LogLevel,

    /// Worker variant to launch: x86 or x64.
    #[arg(long, global = true)]
    bitness: Option<Bitness>,

    /// Directory holding the worker executables.
    #[arg(long, global = true)]
    worker_dir: Option<PathBuf>,

    /// Directory for cached test trees.
    #[arg(long, global = true)]
    results_dir: Option<PathBuf>,

    /// Force a test framework instead of choosing one by assembly.
    #[arg(long, global = true)]
    runner_type: Option<String>,
}

/// Log level for tracing output.
#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn to_tracing_level(self) -> tracing::Level {
        match self {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the test tree of an assembly.
    Discover {
        /// Test binary or test manifest.
        assembly: PathBuf,
        /// Additional assemblies the tests depend on.
        #[arg(long = "support")]
        support: Vec<PathBuf>,
    },
    /// Run tests and print the aggregate result.
    Run {
        assembly: PathBuf,
        /// Case id to run; repeat for several. Runs every case when absent.
        #[arg(long = "filter")]
        filter: Vec<String>,
        #[arg(long = "support")]
        support: Vec<PathBuf>,
    },
    /// Print the source location of a case.
    Locate {
        assembly: PathBuf,
        /// Case id.
        id: String,
        /// Root of the source tree to search (default: project root).
        #[arg(long)]
        source_root: Option<PathBuf>,
    },
    /// Manage cached test trees.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand, Debug)]
enum CacheAction {
    /// Remove the cached tree of one assembly, or every cached tree.
    Clear {
        assembly: Option<PathBuf>,
    },
}

// ============================================================================
// Main Entry Point
// ============================================================================

fn main() -> ExitCode {
    let cli = Cli::parse();

    init_tracing(cli.global.log_level);

    match execute(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let response = ErrorResponse::from_error(&err);
            // Errors go to stdout as JSON, like every other response.
            let _ = emit_response(&response, &mut io::stdout());
            let _ = io::stdout().flush();
            ExitCode::from(err.error_code().code())
        }
    }
}

/// Initialize tracing subscriber.
fn init_tracing(level: LogLevel) {
    use tracing_subscriber::fmt::format::FmtSpan;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_tracing_level().to_string()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

fn execute(cli: Cli) -> BridgeResult<()> {
    let context = Context::new(&cli.global)?;
    match cli.command {
        Command::Discover { assembly, support } => execute_discover(&context, &assembly, support),
        Command::Run {
            assembly,
            filter,
            support,
        } => execute_run(&context, &assembly, &filter, &support),
        Command::Locate {
            assembly,
            id,
            source_root,
        } => execute_locate(&context, &assembly, &id, source_root),
        Command::Cache {
            action: CacheAction::Clear { assembly },
        } => execute_cache_clear(&context, assembly.as_deref()),
    }
}

// ============================================================================
// Command Executors
// ============================================================================

/// Resolved configuration shared by the executors.
struct Context {
    config: RunnerConfig,
    launcher: WorkerLauncher,
    runner_type: Option<String>,
}

impl Context {
    fn new(global: &GlobalArgs) -> BridgeResult<Self> {
        let project_root = match &global.project {
            Some(root) => root.clone(),
            None => std::env::current_dir()
                .map_err(|e| BridgeError::internal(format!("cannot read current directory: {}", e)))?,
        };
        let overrides = CliOverrides {
            bitness: global.bitness,
            worker_dir: global.worker_dir.clone(),
            results_dir: global.results_dir.clone(),
        };
        let config = RunnerConfig::load(&project_root, &overrides);
        info!(
            bitness = %config.bitness(),
            bitness_source = ?config.bitness.source,
            results_dir = %config.results_dir().display(),
            "configuration resolved"
        );
        let launcher = WorkerLauncher::from_config(&config);
        Ok(Context {
            config,
            launcher,
            runner_type: global.runner_type.clone(),
        })
    }

    fn session(&self, suite_name: &str) -> BridgeResult<TestSession<WorkerLauncher>> {
        // Fail early with a spawn error instead of an empty tree.
        self.launcher.resolve_executable()?;
        let options = SessionOptions {
            runner_type: self.runner_type.clone(),
            suite_name: suite_name.to_string(),
            ..SessionOptions::default()
        };
        Ok(TestSession::new(self.launcher.clone(), options))
    }

    /// Load the tree through a suite, so the cache is consulted and updated.
    fn load_tree(&self, assembly: &Path, support: Vec<PathBuf>) -> BridgeResult<Option<TestNode>> {
        let discoverer = Arc::new(WorkerDiscoverer::new(self.session(&suite_name(assembly))?));
        let shared: Arc<dyn TestDiscoverer> = Arc::clone(&discoverer) as Arc<dyn TestDiscoverer>;
        let suite = Arc::new(
            AssemblySuite::new(
                assembly,
                self.config.results_dir(),
                shared,
                LoadScheduler::new(self.config.idle_timeout.value),
            )
            .with_support_paths(support),
        );
        suite.create_tests();
        let tree = suite.refresh();
        discoverer.close();
        Ok(tree.map(|t| (*t).clone()))
    }
}

fn execute_discover(context: &Context, assembly: &Path, support: Vec<PathBuf>) -> BridgeResult<()> {
    let assembly = existing_assembly(assembly)?;
    let root = context.load_tree(&assembly, support)?;
    emit(&DiscoverResponse::new(assembly, root))
}

fn execute_run(
    context: &Context,
    assembly: &Path,
    filter: &[String],
    support: &[PathBuf],
) -> BridgeResult<()> {
    let assembly = existing_assembly(assembly)?;
    let mut session = context
        .session(&suite_name(&assembly))?
        .with_observer(Box::new(LogProgress));

    let ids = if filter.is_empty() {
        session
            .try_discover(&assembly, support)?
            .map(|root| root.leaf_ids())
            .unwrap_or_default()
    } else {
        filter.to_vec()
    };
    let result = session.run_tests(&ids, &assembly, support)?;
    session.close();
    emit(&RunResponse::new(assembly, result))
}

fn execute_locate(
    context: &Context,
    assembly: &Path,
    id: &str,
    source_root: Option<PathBuf>,
) -> BridgeResult<()> {
    let assembly = existing_assembly(assembly)?;
    let root = context.load_tree(&assembly, Vec::new())?;
    let leaf = root
        .as_ref()
        .and_then(|r| r.find_leaf(id))
        .ok_or_else(|| BridgeError::invalid_args(format!("no test case with id '{}'", id)))?;
    let source_root = source_root.unwrap_or_else(|| context.config.project_root.clone());
    let locator = Arc::new(RustSourceLocator::new(source_root));
    let location = locate_with_timeout(locator, leaf, DEFAULT_LOCATE_TIMEOUT);
    emit(&LocateResponse::new(id, location))
}

fn execute_cache_clear(context: &Context, assembly: Option<&Path>) -> BridgeResult<()> {
    let results_dir = context.config.results_dir();
    let removed = match assembly {
        Some(assembly) => {
            let assembly = fs::canonicalize(assembly).unwrap_or_else(|_| assembly.to_path_buf());
            let cache = TestInfoCache::new(results_dir, &derive_store_id(&assembly));
            let existed = cache.path().exists();
            cache.clear()?;
            usize::from(existed)
        }
        None => clear_all(results_dir)?,
    };
    emit(&CacheClearResponse::new(removed))
}

// ============================================================================
// Helpers
// ============================================================================

/// Logs each finished case at info level.
struct LogProgress;

impl RunObserver for LogProgress {
    fn on_result(&mut self, result: &CaseResult) {
        info!(id = %result.id, outcome = ?result.outcome, time_secs = result.time_secs, "case finished");
    }
}

fn existing_assembly(assembly: &Path) -> BridgeResult<PathBuf> {
    fs::canonicalize(assembly).map_err(|_| BridgeError::assembly_not_found(assembly))
}

fn suite_name(assembly: &Path) -> String {
    assembly
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn emit<T: serde::Serialize>(response: &T) -> BridgeResult<()> {
    emit_response(response, &mut io::stdout()).map_err(|e| BridgeError::internal(e.to_string()))?;
    let _ = io::stdout().flush();
    Ok(())
}
