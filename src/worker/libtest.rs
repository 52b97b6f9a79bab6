//! Rust libtest binaries as test assemblies.
//!
//! Discovery runs `<bin> --list --format terse`, which prints one
//! `path::to::name: test` line per case, and `--ignored` to learn which cases
//! are ignored. Each case is then run on its own with
//! `--exact <name> --nocapture --test-threads=1`.

use std::collections::HashSet;
use std::path::Path;
use std::process::{Command, Output, Stdio};
use std::time::Instant;

use tracing::debug;

use testbridge_core::types::TestCaseDescriptor;

use super::framework::{
    CaseRun, DiscoveredCase, Failure, FrameworkError, FrameworkResult, TestFramework,
};

/// Reason reported for `#[ignore]` cases.
pub const IGNORED_REASON: &str = "ignored";

#[derive(Debug, Default, Clone, Copy)]
pub struct LibtestFramework;

impl TestFramework for LibtestFramework {
    fn name(&self) -> &'static str {
        "libtest"
    }

    fn discover(&self, assembly: &Path) -> FrameworkResult<Vec<DiscoveredCase>> {
        if !assembly.is_file() {
            return Err(FrameworkError::AssemblyNotFound {
                path: assembly.to_path_buf(),
            });
        }
        let all = parse_list(&list(assembly, false)?);
        let ignored: HashSet<String> = parse_list(&list(assembly, true)?).into_iter().collect();
        debug!(total = all.len(), ignored = ignored.len(), "listed libtest cases");

        Ok(all
            .into_iter()
            .map(|name| {
                let skip = ignored.contains(&name);
                let mut case = DiscoveredCase::new(descriptor_for(&name));
                if skip {
                    case.skip_reason = Some(IGNORED_REASON.to_string());
                }
                case
            })
            .collect())
    }

    fn run_case(&self, assembly: &Path, case: &DiscoveredCase) -> FrameworkResult<CaseRun> {
        let start = Instant::now();
        let output = Command::new(assembly)
            .args(["--exact", case.id(), "--nocapture", "--test-threads=1"])
            .stdin(Stdio::null())
            .output()?;
        let duration = start.elapsed();

        let text = combined_output(&output);
        if !ran_exactly_one(&text) {
            return Ok(CaseRun {
                duration,
                output: text,
                failure: Some(Failure {
                    exception_types: vec!["NotFound".to_string()],
                    messages: vec![format!("test '{}' was not run by the binary", case.id())],
                    stack_traces: vec![],
                }),
            });
        }
        if output.status.success() {
            return Ok(CaseRun::passed(duration, text));
        }
        let failure = parse_panic(&text).unwrap_or_else(|| Failure {
            exception_types: vec!["ExitStatus".to_string()],
            messages: vec![format!("test binary exited with {}", output.status)],
            stack_traces: vec![],
        });
        Ok(CaseRun {
            duration,
            output: text,
            failure: Some(failure),
        })
    }
}

fn list(assembly: &Path, ignored: bool) -> FrameworkResult<String> {
    let mut command = Command::new(assembly);
    command.args(["--list", "--format", "terse"]);
    if ignored {
        command.arg("--ignored");
    }
    let output = command.stdin(Stdio::null()).output()?;
    if !output.status.success() {
        return Err(FrameworkError::ListingFailed {
            path: assembly.to_path_buf(),
            reason: format!(
                "{}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Names of the `: test` entries of a terse listing. Benchmarks and any other
/// lines are dropped.
pub fn parse_list(listing: &str) -> Vec<String> {
    listing
        .lines()
        .filter_map(|line| line.trim().strip_suffix(": test"))
        .map(str::to_string)
        .collect()
}

/// `a::b::c` becomes type `a.b`, method `c`. The full path stays the id.
pub fn descriptor_for(name: &str) -> TestCaseDescriptor {
    match name.rsplit_once("::") {
        Some((module, method)) => {
            TestCaseDescriptor::new(name, module.replace("::", "."), method)
        }
        None => TestCaseDescriptor::new(name, "", name),
    }
}

fn combined_output(output: &Output) -> String {
    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.is_empty() {
        if !text.is_empty() && !text.ends_with('\n') {
            text.push('\n');
        }
        text.push_str(&stderr);
    }
    text
}

fn ran_exactly_one(output: &str) -> bool {
    output.lines().any(|line| line.trim() == "running 1 test")
}

/// Extract the panic message and location from libtest output:
///
/// ```text
/// thread 'tests::it_fails' panicked at src/lib.rs:10:9:
/// assertion `left == right` failed
/// ```
pub fn parse_panic(output: &str) -> Option<Failure> {
    let mut lines = output.lines();
    while let Some(line) = lines.next() {
        let Some(rest) = line.split_once("panicked at ").map(|(_, rest)| rest) else {
            continue;
        };
        // Older toolchains: `panicked at 'message', src/lib.rs:10:9`.
        if let Some(quoted) = rest.strip_prefix('\'') {
            if let Some((message, location)) = quoted.rsplit_once("', ") {
                return Some(panic_failure(message, location));
            }
        }
        let location = rest.trim_end_matches(':');
        let message: Vec<&str> = lines
            .by_ref()
            .take_while(|l| !l.starts_with("note:") && !l.trim().is_empty())
            .collect();
        return Some(panic_failure(&message.join("\n"), location));
    }
    None
}

fn panic_failure(message: &str, location: &str) -> Failure {
    Failure {
        exception_types: vec!["panic".to_string()],
        messages: vec![message.to_string()],
        stack_traces: vec![format!("at {}", location)],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_terse_listing() {
        let listing = "\
tests::parser::parses_empty: test
tests::parser::parses_nested: test
benches::fast: bench
top_level: test

3 tests, 1 benchmarks
";
        assert_eq!(
            parse_list(listing),
            vec![
                "tests::parser::parses_empty",
                "tests::parser::parses_nested",
                "top_level"
            ]
        );
    }

    #[test]
    fn descriptor_splits_module_path() {
        let d = descriptor_for("tests::parser::parses_empty");
        assert_eq!(d.id, "tests::parser::parses_empty");
        assert_eq!(d.type_name, "tests.parser");
        assert_eq!(d.method_name, "parses_empty");

        let d = descriptor_for("top_level");
        assert_eq!(d.type_name, "");
        assert_eq!(d.method_name, "top_level");
    }

    #[test]
    fn parse_modern_panic() {
        let output = "\
running 1 test
thread 'tests::fails' panicked at src/lib.rs:10:9:
assertion `left == right` failed
  left: 1
 right: 2
note: run with `RUST_BACKTRACE=1` environment variable to display a backtrace
test tests::fails ... FAILED
";
        let failure = parse_panic(output).unwrap();
        assert_eq!(failure.exception_types, vec!["panic"]);
        assert_eq!(
            failure.messages,
            vec!["assertion `left == right` failed\n  left: 1\n right: 2"]
        );
        assert_eq!(failure.stack_traces, vec!["at src/lib.rs:10:9"]);
    }

    #[test]
    fn parse_legacy_panic() {
        let output = "thread 'main' panicked at 'boom', src/main.rs:3:5\n";
        let failure = parse_panic(output).unwrap();
        assert_eq!(failure.messages, vec!["boom"]);
        assert_eq!(failure.stack_traces, vec!["at src/main.rs:3:5"]);
    }

    #[test]
    fn no_panic_in_output() {
        assert!(parse_panic("running 1 test\ntest x ... ok\n").is_none());
    }

    #[test]
    fn missing_binary_is_not_found() {
        let err = LibtestFramework
            .discover(Path::new("/no/such/test-binary"))
            .unwrap_err();
        assert!(matches!(err, FrameworkError::AssemblyNotFound { .. }));
    }
}
