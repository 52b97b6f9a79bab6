//! JSON test manifests as test assemblies.
//!
//! ```json
//! {
//!   "cases": [
//!     { "id": "1", "type": "Math.Adder", "method": "AddsTwo", "command": ["./add", "1", "1"] },
//!     { "id": "2", "type": "Math.Adder", "method": "Adds", "args": [1, null], "skip": "flaky" }
//!   ]
//! }
//! ```
//!
//! A case passes when its command exits with status 0. Commands run in the
//! manifest's directory; a case without a command passes with no output.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use serde::Deserialize;
use serde_json::Value;

use testbridge_core::types::TestCaseDescriptor;

use super::framework::{
    CaseRun, DiscoveredCase, Failure, FrameworkError, FrameworkResult, TestFramework,
};

#[derive(Debug, Deserialize)]
struct Manifest {
    #[serde(default)]
    cases: Vec<ManifestCase>,
}

#[derive(Debug, Deserialize)]
struct ManifestCase {
    id: String,
    #[serde(rename = "type", default)]
    type_name: String,
    method: String,
    #[serde(default)]
    args: Vec<Value>,
    #[serde(default)]
    command: Option<Vec<String>>,
    #[serde(default)]
    skip: Option<String>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ManifestFramework;

impl TestFramework for ManifestFramework {
    fn name(&self) -> &'static str {
        "manifest"
    }

    fn discover(&self, assembly: &Path) -> FrameworkResult<Vec<DiscoveredCase>> {
        let content = match fs::read_to_string(assembly) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(FrameworkError::AssemblyNotFound {
                    path: assembly.to_path_buf(),
                })
            }
            Err(e) => return Err(e.into()),
        };
        let manifest: Manifest =
            serde_json::from_str(&content).map_err(|e| FrameworkError::InvalidManifest {
                path: assembly.to_path_buf(),
                reason: e.to_string(),
            })?;

        let base_dir = manifest_dir(assembly);
        Ok(manifest
            .cases
            .into_iter()
            .map(|c| DiscoveredCase {
                descriptor: TestCaseDescriptor::new(c.id, c.type_name, c.method)
                    .with_arguments(c.args),
                skip_reason: c.skip,
                command: c.command,
                working_dir: Some(base_dir.clone()),
            })
            .collect())
    }

    fn run_case(&self, assembly: &Path, case: &DiscoveredCase) -> FrameworkResult<CaseRun> {
        let Some((program, args)) = case.command.as_deref().and_then(|c| c.split_first()) else {
            return Ok(CaseRun::passed(Duration::ZERO, String::new()));
        };
        let working_dir = case
            .working_dir
            .clone()
            .unwrap_or_else(|| manifest_dir(assembly));

        let start = Instant::now();
        // Relative programs resolve against the manifest directory.
        let program_path = if program.contains('/') && Path::new(program).is_relative() {
            working_dir.join(program)
        } else {
            PathBuf::from(program)
        };
        let output = Command::new(&program_path)
            .args(args)
            .current_dir(&working_dir)
            .stdin(Stdio::null())
            .output()?;
        let duration = start.elapsed();

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));

        if output.status.success() {
            return Ok(CaseRun::passed(duration, text));
        }
        let last_line = text.lines().rev().find(|l| !l.trim().is_empty());
        let mut messages = vec![format!("command exited with {}", output.status)];
        if let Some(line) = last_line {
            messages.push(line.trim().to_string());
        }
        Ok(CaseRun {
            duration,
            output: text,
            failure: Some(Failure {
                exception_types: vec!["ExitStatus".to_string()],
                messages,
                stack_traces: vec![],
            }),
        })
    }
}

fn manifest_dir(assembly: &Path) -> PathBuf {
    assembly
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}
