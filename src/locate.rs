//! Source locations for test cases.
//!
//! Lookups scan source trees and may be slow on large projects, so hosts go
//! through [`locate_with_timeout`], which gives up after a bounded wait and
//! reports no location.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

use testbridge_core::types::TestLeaf;

/// Default bound for one lookup.
pub const DEFAULT_LOCATE_TIMEOUT: Duration = Duration::from_secs(2);

/// Where a test case is defined. Lines are 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceLocation {
    pub file: PathBuf,
    pub line: u32,
}

/// Resolves a leaf to the place it is defined.
pub trait SourceLocator: Send + Sync {
    fn locate(&self, leaf: &TestLeaf) -> Option<SourceLocation>;
}

/// Finds `fn <method>(` in the `.rs` files below a source root.
///
/// When several files define a function with that name, a file named after
/// the leaf's fixture wins, then one named after a namespace segment, then
/// the first match in file name order.
#[derive(Debug, Clone)]
pub struct RustSourceLocator {
    root: PathBuf,
}

impl RustSourceLocator {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        RustSourceLocator { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl SourceLocator for RustSourceLocator {
    fn locate(&self, leaf: &TestLeaf) -> Option<SourceLocation> {
        let method = leaf.method_name.as_str();
        if method.is_empty() {
            return None;
        }
        let (namespace, fixture) = leaf.fixture_parts();
        let namespace: Vec<&str> = namespace.split('.').filter(|s| !s.is_empty()).collect();

        let mut best: Option<(u8, SourceLocation)> = None;
        let files = WalkDir::new(&self.root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| !is_skipped_dir(e))
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "rs"));

        for entry in files {
            let Ok(content) = fs::read_to_string(entry.path()) else {
                continue;
            };
            let Some(line) = find_fn(&content, method) else {
                continue;
            };
            let location = SourceLocation {
                file: entry.path().to_path_buf(),
                line,
            };
            let stem = entry
                .path()
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default();
            if !fixture.is_empty() && stem == fixture {
                return Some(location);
            }
            let rank = if namespace.contains(&stem) { 1 } else { 2 };
            if best.as_ref().is_none_or(|(current, _)| rank < *current) {
                best = Some((rank, location));
            }
        }
        best.map(|(_, location)| location)
    }
}

fn is_skipped_dir(entry: &DirEntry) -> bool {
    if entry.depth() == 0 || !entry.file_type().is_dir() {
        return false;
    }
    let name = entry.file_name().to_string_lossy();
    name == "target" || name.starts_with('.')
}

/// 1-based line of the first `fn <name>(` in `content`.
fn find_fn(content: &str, name: &str) -> Option<u32> {
    let needle = format!("fn {}(", name);
    content.lines().enumerate().find_map(|(index, line)| {
        let at = line.find(&needle)?;
        let boundary = line[..at]
            .chars()
            .next_back()
            .is_none_or(|c| c.is_whitespace());
        if boundary {
            u32::try_from(index + 1).ok()
        } else {
            None
        }
    })
}

/// Run `locator` on a helper thread and wait at most `timeout`.
pub fn locate_with_timeout(
    locator: Arc<dyn SourceLocator>,
    leaf: &TestLeaf,
    timeout: Duration,
) -> Option<SourceLocation> {
    let (tx, rx) = mpsc::channel();
    let leaf = leaf.clone();
    let spawned = thread::Builder::new()
        .name("source-locator".to_string())
        .spawn(move || {
            let _ = tx.send(locator.locate(&leaf));
        });
    if let Err(e) = spawned {
        warn!(error = %e, "cannot start source lookup");
        return None;
    }
    match rx.recv_timeout(timeout) {
        Ok(location) => location,
        Err(_) => {
            debug!(timeout_ms = timeout.as_millis() as u64, "source lookup timed out");
            None
        }
    }
}
