//! Persistent test info cache.
//!
//! Stores the discovered test tree of one assembly together with the identity
//! of the assembly it was discovered from, so a later load can skip discovery
//! when the assembly has not changed.
//!
//! ```text
//! <results_dir>/
//! └── <store_id>.test-cache.json
//! ```
//!
//! The cache is best effort. Any read failure (missing file, unreadable file,
//! corrupt JSON, unknown format version) is reported as a miss.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, warn};

use crate::types::TestNode;

// ============================================================================
// Constants
// ============================================================================

/// On-disk format version. Entries with another version are ignored.
pub const CACHE_FORMAT_VERSION: u32 = 1;

/// File name suffix of cache files.
pub const CACHE_FILE_SUFFIX: &str = ".test-cache.json";

// ============================================================================
// Error Types
// ============================================================================

/// Errors from writing or clearing the cache.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type CacheResult<T> = Result<T, CacheError>;

// ============================================================================
// Assembly Identity
// ============================================================================

/// Identity of an assembly: its path plus its last-write timestamp.
///
/// Two identities are equal iff both fields are equal. A missing timestamp
/// means the file could not be inspected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssemblyIdentity {
    pub path: PathBuf,
    /// Last modification time in nanoseconds since the Unix epoch.
    pub last_write: Option<u64>,
}

impl AssemblyIdentity {
    pub fn new(path: impl Into<PathBuf>, last_write: Option<u64>) -> Self {
        AssemblyIdentity {
            path: path.into(),
            last_write,
        }
    }

    /// Read the identity of the file at `path` from the filesystem.
    pub fn of_file(path: &Path) -> Self {
        let last_write = fs::metadata(path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .and_then(|d| u64::try_from(d.as_nanos()).ok());
        AssemblyIdentity::new(path, last_write)
    }

    /// Whether the file existed when inspected.
    pub fn exists(&self) -> bool {
        self.last_write.is_some()
    }
}

// ============================================================================
// Cache Entries
// ============================================================================

/// What one cache file holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub version: u32,
    pub assembly: AssemblyIdentity,
    pub root: Option<TestNode>,
}

/// Derive a store id for an assembly: its file name plus a short hash of the
/// full path, so two assemblies with the same file name do not collide.
pub fn derive_store_id(assembly_path: &Path) -> String {
    let absolute = if assembly_path.is_absolute() {
        assembly_path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(assembly_path))
            .unwrap_or_else(|_| assembly_path.to_path_buf())
    };
    let digest = Sha256::digest(absolute.to_string_lossy().as_bytes());
    let file_name = assembly_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "assembly".to_string());
    format!("{}-{}", file_name, &hex::encode(digest)[..12])
}

// ============================================================================
// Test Info Cache
// ============================================================================

/// File-backed cache for one assembly's discovered tree.
#[derive(Debug, Clone)]
pub struct TestInfoCache {
    path: PathBuf,
}

impl TestInfoCache {
    pub fn new(results_dir: impl AsRef<Path>, store_id: &str) -> Self {
        TestInfoCache {
            path: results_dir
                .as_ref()
                .join(format!("{}{}", store_id, CACHE_FILE_SUFFIX)),
        }
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the stored entry. Any failure is a miss.
    pub fn get(&self) -> Option<CacheEntry> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "test cache unreadable");
                return None;
            }
        };
        match serde_json::from_str::<CacheEntry>(&content) {
            Ok(entry) if entry.version == CACHE_FORMAT_VERSION => Some(entry),
            Ok(entry) => {
                debug!(
                    path = %self.path.display(),
                    version = entry.version,
                    "ignoring test cache with other format version"
                );
                None
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "test cache corrupt");
                None
            }
        }
    }

    /// The stored tree, but only if it was discovered from `identity`.
    pub fn lookup(&self, identity: &AssemblyIdentity) -> Option<Option<TestNode>> {
        self.get()
            .filter(|entry| &entry.assembly == identity)
            .map(|entry| entry.root)
    }

    /// Persist a tree for `identity`, replacing any previous entry.
    pub fn set(&self, identity: &AssemblyIdentity, root: Option<&TestNode>) -> CacheResult<()> {
        let entry = CacheEntry {
            version: CACHE_FORMAT_VERSION,
            assembly: identity.clone(),
            root: root.cloned(),
        };
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_vec_pretty(&entry)?;
        atomic_write(&self.path, &content)?;
        debug!(path = %self.path.display(), "test cache written");
        Ok(())
    }

    /// Remove the stored entry. Clearing an absent cache is not an error.
    pub fn clear(&self) -> CacheResult<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Remove every cache file in `results_dir`. Returns how many were removed.
pub fn clear_all(results_dir: &Path) -> CacheResult<usize> {
    let entries = match fs::read_dir(results_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };
    let mut removed = 0;
    for entry in entries {
        let path = entry?.path();
        let is_cache = path
            .file_name()
            .map(|n| n.to_string_lossy().ends_with(CACHE_FILE_SUFFIX))
            .unwrap_or(false);
        if is_cache {
            fs::remove_file(&path)?;
            removed += 1;
        }
    }
    Ok(removed)
}

/// Write through a uniquely named temp file and rename over the target, so
/// concurrent readers see either the old or the new content.
fn atomic_write(path: &Path, content: &[u8]) -> io::Result<()> {
    let nanos = std::time::SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let temp_path = path.with_file_name(format!(
        ".{}.{}.{}.tmp",
        path.file_name().unwrap_or_default().to_string_lossy(),
        std::process::id(),
        nanos
    ));
    fs::write(&temp_path, content)?;
    if let Err(e) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(e);
    }
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
