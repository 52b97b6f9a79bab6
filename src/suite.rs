//! Per-assembly test suite with cached, single-flight loading.
//!
//! An [`AssemblySuite`] moves between [`SuiteStatus::NotLoaded`],
//! [`SuiteStatus::Loading`] and [`SuiteStatus::Ready`]. Only the caller that
//! moves it into `Loading` enqueues a load; everyone else waits on the
//! condition variable until the loader publishes the new tree.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

use testbridge_core::cache::{derive_store_id, AssemblyIdentity, TestInfoCache};
use testbridge_core::error::BridgeResult;
use testbridge_core::types::TestNode;

use crate::scheduler::{LoadScheduler, LoadTarget};

/// Load state of a suite.
///
/// Loads move a suite from `NotLoaded` or `Ready` through `Loading` to
/// `Ready`. A cache hit in [`AssemblySuite::create_tests`] publishes the
/// cached tree directly, going from `NotLoaded` to `Ready` without passing
/// through `Loading`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuiteStatus {
    NotLoaded,
    Loading,
    Ready,
}

/// Discovers the test tree of an assembly.
pub trait TestDiscoverer: Send + Sync {
    fn discover(&self, assembly: &Path, support_paths: &[PathBuf]) -> BridgeResult<Option<TestNode>>;
}

impl<D: TestDiscoverer + ?Sized> TestDiscoverer for Arc<D> {
    fn discover(&self, assembly: &Path, support_paths: &[PathBuf]) -> BridgeResult<Option<TestNode>> {
        (**self).discover(assembly, support_paths)
    }
}

/// Told whenever a suite publishes a tree.
pub trait SuiteObserver: Send + Sync {
    fn on_tests_loaded(&self, assembly: &Path, root: Option<&TestNode>);
}

#[derive(Debug)]
struct SuiteState {
    status: SuiteStatus,
    /// Assembly timestamp the current (or in-flight) tree belongs to.
    last_assembly_time: Option<u64>,
    tree: Option<Arc<TestNode>>,
    /// The in-flight load was served from the cache file.
    from_cache: bool,
}

/// The tests of one assembly.
pub struct AssemblySuite {
    assembly: PathBuf,
    support_paths: Vec<PathBuf>,
    cache: TestInfoCache,
    discoverer: Arc<dyn TestDiscoverer>,
    scheduler: LoadScheduler,
    observer: Option<Arc<dyn SuiteObserver>>,
    state: Mutex<SuiteState>,
    changed: Condvar,
}

impl AssemblySuite {
    /// A suite whose cache file lives in `results_dir`.
    pub fn new(
        assembly: impl Into<PathBuf>,
        results_dir: &Path,
        discoverer: Arc<dyn TestDiscoverer>,
        scheduler: LoadScheduler,
    ) -> Self {
        let assembly = assembly.into();
        let cache = TestInfoCache::new(results_dir, &derive_store_id(&assembly));
        AssemblySuite {
            assembly,
            support_paths: Vec::new(),
            cache,
            discoverer,
            scheduler,
            observer: None,
            state: Mutex::new(SuiteState {
                status: SuiteStatus::NotLoaded,
                last_assembly_time: None,
                tree: None,
                from_cache: false,
            }),
            changed: Condvar::new(),
        }
    }

    pub fn with_support_paths(mut self, support_paths: Vec<PathBuf>) -> Self {
        self.support_paths = support_paths;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn SuiteObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn assembly(&self) -> &Path {
        &self.assembly
    }

    pub fn support_paths(&self) -> &[PathBuf] {
        &self.support_paths
    }

    pub fn cache(&self) -> &TestInfoCache {
        &self.cache
    }

    pub fn status(&self) -> SuiteStatus {
        self.lock().status
    }

    /// The current tree, without waiting.
    pub fn tree(&self) -> Option<Arc<TestNode>> {
        self.lock().tree.clone()
    }

    /// Whether the assembly changed since the tree was loaded.
    pub fn refresh_required(&self) -> bool {
        let live = self.live_time();
        let state = self.lock();
        match state.status {
            SuiteStatus::NotLoaded => true,
            SuiteStatus::Loading => false,
            SuiteStatus::Ready => state.last_assembly_time != live,
        }
    }

    /// Start loading, from the cache when it matches the assembly on disk
    /// and through the scheduler otherwise. Returns at once.
    pub fn create_tests(self: &Arc<Self>) {
        if self.status() == SuiteStatus::Loading {
            return;
        }
        let identity = AssemblyIdentity::of_file(&self.assembly);
        let cached = self.cached_tree(&identity);

        let mut state = self.lock();
        if state.status == SuiteStatus::Loading {
            return;
        }
        state.last_assembly_time = identity.last_write;
        match cached {
            Some(root) => {
                debug!(assembly = %self.assembly.display(), "using cached tests");
                let tree = root.map(Arc::new);
                state.status = SuiteStatus::Ready;
                state.tree = tree.clone();
                drop(state);
                self.changed.notify_all();
                self.notify_observer(tree.as_deref());
            }
            None => {
                state.status = SuiteStatus::Loading;
                drop(state);
                self.enqueue();
            }
        }
    }

    /// Bring the tree up to date and return it. Blocks while a load is in
    /// flight. Concurrent callers share one load, which is served from the
    /// cache when it matches the assembly on disk.
    pub fn refresh(self: &Arc<Self>) -> Option<Arc<TestNode>> {
        let live = self.live_time();
        let mut state = self.wait_while_loading(self.lock());
        if state.status == SuiteStatus::NotLoaded || state.last_assembly_time != live {
            info!(assembly = %self.assembly.display(), "reloading tests");
            state.status = SuiteStatus::Loading;
            state.last_assembly_time = live;
            drop(state);
            self.enqueue();
            state = self.wait_while_loading(self.lock());
        }
        state.tree.clone()
    }

    /// Publish a loaded tree and wake every waiter.
    pub fn on_loaded(&self, root: Option<TestNode>) {
        let tree = root.map(Arc::new);
        let (last_assembly_time, from_cache) = {
            let mut state = self.lock();
            (state.last_assembly_time, std::mem::take(&mut state.from_cache))
        };
        if let (Some(tree), false) = (&tree, from_cache) {
            let identity = AssemblyIdentity::new(self.assembly.clone(), last_assembly_time);
            if let Err(err) = self.cache.set(&identity, Some(tree.as_ref())) {
                warn!(cache = %self.cache.path().display(), error = %err, "cannot write test cache");
            }
        }

        {
            let mut state = self.lock();
            state.status = SuiteStatus::Ready;
            state.tree = tree.clone();
        }
        self.changed.notify_all();
        info!(
            assembly = %self.assembly.display(),
            leaves = tree.as_ref().map(|t| t.leaves().len()).unwrap_or(0),
            "tests loaded"
        );
        self.notify_observer(tree.as_deref());
    }

    fn enqueue(self: &Arc<Self>) {
        let target: Arc<dyn LoadTarget> = Arc::clone(self) as Arc<dyn LoadTarget>;
        self.scheduler.enqueue(target);
    }

    fn notify_observer(&self, root: Option<&TestNode>) {
        if let Some(observer) = &self.observer {
            observer.on_tests_loaded(&self.assembly, root);
        }
    }

    /// The cached tree for `identity`, if the entry was written for exactly
    /// that file state.
    fn cached_tree(&self, identity: &AssemblyIdentity) -> Option<Option<TestNode>> {
        if !identity.exists() {
            return None;
        }
        self.cache.lookup(identity)
    }

    fn live_time(&self) -> Option<u64> {
        AssemblyIdentity::of_file(&self.assembly).last_write
    }

    fn lock(&self) -> MutexGuard<'_, SuiteState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait_while_loading<'a>(
        &self,
        guard: MutexGuard<'a, SuiteState>,
    ) -> MutexGuard<'a, SuiteState> {
        self.changed
            .wait_while(guard, |state| state.status == SuiteStatus::Loading)
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl LoadTarget for AssemblySuite {
    fn name(&self) -> String {
        self.assembly.display().to_string()
    }

    fn load(&self) -> BridgeResult<Option<TestNode>> {
        let last_assembly_time = self.lock().last_assembly_time;
        let identity = AssemblyIdentity::new(self.assembly.clone(), last_assembly_time);
        if let Some(root) = self.cached_tree(&identity) {
            debug!(assembly = %self.assembly.display(), "using cached tests");
            self.lock().from_cache = true;
            return Ok(root);
        }
        self.discoverer.discover(&self.assembly, &self.support_paths)
    }

    fn on_loaded(&self, root: Option<TestNode>) {
        AssemblySuite::on_loaded(self, root);
    }
}
