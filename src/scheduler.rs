//! Background loading of test trees.
//!
//! A [`LoadScheduler`] owns at most one thread, `test-loader`, which drains a
//! FIFO queue of [`LoadTarget`]s. The thread exits once the queue has been
//! empty for the idle timeout and is started again by the next enqueue.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use tracing::{debug, error, warn};

use testbridge_core::error::BridgeResult;
use testbridge_core::types::TestNode;

use crate::config::DEFAULT_IDLE_TIMEOUT;

/// Something whose tests the scheduler can load.
pub trait LoadTarget: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> String;

    /// Run discovery. Called on the loader thread.
    fn load(&self) -> BridgeResult<Option<TestNode>>;

    /// Receive the loaded tree. Called exactly once per processed item, with
    /// `None` when loading failed.
    fn on_loaded(&self, root: Option<TestNode>);
}

#[derive(Default)]
struct Queue {
    items: VecDeque<Arc<dyn LoadTarget>>,
    running: bool,
}

struct Shared {
    queue: Mutex<Queue>,
    available: Condvar,
    idle_timeout: Duration,
    threads_started: AtomicUsize,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle to a load queue. Clones share the queue and its thread.
#[derive(Clone)]
pub struct LoadScheduler {
    shared: Arc<Shared>,
}

impl Default for LoadScheduler {
    fn default() -> Self {
        LoadScheduler::new(DEFAULT_IDLE_TIMEOUT)
    }
}

impl LoadScheduler {
    pub fn new(idle_timeout: Duration) -> Self {
        LoadScheduler {
            shared: Arc::new(Shared {
                queue: Mutex::new(Queue::default()),
                available: Condvar::new(),
                idle_timeout,
                threads_started: AtomicUsize::new(0),
            }),
        }
    }

    /// Queue `target` for loading, starting the loader thread if needed.
    pub fn enqueue(&self, target: Arc<dyn LoadTarget>) {
        let mut queue = self.shared.lock();
        debug!(item = %target.name(), pending = queue.items.len(), "load queued");
        queue.items.push_back(target);
        if queue.running {
            drop(queue);
            self.shared.available.notify_one();
            return;
        }

        queue.running = true;
        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name("test-loader".to_string())
            .spawn(move || run_loader(&shared));
        match spawned {
            Ok(_) => {
                self.shared.threads_started.fetch_add(1, Ordering::SeqCst);
            }
            Err(e) => {
                warn!(error = %e, "cannot start loader thread, loading inline");
                queue.running = false;
                let items: Vec<_> = queue.items.drain(..).collect();
                drop(queue);
                for item in items {
                    process(item.as_ref());
                }
            }
        }
    }

    /// Items waiting to be processed.
    pub fn pending(&self) -> usize {
        self.shared.lock().items.len()
    }

    /// Whether a loader thread is currently alive.
    pub fn is_running(&self) -> bool {
        self.shared.lock().running
    }

    /// How many loader threads have been started so far.
    pub fn threads_started(&self) -> usize {
        self.shared.threads_started.load(Ordering::SeqCst)
    }

    pub fn idle_timeout(&self) -> Duration {
        self.shared.idle_timeout
    }
}

fn run_loader(shared: &Shared) {
    debug!("loader thread started");
    while let Some(item) = next_item(shared) {
        process(item.as_ref());
    }
    debug!("loader thread idle, exiting");
}

/// Next queued item, or `None` once the queue stayed empty for the idle
/// timeout. Clears the running flag under the lock before returning `None`.
fn next_item(shared: &Shared) -> Option<Arc<dyn LoadTarget>> {
    let mut queue = shared.lock();
    loop {
        if let Some(item) = queue.items.pop_front() {
            return Some(item);
        }
        let (guard, wait) = shared
            .available
            .wait_timeout(queue, shared.idle_timeout)
            .unwrap_or_else(PoisonError::into_inner);
        queue = guard;
        if wait.timed_out() && queue.items.is_empty() {
            queue.running = false;
            return None;
        }
    }
}

fn process(target: &dyn LoadTarget) {
    let name = target.name();
    let root = match panic::catch_unwind(AssertUnwindSafe(|| target.load())) {
        Ok(Ok(root)) => root,
        Ok(Err(err)) => {
            error!(item = %name, error = %err, "test load failed");
            None
        }
        Err(_) => {
            error!(item = %name, "test load panicked");
            None
        }
    };
    if panic::catch_unwind(AssertUnwindSafe(|| target.on_loaded(root))).is_err() {
        error!(item = %name, "load completion panicked");
    }
}
