//! Tracking of in-flight background artifact work.
//!
//! Saves are scheduled while a run is in progress and finish on their own
//! time; shutdown must not return while any of them is still pending, so a
//! write never races process exit.

use std::future::Future;
use tokio::runtime::Handle;
use tokio_util::task::TaskTracker;

/// Counts scheduled background writes so shutdown can wait for them.
///
/// Uses its own tracking, orthogonal to the execution handle: scheduling and
/// completion never touch interpreter state.
pub struct BackgroundTasks {
    tracker: TaskTracker,
}

impl BackgroundTasks {
    pub fn new() -> BackgroundTasks {
        BackgroundTasks {
            tracker: TaskTracker::new(),
        }
    }

    /// Start `work` on the runtime. It is accounted for until it completes,
    /// whatever the outcome.
    pub fn schedule<F>(&self, rt: &Handle, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tracker.spawn_on(work, rt);
    }

    /// Number of tasks still in flight.
    pub fn pending(&self) -> usize {
        self.tracker.len()
    }

    /// Stop accepting new work and block until every scheduled task has
    /// finished.
    pub fn wait(&self, rt: &Handle) {
        self.tracker.close();
        rt.block_on(self.tracker.wait());
    }
}

impl Default for BackgroundTasks {
    fn default() -> BackgroundTasks {
        BackgroundTasks::new()
    }
}
