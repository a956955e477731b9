use std::{num::NonZeroUsize, thread, time::Duration};

/// Work units every counter runner dispatches.
pub const COUNTER_UNITS: usize = 1000;
/// Tasks the ordered runner dispatches.
pub const ORDERED_TASKS: usize = 10;

// fewer than this and the racy counter may have nobody to race with
const MIN_WORKERS: usize = 4;

/// How a dispatch is carried out. The workload size isn't part of it: each runner fixes its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HarnessConfig {
    /// size of the worker thread pool the work units are spread over
    pub workers: NonZeroUsize,
    /// bound on the caller's barrier wait, `None` waits forever
    pub deadline: Option<Duration>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        let parallelism = thread::available_parallelism().map_or(1, NonZeroUsize::get);
        Self {
            workers: NonZeroUsize::new(parallelism.max(MIN_WORKERS)).unwrap_or(NonZeroUsize::MIN),
            deadline: None,
        }
    }
}

impl HarnessConfig {
    pub fn with_workers(mut self, workers: NonZeroUsize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}
