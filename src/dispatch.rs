//! # Fan-out dispatch
//!
//! Every runner is the same skeleton:
//! - create every work unit up front and register them all on a [CompletionBarrier]
//! - deal the units round-robin into one queue per worker, unit `i` goes to worker `i % workers`
//! - spawn the scoped worker threads, each one drains its own queue and signals the barrier per unit
//! - the caller blocks on the barrier exactly once, then reads whatever the units produced
//!
//! Assignment is fixed before the first thread starts => a unit's id says where it was dealt,
//! not when it ran. When it runs is up to the scheduler.
//!
//! Workers are OS threads => preemptible and truly parallel, the scheduler interleaves them as it likes.
//! The pool is bounded by [HarnessConfig::workers], so 100k units don't mean 100k threads.
//!
//! A worker that unwinds before signalling abandons the barrier, so the caller doesn't sleep forever.
//! The panic itself is re-raised in the caller when the scope joins.

use std::{
    panic,
    sync::atomic::{AtomicBool, Ordering::Relaxed},
    thread::{self, Scope, ScopedJoinHandle},
    time::{Duration, Instant},
};

use tracing::{debug, error, warn};

use crate::{
    barrier::{CompletionBarrier, WaitOutcome},
    config::HarnessConfig,
    error::HarnessError,
};

/// One unit of work. Ids run 0..units in dispatch order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkUnit {
    pub id: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReport {
    pub units: usize,
    pub workers: usize,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct Dispatcher {
    config: HarnessConfig,
}

/// Abandons the barrier if the worker holding it unwinds.
struct AbandonOnUnwind<'a>(&'a CompletionBarrier);

impl Drop for AbandonOnUnwind<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            self.0.abandon();
        }
    }
}

/// What the workers share. Lives on the dispatching caller's stack for the whole scope.
struct Board<'w, F> {
    barrier: CompletionBarrier,
    cancelled: AtomicBool,
    work: &'w F,
}

impl<F> Board<'_, F> {
    fn run_worker<U>(&self, queue: Vec<U>)
    where
        F: Fn(U),
    {
        let _abandon = AbandonOnUnwind(&self.barrier);
        for unit in queue {
            if self.cancelled.load(Relaxed) {
                return;
            }
            (self.work)(unit);
            self.barrier.done();
        }
    }
}

/// Unit `i` lands in queue `i % workers`, each queue keeps dispatch order.
fn deal<U>(units: Vec<U>, workers: usize) -> Vec<Vec<U>> {
    if workers == 0 {
        return Vec::new();
    }
    let per_worker = units.len().div_ceil(workers);
    let mut queues: Vec<Vec<U>> = (0..workers)
        .map(|_| Vec::with_capacity(per_worker))
        .collect();
    for (i, unit) in units.into_iter().enumerate() {
        queues[i % workers].push(unit);
    }
    queues
}

impl Dispatcher {
    pub fn new(config: HarnessConfig) -> Self {
        Self { config }
    }

    /// Creates the units 0..units, then runs `work` once for each of them.
    ///
    /// See [Self::dispatch_units].
    pub fn dispatch<F>(&self, units: usize, work: F) -> Result<DispatchReport, HarnessError>
    where
        F: Fn(WorkUnit) + Sync,
    {
        self.dispatch_units((0..units).map(|id| WorkUnit { id }).collect(), work)
    }

    /// Runs `work` once for every one of the already created `units` and returns after all of them finished.
    ///
    /// # Errors
    /// - [HarnessError::DeadlineExceeded] if the configured deadline passed first.
    ///   Units not started yet are dropped, started ones still run to completion before this returns.
    /// - [HarnessError::Spawn] if a worker thread couldn't be started. Its queue would never drain,
    ///   so the whole dispatch is cancelled.
    ///
    /// # Panics
    /// Re-raises a panic of `work`.
    pub fn dispatch_units<U, F>(
        &self,
        units: Vec<U>,
        work: F,
    ) -> Result<DispatchReport, HarnessError>
    where
        U: Send,
        F: Fn(U) + Sync,
    {
        let total = units.len();
        let workers = self.config.workers.get().min(total);
        let queues = deal(units, workers);
        let board = Board {
            barrier: CompletionBarrier::new(total),
            cancelled: AtomicBool::new(false),
            work: &work,
        };

        debug!(units = total, workers, deadline = ?self.config.deadline, "dispatching work units");
        let start = Instant::now();

        let outcome = thread::scope(|s| {
            let handles = self.spawn_workers(s, &board, queues)?;

            let outcome = match self.config.deadline {
                Some(deadline) => board.barrier.wait_timeout(deadline),
                None => board.barrier.wait(),
            };
            if outcome != WaitOutcome::Completed {
                board.cancelled.store(true, Relaxed);
            }
            if let WaitOutcome::Abandoned { outstanding } = outcome {
                error!(outstanding, "a worker died before signalling completion");
            }

            // join by hand so the caller gets the worker's own panic, not a generic one
            for h in handles {
                if let Err(payload) = h.join() {
                    panic::resume_unwind(payload);
                }
            }
            Ok::<_, HarnessError>(outcome)
        })?;

        let elapsed = start.elapsed();
        match outcome {
            WaitOutcome::Completed => {
                debug!(units = total, ?elapsed, "all work units completed");
                Ok(DispatchReport {
                    units: total,
                    workers,
                    elapsed,
                })
            }
            WaitOutcome::TimedOut { outstanding } => {
                let deadline = self.config.deadline.unwrap_or_default();
                warn!(outstanding, units = total, ?deadline, "deadline exceeded");
                Err(HarnessError::DeadlineExceeded {
                    outstanding,
                    units: total,
                    deadline,
                })
            }
            // a worker panic has been re-raised above by now
            WaitOutcome::Abandoned { .. } => unreachable!("abandoned barrier outlived its scope"),
        }
    }

    fn spawn_workers<'scope, 'env, U, F>(
        &self,
        s: &'scope Scope<'scope, 'env>,
        board: &'env Board<'env, F>,
        queues: Vec<Vec<U>>,
    ) -> Result<Vec<ScopedJoinHandle<'scope, ()>>, HarnessError>
    where
        U: Send + 'env,
        F: Fn(U) + Sync,
    {
        let mut handles = Vec::with_capacity(queues.len());
        for (w, queue) in queues.into_iter().enumerate() {
            let spawned = thread::Builder::new()
                .name(format!("worker-{w}"))
                .spawn_scoped(s, move || board.run_worker(queue));
            match spawned {
                Ok(h) => handles.push(h),
                Err(e) => {
                    // the queue went down with the closure, the barrier can't reach zero anymore
                    warn!(worker = w, error = %e, "worker failed to start, cancelling");
                    board.cancelled.store(true, Relaxed);
                    return Err(HarnessError::Spawn(e));
                }
            }
        }
        Ok(handles)
    }
}
