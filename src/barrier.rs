//! # Completion barrier
//!
//! Counts outstanding work units down to zero and lets exactly one waiter block until it gets there.
//!
//! The count is an atomic, so [CompletionBarrier::done] is a single `fetch_update` for every unit but the last.
//! Only the last unit (or an abandoning one) takes the mutex to notify the waiter.
//!
//! ## Memory ordering
//!
//! Each `done` releases, the waiter acquires the same atomic.
//! Once the waiter sees 0, everything each unit did before its `done` happens-before the waiter's next line.
//! That is what makes the caller's final read of a counter safe, not the counter's own ordering.
//!
//! ## Lost wake-ups
//!
//! The waiter checks the count while holding `lock`, the last unit notifies while holding `lock`
//! => the notification can't slip in between the check and the sleep.

use std::{
    sync::{
        atomic::{
            AtomicBool, AtomicUsize,
            Ordering::{AcqRel, Acquire, Release},
        },
        Condvar, Mutex, MutexGuard,
    },
    time::{Duration, Instant},
};

/// How a wait on the barrier ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// every registered unit has signalled
    Completed,
    /// the deadline passed, `outstanding` units still hadn't signalled
    TimedOut { outstanding: usize },
    /// a unit unwound before signalling, the count will never reach zero
    Abandoned { outstanding: usize },
}

pub struct CompletionBarrier {
    units: usize,
    outstanding: AtomicUsize,
    abandoned: AtomicBool,
    lock: Mutex<()>,
    all_done: Condvar,
}

impl CompletionBarrier {
    /// The target count is fixed here and never changes afterwards.
    pub fn new(units: usize) -> Self {
        Self {
            units,
            outstanding: AtomicUsize::new(units),
            abandoned: AtomicBool::new(false),
            lock: Mutex::new(()),
            all_done: Condvar::new(),
        }
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Acquire)
    }

    /// Signals one finished unit.
    ///
    /// # Panics
    /// If called more times than units were registered. The count is left as is.
    pub fn done(&self) {
        let previous = self
            .outstanding
            .fetch_update(AcqRel, Acquire, |n| n.checked_sub(1))
            .unwrap_or_else(|_| {
                panic!(
                    "completion barrier signalled more than its {} registered units",
                    self.units
                )
            });
        if previous == 1 {
            self.notify();
        }
    }

    /// Tells the waiter the count will never reach zero.
    pub fn abandon(&self) {
        self.abandoned.store(true, Release);
        self.notify();
    }

    fn notify(&self) {
        let _g = self.guard();
        self.all_done.notify_all();
    }

    // the mutex protects nothing but the check-then-sleep window => a poisoned one is still usable
    fn guard(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn settled(&self) -> Option<WaitOutcome> {
        let outstanding = self.outstanding.load(Acquire);
        if outstanding == 0 {
            Some(WaitOutcome::Completed)
        } else if self.abandoned.load(Acquire) {
            Some(WaitOutcome::Abandoned { outstanding })
        } else {
            None
        }
    }

    /// Blocks until every unit signalled or the barrier got abandoned.
    pub fn wait(&self) -> WaitOutcome {
        let mut g = self.guard();
        loop {
            if let Some(outcome) = self.settled() {
                return outcome;
            }
            g = self.all_done.wait(g).unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Same as [Self::wait], but gives up once `deadline` has passed.
    ///
    /// A deadline too far out to be represented as an [Instant] means no deadline.
    pub fn wait_timeout(&self, deadline: Duration) -> WaitOutcome {
        let Some(until) = Instant::now().checked_add(deadline) else {
            return self.wait();
        };
        let mut g = self.guard();
        loop {
            if let Some(outcome) = self.settled() {
                return outcome;
            }
            let now = Instant::now();
            if now >= until {
                return WaitOutcome::TimedOut {
                    outstanding: self.outstanding.load(Acquire),
                };
            }
            // spurious wake-ups and early notifications just loop around
            g = self
                .all_done
                .wait_timeout(g, until - now)
                .map(|(g, _)| g)
                .unwrap_or_else(|e| e.into_inner().0);
        }
    }
}
