//! # Shared counters
//!
//! One counter type per discipline. A counter instance is never touched through two disciplines.
//!
//! [RacyCounter] does what `counter += 1` does on a plain integer: load, add, store, as 3 separate steps.
//! A real unsynchronized `u64` write from many threads is undefined behaviour in Rust,
//! so the steps are spelled out with Relaxed atomics: each access is well-defined, the read-modify-write as a whole isn't atomic.
//! The lost updates are the same ones the plain integer would show, minus the UB.
//!
//! Two more disciplines sit between the atomic and the mutex:
//! - [OptimisticCounter] reads without locking and commits with a compare & exchange.
//!   A commit fails if somebody got in between, then it re-reads and tries again.
//!   After [MAX_ATTEMPTS] failed commits in a row it backs off before the next round.
//! - [TryLockCounter] never sleeps on the lock: it tries to take it, and yields and retries if it's taken.
//!
//! Both count how often they had to retry, see [SharedCounter::retries].

use std::{
    sync::atomic::{AtomicU64, Ordering::Relaxed},
    thread,
};

use strum_macros::{Display, EnumIter, EnumString};

use crate::lock::ExclusionLock;

/// Counter disciplines the runners can be built on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, EnumString, Display)]
#[strum(serialize_all = "snake_case")]
pub enum Strategy {
    Unsynchronized,
    Atomic,
    Mutex,
    Optimistic,
    TryLock,
}

impl Strategy {
    /// Whether the final count is guaranteed to equal the number of increments.
    pub fn is_exact(self) -> bool {
        !matches!(self, Self::Unsynchronized)
    }

    pub fn counter(self) -> Box<dyn SharedCounter> {
        match self {
            Self::Unsynchronized => Box::new(RacyCounter::default()),
            Self::Atomic => Box::new(AtomicCounter::default()),
            Self::Mutex => Box::new(LockedCounter::default()),
            Self::Optimistic => Box::new(OptimisticCounter::default()),
            Self::TryLock => Box::new(TryLockCounter::default()),
        }
    }
}

pub trait SharedCounter: Send + Sync {
    fn increment(&self);

    /// Only meaningful once every increment is known to have finished.
    fn value(&self) -> u64;

    /// Increments that had to be attempted again because of contention.
    fn retries(&self) -> u64 {
        0
    }
}

/// Lost updates welcome.
#[derive(Debug, Default)]
pub struct RacyCounter {
    value: AtomicU64,
}

impl SharedCounter for RacyCounter {
    fn increment(&self) {
        let current = self.value.load(Relaxed);
        // widen the read-to-write window the way a preempted thread would
        thread::yield_now();
        self.value.store(current + 1, Relaxed);
    }

    fn value(&self) -> u64 {
        self.value.load(Relaxed)
    }
}

#[derive(Debug, Default)]
pub struct AtomicCounter {
    value: AtomicU64,
}

impl SharedCounter for AtomicCounter {
    fn increment(&self) {
        // indivisible on its own, Relaxed is enough: the barrier orders the final read
        self.value.fetch_add(1, Relaxed);
    }

    fn value(&self) -> u64 {
        self.value.load(Relaxed)
    }
}

#[derive(Default)]
pub struct LockedCounter {
    value: ExclusionLock<u64>,
}

impl SharedCounter for LockedCounter {
    fn increment(&self) {
        *self.value.lock() += 1;
    }

    fn value(&self) -> u64 {
        *self.value.lock()
    }
}

/// Failed commits an optimistic round may take before it backs off.
pub const MAX_ATTEMPTS: u32 = 5;

#[derive(Debug, Default)]
pub struct OptimisticCounter {
    value: AtomicU64,
    conflicts: AtomicU64,
}

impl OptimisticCounter {
    /// Makes up to `attempts` read-then-commit attempts.
    /// Returns false if every one of them lost to another writer, the value isn't touched then.
    pub fn try_increment(&self, attempts: u32) -> bool {
        let mut current = self.value.load(Relaxed);
        for _ in 0..attempts {
            // weak: a spurious failure is just one more conflict, we're looping anyway
            match self
                .value
                .compare_exchange_weak(current, current + 1, Relaxed, Relaxed)
            {
                Ok(_) => return true,
                Err(v) => {
                    self.conflicts.fetch_add(1, Relaxed);
                    current = v;
                }
            }
        }
        false
    }
}

impl SharedCounter for OptimisticCounter {
    fn increment(&self) {
        while !self.try_increment(MAX_ATTEMPTS) {
            thread::yield_now();
        }
    }

    fn value(&self) -> u64 {
        self.value.load(Relaxed)
    }

    fn retries(&self) -> u64 {
        self.conflicts.load(Relaxed)
    }
}

#[derive(Default)]
pub struct TryLockCounter {
    value: ExclusionLock<u64>,
    busy: AtomicU64,
}

impl SharedCounter for TryLockCounter {
    fn increment(&self) {
        loop {
            if let Some(mut g) = self.value.try_lock() {
                *g += 1;
                return;
            }
            self.busy.fetch_add(1, Relaxed);
            thread::yield_now();
        }
    }

    fn value(&self) -> u64 {
        *self.value.lock()
    }

    fn retries(&self) -> u64 {
        self.busy.load(Relaxed)
    }
}
