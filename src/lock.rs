//! # Exclusion lock
//!
//! A futex-style mutex: the lock state lives in a u32 so threads can sleep on it
//! with [atomic_wait::wait] instead of burning cycles.
//!
//! The state has 3 values:
//! - 0 - unlocked
//! - 1 - locked, nobody waits
//! - 2 - locked, other threads are (or may be) waiting
//!
//! An uncontended lock + unlock never makes a syscall. A contended lock spins a bit first,
//! as critical sections here are a couple of instructions long.
//!
//! Release happens in [ExclusionGuard]'s drop only, so the lock is freed on every exit path,
//! unwinding included. There's no poisoning: the protected value is a plain counter,
//! a panicking holder can't leave it half-written.
//!
//! The lock isn't fair. A thread woken by `wake_one` may lose the race to a newcomer.

use std::{
    cell::UnsafeCell,
    ops::{Deref, DerefMut},
    sync::atomic::{
        AtomicU32,
        Ordering::{Acquire, Relaxed, Release},
    },
};

use atomic_wait::{wait, wake_one};

const UNLOCKED: u32 = 0;
const LOCKED: u32 = 1;
const CONTENDED: u32 = 2;

const SPIN_LIMIT: u32 = 100;

pub struct ExclusionLock<T> {
    state: AtomicU32,
    value: UnsafeCell<T>,
}

// the value is only reachable through a guard, and there's at most one guard at a time
unsafe impl<T> Sync for ExclusionLock<T> where T: Send {}

impl<T> ExclusionLock<T> {
    pub const fn new(value: T) -> Self {
        Self {
            state: AtomicU32::new(UNLOCKED),
            value: UnsafeCell::new(value),
        }
    }

    /// Blocks until the lock is ours.
    pub fn lock(&self) -> ExclusionGuard<'_, T> {
        if self
            .state
            .compare_exchange(UNLOCKED, LOCKED, Acquire, Relaxed)
            .is_err()
        {
            Self::lock_contended(&self.state);
        }
        ExclusionGuard { lock: self }
    }

    pub fn try_lock(&self) -> Option<ExclusionGuard<'_, T>> {
        self.state
            .compare_exchange(UNLOCKED, LOCKED, Acquire, Relaxed)
            .ok()
            .map(|_| ExclusionGuard { lock: self })
    }

    #[cold]
    fn lock_contended(state: &AtomicU32) {
        let mut spin_count = 0;

        // only spin while it's plainly locked, 2 means someone already gave up and sleeps
        while state.load(Relaxed) == LOCKED && spin_count < SPIN_LIMIT {
            spin_count += 1;
            std::hint::spin_loop();
        }

        if state
            .compare_exchange(UNLOCKED, LOCKED, Acquire, Relaxed)
            .is_ok()
        {
            return;
        }

        // leave 2 behind so the holder knows there's somebody to wake
        while state.swap(CONTENDED, Acquire) != UNLOCKED {
            wait(state, CONTENDED);
        }
    }

    pub fn into_inner(self) -> T {
        self.value.into_inner()
    }
}

impl<T: Default> Default for ExclusionLock<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

/// Proof of holding the lock. Dropping it is the only way to unlock.
pub struct ExclusionGuard<'a, T> {
    lock: &'a ExclusionLock<T>,
}

unsafe impl<T> Sync for ExclusionGuard<'_, T> where T: Sync {}

impl<T> Deref for ExclusionGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &Self::Target {
        // SAFETY: the guard exists => the lock is held
        unsafe { &*self.lock.value.get() }
    }
}

impl<T> DerefMut for ExclusionGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        // SAFETY: the guard exists => the lock is held
        unsafe { &mut *self.lock.value.get() }
    }
}

impl<T> Drop for ExclusionGuard<'_, T> {
    fn drop(&mut self) {
        // skip the wake syscall if nobody announced waiting
        if self.lock.state.swap(UNLOCKED, Release) == CONTENDED {
            wake_one(&self.lock.state);
        }
    }
}
