//! # Runners
//!
//! The fixed-shape runs, one per counter discipline plus the ordered one. Each one owns its counter for the run's lifetime,
//! so a runner can be called again and again within one process.

use std::io::Write;

use tracing::info;

use crate::{
    config::HarnessConfig,
    counter::{
        AtomicCounter, LockedCounter, OptimisticCounter, RacyCounter, SharedCounter, Strategy,
        TryLockCounter,
    },
    dispatch::{DispatchReport, Dispatcher},
    error::HarnessError,
    ordered::{dispatch_tasks, SequenceRecord, Sequencer},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterOutcome {
    pub strategy: Strategy,
    /// read after the barrier returned
    pub value: u64,
    /// increments that had to be retried, 0 for disciplines that never retry
    pub retries: u64,
    pub report: DispatchReport,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderedOutcome {
    /// in execution order
    pub records: Vec<SequenceRecord>,
    pub report: DispatchReport,
}

fn run_with<C: SharedCounter>(
    strategy: Strategy,
    counter: C,
    units: usize,
    config: HarnessConfig,
) -> Result<CounterOutcome, HarnessError> {
    let report = Dispatcher::new(config).dispatch(units, |_| counter.increment())?;
    let value = counter.value();
    let retries = counter.retries();
    info!(%strategy, units, value, retries, elapsed = ?report.elapsed, "counter run finished");
    Ok(CounterOutcome {
        strategy,
        value,
        retries,
        report,
    })
}

/// `units` increments with no exclusion. The value is at most `units`, usually less under contention.
pub fn run_unsynchronized(
    units: usize,
    config: HarnessConfig,
) -> Result<CounterOutcome, HarnessError> {
    run_with(Strategy::Unsynchronized, RacyCounter::default(), units, config)
}

/// `units` atomic increments. The value is exactly `units`.
pub fn run_atomic(units: usize, config: HarnessConfig) -> Result<CounterOutcome, HarnessError> {
    run_with(Strategy::Atomic, AtomicCounter::default(), units, config)
}

/// `units` increments under the exclusion lock. The value is exactly `units`.
pub fn run_mutex(units: usize, config: HarnessConfig) -> Result<CounterOutcome, HarnessError> {
    run_with(Strategy::Mutex, LockedCounter::default(), units, config)
}

/// `units` compare & exchange increments, retried on conflict. The value is exactly `units`.
pub fn run_optimistic(
    units: usize,
    config: HarnessConfig,
) -> Result<CounterOutcome, HarnessError> {
    run_with(Strategy::Optimistic, OptimisticCounter::default(), units, config)
}

/// `units` increments that never block on the lock, they retry `try_lock` instead.
/// The value is exactly `units`.
pub fn run_try_lock(units: usize, config: HarnessConfig) -> Result<CounterOutcome, HarnessError> {
    run_with(Strategy::TryLock, TryLockCounter::default(), units, config)
}

pub fn run_counter(
    strategy: Strategy,
    units: usize,
    config: HarnessConfig,
) -> Result<CounterOutcome, HarnessError> {
    match strategy {
        Strategy::Unsynchronized => run_unsynchronized(units, config),
        Strategy::Atomic => run_atomic(units, config),
        Strategy::Mutex => run_mutex(units, config),
        Strategy::Optimistic => run_optimistic(units, config),
        Strategy::TryLock => run_try_lock(units, config),
    }
}

/// `tasks` tasks each taking the next sequence number under the lock and reporting it to `sink`.
///
/// Task ids are assigned in dispatch order, before any task starts.
/// Sequence numbers follow execution order.
pub fn run_ordered<W: Write + Send>(
    tasks: usize,
    sink: W,
    config: HarnessConfig,
) -> Result<OrderedOutcome, HarnessError> {
    let sequencer = Sequencer::new(sink, tasks);
    let report = Dispatcher::new(config).dispatch_units(dispatch_tasks(tasks), |mut task| {
        sequencer.execute(&mut task);
    })?;
    let (records, _) = sequencer.finish()?;
    info!(tasks, elapsed = ?report.elapsed, "ordered run finished");
    Ok(OrderedOutcome { records, report })
}

#[cfg(test)]
mod test {
    use std::{collections::BTreeSet, num::NonZeroUsize, time::Duration};

    use strum::IntoEnumIterator;

    use super::*;
    use crate::{
        config::{COUNTER_UNITS, ORDERED_TASKS},
        ordered::check_bijection,
    };

    const REPEATS: usize = 100;

    fn config() -> HarnessConfig {
        // generous bound so a lost wake-up fails the test instead of hanging it
        HarnessConfig::default().with_deadline(Duration::from_secs(60))
    }

    #[test]
    fn test_atomic_is_exact() {
        for n in [0, 1, 10, 1000, 100_000] {
            for _ in 0..REPEATS {
                assert_eq!(n as u64, run_atomic(n, config()).unwrap().value);
            }
        }
    }

    #[test]
    fn test_mutex_is_exact() {
        for n in [0, 1, 10, 1000, 100_000] {
            for _ in 0..REPEATS {
                assert_eq!(n as u64, run_mutex(n, config()).unwrap().value);
            }
        }
    }

    #[test]
    fn test_retrying_disciplines_are_exact() {
        for n in [0, 1, 10, 1000, 10_000] {
            for _ in 0..REPEATS / 5 {
                assert_eq!(n as u64, run_optimistic(n, config()).unwrap().value);
                assert_eq!(n as u64, run_try_lock(n, config()).unwrap().value);
            }
        }
    }

    #[test]
    fn test_unsynchronized_loses_updates() {
        let values: Vec<u64> = (0..REPEATS)
            .map(|_| run_unsynchronized(COUNTER_UNITS, config()).unwrap().value)
            .collect();
        assert!(values.iter().all(|&v| v <= COUNTER_UNITS as u64));
        assert!(
            values.iter().any(|&v| v < COUNTER_UNITS as u64),
            "no update lost in {REPEATS} runs"
        );
    }

    #[test]
    fn test_unsynchronized_single_worker_is_exact() {
        // nobody to race with => nothing lost
        let c = config().with_workers(NonZeroUsize::MIN);
        assert_eq!(1000, run_unsynchronized(1000, c).unwrap().value);
    }

    #[test]
    fn test_run_counter_dispatches_by_strategy() {
        for strategy in Strategy::iter() {
            let outcome = run_counter(strategy, 5, config()).unwrap();
            assert_eq!(strategy, outcome.strategy);
            assert_eq!(5, outcome.report.units);
            if strategy.is_exact() {
                assert_eq!(5, outcome.value);
            }
            if matches!(strategy, Strategy::Atomic | Strategy::Mutex) {
                assert_eq!(0, outcome.retries);
            }
        }
    }

    #[test]
    fn test_ordered_is_a_bijection() {
        for _ in 0..REPEATS {
            let outcome = run_ordered(ORDERED_TASKS, Vec::new(), config()).unwrap();
            check_bijection(&outcome.records, ORDERED_TASKS).unwrap();
            let sequences: BTreeSet<u64> = outcome.records.iter().map(|r| r.sequence).collect();
            assert_eq!((1..=ORDERED_TASKS as u64).collect::<BTreeSet<_>>(), sequences);
        }
    }

    #[test]
    fn test_ordered_three_tasks_report_lines() {
        let mut out = Vec::new();
        let outcome = run_ordered(3, &mut out, config()).unwrap();
        let text = String::from_utf8(out).unwrap();

        let mut ids = BTreeSet::new();
        let mut sequences = Vec::new();
        for line in text.lines() {
            let rest = line.strip_prefix("Task ").unwrap();
            let (id, seq) = rest.split_once(" executing as number ").unwrap();
            ids.insert(id.parse::<usize>().unwrap());
            sequences.push(seq.parse::<u64>().unwrap());
        }
        assert_eq!(BTreeSet::from([0, 1, 2]), ids);
        // printed in execution order
        assert_eq!(vec![1, 2, 3], sequences);
        assert_eq!(3, outcome.records.len());
    }

    #[test]
    fn test_concrete_scenarios() {
        assert_eq!(5, run_atomic(5, config()).unwrap().value);
        assert_eq!(1000, run_mutex(1000, config()).unwrap().value);
    }
}
