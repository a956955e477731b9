//! # Ordered tasks
//!
//! A lock that serializes a side effect, not just a number.
//!
//! Each task takes the [ExclusionLock], bumps the sequence counter, keeps the `(task, sequence)` record
//! and emits the report line, then lets go. All 3 happen under one guard, so a task's number and its line
//! can never be attributed to another task, and lines come out in sequence order.
//!
//! Which task gets which number is up to the scheduler. The only promise is that the numbers are 1..=M,
//! each handed out exactly once.

use std::{collections::HashSet, io::Write};

use strum_macros::Display;
use thiserror::Error;
use tracing::trace;

use crate::{error::HarnessError, lock::ExclusionLock};

/// Lifecycle of a single task. Phases only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum TaskPhase {
    Created,
    Dispatched,
    AwaitingLock,
    InCriticalSection,
    Completed,
}

impl TaskPhase {
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Created => Some(Self::Dispatched),
            Self::Dispatched => Some(Self::AwaitingLock),
            Self::AwaitingLock => Some(Self::InCriticalSection),
            Self::InCriticalSection => Some(Self::Completed),
            Self::Completed => None,
        }
    }
}

/// A task id and where it's at.
#[derive(Debug)]
pub struct Task {
    id: usize,
    phase: TaskPhase,
}

impl Task {
    pub fn new(id: usize) -> Self {
        Self {
            id,
            phase: TaskPhase::Created,
        }
    }

    pub fn phase(&self) -> TaskPhase {
        self.phase
    }

    /// # Panics
    /// On an attempt to move past [TaskPhase::Completed].
    pub fn advance(&mut self) {
        let next = self
            .phase
            .next()
            .unwrap_or_else(|| panic!("task {} advanced past completion", self.id));
        self.phase = next;
        trace!(task_id = self.id, phase = %next, "task phase");
    }
}

/// Creates tasks 0..count and moves each one to [TaskPhase::Dispatched].
///
/// Ids follow creation order, so they are fixed before any task gets a chance to run.
pub fn dispatch_tasks(count: usize) -> Vec<Task> {
    (0..count)
        .map(|id| {
            let mut task = Task::new(id);
            task.advance();
            task
        })
        .collect()
}

/// Task `task_id` ran as the `sequence`-th one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceRecord {
    pub task_id: usize,
    pub sequence: u64,
}

struct Ledger<W> {
    issued: u64,
    records: Vec<SequenceRecord>,
    sink: W,
    // first failure wins, later lines are dropped
    sink_error: Option<std::io::Error>,
}

pub struct Sequencer<W> {
    ledger: ExclusionLock<Ledger<W>>,
}

impl<W: Write + Send> Sequencer<W> {
    pub fn new(sink: W, tasks: usize) -> Self {
        Self {
            ledger: ExclusionLock::new(Ledger {
                issued: 0,
                records: Vec::with_capacity(tasks),
                sink,
                sink_error: None,
            }),
        }
    }

    /// Runs the critical section for a dispatched task and returns the sequence number it got.
    ///
    /// # Panics
    /// If the task isn't in [TaskPhase::Dispatched].
    pub fn execute(&self, task: &mut Task) -> u64 {
        assert_eq!(
            TaskPhase::Dispatched,
            task.phase,
            "task {} executed out of phase",
            task.id
        );
        task.advance(); // awaiting the lock
        let mut ledger = self.ledger.lock();
        task.advance(); // inside

        let Ledger {
            issued,
            records,
            sink,
            sink_error,
        } = &mut *ledger;
        *issued += 1;
        let sequence = *issued;
        records.push(SequenceRecord {
            task_id: task.id,
            sequence,
        });
        if sink_error.is_none() {
            if let Err(e) = writeln!(sink, "Task {} executing as number {sequence}", task.id) {
                *sink_error = Some(e);
            }
        }
        drop(ledger);

        task.advance();
        sequence
    }

    /// Records in execution order, plus the sink back.
    ///
    /// # Errors
    /// [HarnessError::Sink] if any report line (or the final flush) failed to write.
    pub fn finish(self) -> Result<(Vec<SequenceRecord>, W), HarnessError> {
        let Ledger {
            records,
            mut sink,
            sink_error,
            ..
        } = self.ledger.into_inner();
        if let Some(e) = sink_error {
            return Err(e.into());
        }
        sink.flush()?;
        Ok((records, sink))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderingViolation {
    #[error("expected {expected} records, got {actual}")]
    Count { expected: usize, actual: usize },
    #[error("sequence number {0} is out of 1..=tasks or handed out twice")]
    Sequence(u64),
    #[error("task {0} is unknown or ran twice")]
    Task(usize),
}

/// Checks that `records` map the tasks 0..tasks one-to-one onto sequence numbers 1..=tasks.
pub fn check_bijection(records: &[SequenceRecord], tasks: usize) -> Result<(), OrderingViolation> {
    if records.len() != tasks {
        return Err(OrderingViolation::Count {
            expected: tasks,
            actual: records.len(),
        });
    }
    let mut sequences = HashSet::with_capacity(tasks);
    let mut ids = HashSet::with_capacity(tasks);
    for r in records {
        if r.sequence == 0 || r.sequence > tasks as u64 || !sequences.insert(r.sequence) {
            return Err(OrderingViolation::Sequence(r.sequence));
        }
        if r.task_id >= tasks || !ids.insert(r.task_id) {
            return Err(OrderingViolation::Task(r.task_id));
        }
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use std::{io, thread::scope};

    use super::*;
    use crate::{config::HarnessConfig, dispatch::Dispatcher};

    fn rec(task_id: usize, sequence: u64) -> SequenceRecord {
        SequenceRecord { task_id, sequence }
    }

    #[test]
    fn test_phases_walk_forward_once() {
        let mut t = Task::new(3);
        let mut seen = vec![t.phase()];
        while t.phase() != TaskPhase::Completed {
            t.advance();
            seen.push(t.phase());
        }
        assert_eq!(
            vec![
                TaskPhase::Created,
                TaskPhase::Dispatched,
                TaskPhase::AwaitingLock,
                TaskPhase::InCriticalSection,
                TaskPhase::Completed
            ],
            seen
        );
        assert_eq!("in_critical_section", TaskPhase::InCriticalSection.to_string());
    }

    #[test]
    #[should_panic(expected = "advanced past completion")]
    fn test_completed_is_terminal() {
        let mut t = Task::new(0);
        for _ in 0..5 {
            t.advance();
        }
    }

    #[test]
    fn test_tasks_are_dispatched_in_id_order() {
        let tasks = dispatch_tasks(10);
        assert!(tasks.iter().all(|t| t.phase() == TaskPhase::Dispatched));
        assert!(tasks.iter().enumerate().all(|(i, t)| t.id == i));
        assert!(dispatch_tasks(0).is_empty());
    }

    #[test]
    fn test_every_task_is_dispatched_before_the_first_number() {
        let tasks = dispatch_tasks(10);
        let seq = Sequencer::new(Vec::new(), 10);
        assert!(tasks.iter().all(|t| t.phase() == TaskPhase::Dispatched));
        assert_eq!(0, seq.ledger.lock().issued);

        Dispatcher::new(HarnessConfig::default())
            .dispatch_units(tasks, |mut t| {
                seq.execute(&mut t);
                assert_eq!(TaskPhase::Completed, t.phase());
            })
            .unwrap();
        let (records, _) = seq.finish().unwrap();
        check_bijection(&records, 10).unwrap();
    }

    #[test]
    #[should_panic(expected = "task 4 executed out of phase")]
    fn test_undispatched_task_gets_no_number() {
        let seq = Sequencer::new(Vec::new(), 1);
        seq.execute(&mut Task::new(4));
    }

    #[test]
    fn test_lines_follow_sequence_order() {
        let seq = Sequencer::new(Vec::new(), 8);
        scope(|s| {
            for id in 0..8 {
                let seq = &seq;
                s.spawn(move || {
                    let mut t = Task::new(id);
                    t.advance();
                    seq.execute(&mut t);
                    assert_eq!(TaskPhase::Completed, t.phase());
                });
            }
        });
        let (records, out) = seq.finish().unwrap();
        check_bijection(&records, 8).unwrap();

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(8, lines.len());
        for (line, r) in lines.iter().zip(&records) {
            assert_eq!(
                format!("Task {} executing as number {}", r.task_id, r.sequence),
                *line
            );
        }
        // execution order == sequence order
        assert!(records.windows(2).all(|w| w[0].sequence + 1 == w[1].sequence));
    }

    struct Broken;

    impl Write for Broken {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_sink_failure_surfaces_after_the_run() {
        let seq = Sequencer::new(Broken, 2);
        for (i, mut t) in dispatch_tasks(2).into_iter().enumerate() {
            // numbering goes on regardless of the sink
            assert_eq!(i as u64 + 1, seq.execute(&mut t));
        }
        assert!(matches!(seq.finish(), Err(HarnessError::Sink(_))));
    }

    #[test]
    fn test_bijection_violations() {
        assert_eq!(Ok(()), check_bijection(&[rec(1, 2), rec(0, 1)], 2));
        assert_eq!(Ok(()), check_bijection(&[], 0));
        assert_eq!(
            Err(OrderingViolation::Count {
                expected: 3,
                actual: 2
            }),
            check_bijection(&[rec(0, 1), rec(1, 2)], 3)
        );
        assert_eq!(
            Err(OrderingViolation::Sequence(1)),
            check_bijection(&[rec(0, 1), rec(1, 1)], 2)
        );
        assert_eq!(
            Err(OrderingViolation::Sequence(3)),
            check_bijection(&[rec(0, 1), rec(1, 3)], 2)
        );
        assert_eq!(
            Err(OrderingViolation::Task(0)),
            check_bijection(&[rec(0, 1), rec(0, 2)], 2)
        );
    }
}
