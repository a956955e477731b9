use std::{io, time::Duration};

use thiserror::Error;

/// Conditions a run can end with other than success.
///
/// Barrier over-signalling and panicking workers aren't here: those are programming faults and
/// unwind the caller instead.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("{outstanding} of {units} work units still outstanding after {deadline:?}")]
    DeadlineExceeded {
        outstanding: usize,
        units: usize,
        deadline: Duration,
    },

    #[error("no worker thread could be started: {0}")]
    Spawn(#[source] io::Error),

    #[error("failed to emit task report: {0}")]
    Sink(#[from] io::Error),
}
