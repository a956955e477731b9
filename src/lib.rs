//! Increments a shared counter from many concurrent workers under three disciplines
//! (none, hardware atomics, a mutex) and waits on a completion barrier before reading it.
//! An ordered variant lets the mutex serialize a side effect too.

pub mod barrier;
pub mod config;
pub mod counter;
pub mod dispatch;
pub mod error;
pub mod lock;
pub mod logging;
pub mod ordered;
pub mod runner;

pub use config::{HarnessConfig, COUNTER_UNITS, ORDERED_TASKS};
pub use counter::Strategy;
pub use error::HarnessError;
