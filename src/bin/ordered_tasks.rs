use std::io;

use fanout_counters::{logging, runner::run_ordered, HarnessConfig, ORDERED_TASKS};

// one line per task, in the order the tasks got the lock
fn main() -> Result<(), String> {
    logging::init();
    run_ordered(ORDERED_TASKS, io::stdout(), HarnessConfig::default())
        .map(|_| ())
        .map_err(|e| e.to_string())
}
