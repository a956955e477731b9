use std::env::args;
use std::io;
use std::str::FromStr;

use fanout_counters::{
    logging,
    runner::{run_counter, run_ordered},
    HarnessConfig, Strategy, COUNTER_UNITS, ORDERED_TASKS,
};
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter, EnumString};

fn main() -> Result<(), String> {
    logging::init();
    args()
        .nth(1)
        .ok_or(format!(
            "no runner supplied, use one of {}",
            Runner::iter()
                .map(|r| r.to_string())
                .collect::<Vec<String>>()
                .join(",")
        ))
        .and_then(|selector| Runner::from_str(&selector).map_err(|e| format!("{selector}: {e}")))
        .and_then(|runner| run(runner).map_err(|e| e.to_string()))
}

#[derive(EnumIter, EnumString, Display)]
#[strum(serialize_all = "snake_case")]
enum Runner {
    Unsynchronized,
    Atomic,
    Mutex,
    Optimistic,
    TryLock,
    Ordered,
    Compare,
}

fn run(runner: Runner) -> Result<(), fanout_counters::HarnessError> {
    let config = HarnessConfig::default();
    match runner {
        Runner::Unsynchronized => counter(Strategy::Unsynchronized, config),
        Runner::Atomic => counter(Strategy::Atomic, config),
        Runner::Mutex => counter(Strategy::Mutex, config),
        Runner::Optimistic => counter(Strategy::Optimistic, config),
        Runner::TryLock => counter(Strategy::TryLock, config),
        Runner::Ordered => run_ordered(ORDERED_TASKS, io::stdout(), config).map(|_| ()),
        Runner::Compare => {
            // same N for everyone
            for strategy in Strategy::iter() {
                let outcome = run_counter(strategy, COUNTER_UNITS, config)?;
                println!(
                    "{strategy}: {}/{COUNTER_UNITS} in {:?}, {} retries",
                    outcome.value, outcome.report.elapsed, outcome.retries
                );
            }
            Ok(())
        }
    }
}

fn counter(strategy: Strategy, config: HarnessConfig) -> Result<(), fanout_counters::HarnessError> {
    let outcome = run_counter(strategy, COUNTER_UNITS, config)?;
    println!("{}", outcome.value);
    Ok(())
}
