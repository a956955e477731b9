use fanout_counters::{logging, runner::run_atomic, HarnessConfig, COUNTER_UNITS};

fn main() -> Result<(), String> {
    logging::init();
    let outcome = run_atomic(COUNTER_UNITS, HarnessConfig::default())
        .map_err(|e| e.to_string())?;
    println!("{}", outcome.value);
    Ok(())
}
