use fanout_counters::{logging, runner::run_mutex, HarnessConfig, COUNTER_UNITS};

fn main() -> Result<(), String> {
    logging::init();
    let outcome = run_mutex(COUNTER_UNITS, HarnessConfig::default())
        .map_err(|e| e.to_string())?;
    println!("{}", outcome.value);
    Ok(())
}
