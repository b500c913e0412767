use std::{process::ExitCode, time::Instant};

use cellsim::{
    config::AppConfig,
    device::headless::HeadlessDevice,
    params::ParameterStore,
    sim::{SimulationLoop, TickOutcome},
};

fn main() -> ExitCode {
    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            eprintln!("usage: cellsim [--seed N] [--headless TICKS] [--verbose]");
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = cellsim::init_logging(config.log_level) {
        eprintln!("failed to install logger: {e}");
    }

    let result = match config.headless_ticks {
        Some(ticks) => run_benchmark(&config, ticks),
        None => cellsim::run(config),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Drive the scheduler against the headless device, so the host-side cost of a tick can be
/// measured without a GPU.
fn run_benchmark(config: &AppConfig, ticks: u64) -> anyhow::Result<()> {
    let mut simulation =
        SimulationLoop::new(HeadlessDevice::new(), ParameterStore::new(), config.seed);
    simulation.init()?;

    let start = Instant::now();
    let mut submitted = 0u64;
    for _ in 0..ticks {
        if let TickOutcome::Submitted(_) = simulation.tick()? {
            submitted += 1;
        }
    }
    let elapsed = start.elapsed();

    let average = elapsed / u32::try_from(submitted.max(1)).unwrap_or(u32::MAX);
    log::info!(
        "{submitted} ticks in {}, average {} per tick",
        humantime::format_duration(elapsed),
        humantime::format_duration(average),
    );
    Ok(())
}
