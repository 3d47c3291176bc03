use super::{check_aux_files, load_program};
use crate::cli::TrackArgs;
use crate::error::{CliError, Result};
use crate::utils::progress::CliProgressHandler;
use std::num::NonZeroUsize;
use tracing::info;
use zgrun::core::models::bunch::Bunch;
use zgrun::engine::config::EngineConfig;
use zgrun::engine::error::ZgoubiError;
use zgrun::engine::executor::RunOptions;
use zgrun::engine::progress::ProgressReporter;
use zgrun::workflows::track::{self, TrackOptions};

pub fn run(args: TrackArgs, threads: Option<usize>, config: &EngineConfig) -> Result<()> {
    check_aux_files(&args.aux)?;
    if args.kinetic_energy.is_nan() || args.kinetic_energy <= 0.0 {
        return Err(CliError::Argument(format!(
            "Kinetic energy must be positive, got {}",
            args.kinetic_energy
        )));
    }

    let mut segment = load_program(&args.segment)?;
    segment.add_input_files(args.aux.iter().cloned());

    let mut bunch = Bunch::with_kinetic_energy(0, args.kinetic_energy, args.mass, args.charge)
        .map_err(|e| CliError::Argument(e.to_string()))?;
    bunch
        .read_ytzpsd(&args.bunch, args.limit)
        .map_err(ZgoubiError::from)?;
    info!(
        particles = bunch.len(),
        rigidity = bunch.rigidity(),
        "Loaded bunch from {}",
        args.bunch.display()
    );

    let n_threads = threads.unwrap_or_else(|| {
        std::thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(1)
    });
    let options = TrackOptions {
        run: RunOptions {
            silence: args.silence,
        },
        drop_lost: !args.keep_lost,
    };

    let handler = CliProgressHandler::new();
    let reporter = ProgressReporter::with_callback(handler.get_callback());
    let tracked = track::track(&segment, &bunch, n_threads, config, &options, &reporter)?;

    tracked
        .write_ytzpsd(&args.output)
        .map_err(ZgoubiError::from)?;
    println!(
        "Tracked {} of {} particles through '{}'; wrote {}",
        tracked.len(),
        bunch.len(),
        segment.name(),
        args.output.display()
    );
    Ok(())
}
