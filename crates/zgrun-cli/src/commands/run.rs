use super::{check_aux_files, load_program};
use crate::cli::RunArgs;
use crate::error::Result;
use tracing::{info, warn};
use zgrun::core::io::trajectory::LossSummary;
use zgrun::engine::config::EngineConfig;
use zgrun::engine::executor::{self, RunOptions};
use zgrun::engine::results::{OutputFile, Results};

pub fn run(args: RunArgs, config: &EngineConfig) -> Result<()> {
    check_aux_files(&args.aux)?;
    let mut line = load_program(&args.input)?;
    line.add_input_files(args.aux.iter().cloned());
    info!(
        line = line.name(),
        elements = line.len(),
        "Loaded zgoubi input from {}",
        args.input.display()
    );

    let options = RunOptions {
        silence: args.silence,
    };
    let results = executor::run(&line, config, &options)?;

    let outcome = report(&results, &args);

    if args.keep {
        let path = results.keep();
        println!("Run directory kept at {}", path.display());
    } else {
        results.clean();
    }
    outcome
}

fn report(results: &Results, args: &RunArgs) -> Result<()> {
    if let Some(timings) = results.timings() {
        println!(
            "Run finished: setup {:.3}s, engine {:.3}s",
            timings.setup.as_secs_f64(),
            timings.run.as_secs_f64()
        );
    }

    if let Some(dest) = &args.save_res {
        results.save(OutputFile::Res, dest)?;
        println!("Saved zgoubi.res to {}", dest.display());
    }

    for file in [OutputFile::Fai, OutputFile::Plt] {
        match results.loss_summary(file) {
            Ok(Some(summary)) => print_losses(file, &summary),
            Ok(None) => {}
            Err(e) => warn!("No loss summary for {}: {}", file.file_name(), e),
        }
    }

    if args.tune {
        let (nu_y, nu_z) = results.get_tune()?;
        println!("Tunes: NU_Y = {:.6}  NU_Z = {:.6}", nu_y, nu_z);
    }

    if args.matrix {
        let m = results.get_transfer_matrix()?;
        println!("Transfer matrix (MKSA):");
        for i in 0..6 {
            let row: Vec<String> = (0..6).map(|j| format!("{:>13.5e}", m[(i, j)])).collect();
            println!("  {}", row.join(" "));
        }
    }

    if args.twiss {
        let t = results.get_twiss_parameters()?;
        println!("Periodic twiss parameters:");
        println!(
            "  Y: beta = {:.6} m  alpha = {:.6}  gamma = {:.6} 1/m  D = {:.6} m  D' = {:.6}",
            t.beta_y, t.alpha_y, t.gamma_y, t.disp_y, t.disp_py
        );
        println!(
            "  Z: beta = {:.6} m  alpha = {:.6}  gamma = {:.6} 1/m  D = {:.6} m  D' = {:.6}",
            t.beta_z, t.alpha_z, t.gamma_z, t.disp_z, t.disp_pz
        );
    }
    Ok(())
}

fn print_losses(file: OutputFile, summary: &LossSummary) {
    println!("Lost particles in {}:", file.file_name());
    for (description, count) in summary.iter() {
        println!("  {:>8}  {}", count, description);
    }
}
