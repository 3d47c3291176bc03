use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use zgrun::core::utils::relativity::PROTON_MASS_EV;

const HELP_TEMPLATE: &str = "\
{before-help}{name} {version}
{author-with-newline}{about-with-newline}
{usage-heading} {usage}

{all-args}{after-help}
";

#[derive(Parser, Debug)]
#[command(
    name = "zgrun",
    version,
    about = "zgrun - run the Zgoubi particle-tracking code and read back its results.",
    help_template = HELP_TEMPLATE,
)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity level (-v for INFO, -vv for DEBUG, -vvv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all log output
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Write logs to a specified file in addition to the console output
    #[arg(long, global = true, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Engine settings file in TOML format
    #[arg(short, long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Path to the zgoubi executable, overriding the config file
    #[arg(long, global = true, value_name = "PATH")]
    pub zgoubi: Option<PathBuf>,

    /// Directory to create run directories in, overriding the config file
    #[arg(long, global = true, value_name = "PATH")]
    pub tmp_dir: Option<PathBuf>,

    /// Check every line for structural problems before running it
    #[arg(long, global = true)]
    pub check_lines: bool,

    /// Number of zgoubi processes to run at once when tracking.
    /// Defaults to the number of available logical cores.
    #[arg(short = 'j', long, global = true, value_name = "NUM")]
    pub threads: Option<usize>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a ready-made zgoubi input file and report on its output.
    Run(RunArgs),
    /// Track a particle bunch through a beamline segment.
    Track(TrackArgs),
}

/// Arguments for the `run` subcommand.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Path to the zgoubi input file (zgoubi.dat format, including its OBJET).
    #[arg(short, long, required = true, value_name = "PATH")]
    pub input: PathBuf,

    /// Auxiliary file to place in the run directory, such as a field map.
    /// Can be used multiple times.
    #[arg(long = "aux", value_name = "PATH")]
    pub aux: Vec<PathBuf>,

    /// Capture zgoubi's terminal output in the run directory.
    #[arg(long)]
    pub silence: bool,

    /// Print the tunes found in the MATRIX output.
    #[arg(long)]
    pub tune: bool,

    /// Print the first-order transfer matrix.
    #[arg(long)]
    pub matrix: bool,

    /// Print the periodic twiss parameters.
    #[arg(long)]
    pub twiss: bool,

    /// Copy zgoubi.res to this path.
    #[arg(long, value_name = "PATH")]
    pub save_res: Option<PathBuf>,

    /// Keep the run directory instead of removing it.
    #[arg(long)]
    pub keep: bool,
}

/// Arguments for the `track` subcommand.
#[derive(Args, Debug)]
pub struct TrackArgs {
    /// Bunch file with columns Y T Z P X D (SI units).
    #[arg(short, long, required = true, value_name = "PATH")]
    pub bunch: PathBuf,

    /// Beamline segment in zgoubi input format, without OBJET or END.
    #[arg(short, long, required = true, value_name = "PATH")]
    pub segment: PathBuf,

    /// Path for the tracked bunch file.
    #[arg(short, long, required = true, value_name = "PATH")]
    pub output: PathBuf,

    /// Reference kinetic energy in eV.
    #[arg(short = 'e', long, required = true, value_name = "EV")]
    pub kinetic_energy: f64,

    /// Particle rest energy in eV.
    #[arg(long, default_value_t = PROTON_MASS_EV, value_name = "EV")]
    pub mass: f64,

    /// Particle charge in units of the elementary charge.
    #[arg(long, default_value_t = 1.0, value_name = "Q")]
    pub charge: f64,

    /// Read at most this many particles from the bunch file.
    #[arg(long, value_name = "INT")]
    pub limit: Option<usize>,

    /// Override the maximum number of particles sent to one zgoubi process.
    #[arg(long, value_name = "INT")]
    pub max_particles: Option<usize>,

    /// Keep lost particles in the output instead of dropping them.
    #[arg(long)]
    pub keep_lost: bool,

    /// Auxiliary file to place in every run directory. Can be used multiple times.
    #[arg(long = "aux", value_name = "PATH")]
    pub aux: Vec<PathBuf>,

    /// Capture zgoubi's terminal output in the run directories.
    #[arg(long)]
    pub silence: bool,
}
