use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

const HELP_TEMPLATE: &str = "\
{before-help}{name} {version}
{author-with-newline}{about-with-newline}
{usage-heading} {usage}

{all-args}{after-help}
";

#[derive(Parser, Debug)]
#[command(
    version,
    about = "polarmd - polarizable molecular dynamics with relaxed shells and flexible constraints.",
    help_template = HELP_TEMPLATE,
)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity level (-v for INFO, -vv for DEBUG, -vvv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all log output except for errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Write logs to a specified file in addition to the console output
    #[arg(long, global = true, value_name = "PATH")]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run leap-frog dynamics with shell relaxation at every step.
    Run(RunArgs),
    /// Validate a system file and print a summary of its contents.
    Check(CheckArgs),
}

/// Arguments for the `run` subcommand.
#[derive(Args, Debug)]
pub struct RunArgs {
    // --- Core Arguments ---
    /// Path to the input system file (TOML).
    #[arg(short, long, required = true, value_name = "PATH")]
    pub input: PathBuf,

    /// Path to the run configuration file in TOML format.
    /// Built-in defaults are used for anything it leaves out.
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Write the final system (positions and velocities) to this file.
    #[arg(short, long, value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// Write per-step energies and relaxation statistics as CSV.
    #[arg(short, long, value_name = "PATH")]
    pub records: Option<PathBuf>,

    // --- Dynamics Overrides ---
    /// Override the number of MD steps.
    #[arg(short = 'n', long, value_name = "INT")]
    pub steps: Option<u64>,

    /// Override the integration time step in ps.
    #[arg(long, value_name = "FLOAT")]
    pub time_step: Option<f64>,

    // --- Relaxation Overrides ---
    /// Override the RMS force tolerance for shell relaxation.
    #[arg(short = 't', long, value_name = "FLOAT")]
    pub force_tolerance: Option<f64>,

    /// Override the maximum number of relaxation iterations per step.
    #[arg(long, value_name = "INT")]
    pub max_iterations: Option<usize>,

    /// Do not predict shell positions from the nuclei before relaxing.
    #[arg(long)]
    pub no_prediction: bool,

    /// Treat the input as a continuation and keep its shell positions on the first step.
    #[arg(long)]
    pub continuation: bool,

    /// Set a specific configuration value, overriding the config file.
    /// Can be used multiple times. Example: -S relaxation.step-shrink=0.5
    #[arg(short = 'S', long = "set", value_name = "KEY=VALUE", num_args(0..))]
    pub set_values: Vec<String>,
}

/// Arguments for the `check` subcommand.
#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Path to the system file to validate.
    #[arg(required = true, value_name = "PATH")]
    pub input: PathBuf,
}
