mod commands;
mod helpers;

use clap::Parser;
use sharm_core::domain::{ErrorContext, HarmError};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

pub fn run_from_env() -> i32 {
    let args: Vec<String> = std::env::args().collect();
    match parse_and_dispatch(args) {
        Ok(code) => code,
        Err(error) => {
            let mut context = ErrorContext::new();
            context.record(error.as_harm_error());
            context.handle(false)
        }
    }
}

fn parse_and_dispatch(args: Vec<String>) -> Result<i32, CliError> {
    match Cli::try_parse_from(&args) {
        Ok(cli) => {
            init_tracing(cli.verbose);
            let options = helpers::GlobalOptions {
                config: cli.config,
            };
            dispatch_parsed(cli.command, &options)
        }
        Err(err) => match err.kind() {
            clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion => {
                print!("{}", err);
                Ok(0)
            }
            _ => Err(CliError::Usage(err.to_string())),
        },
    }
}

/// `RUST_LOG` decides the filter unless `-v` asks for debug output.
fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

#[derive(Parser)]
#[command(name = "sharm", version, about = "Spherical harmonic synthesis and analysis")]
struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Session configuration (JSON)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(clap::Subcommand)]
enum CliCommand {
    /// Print maximum degree and scaling constants of a coefficient file
    Info(commands::InfoArgs),
    /// Convert a coefficient file to another format
    Convert(commands::ConvertArgs),
    /// Rescale coefficients to new mu and R
    Rescale(commands::RescaleArgs),
    /// Degree variances (or amplitudes) as JSON
    Dv(commands::DvArgs),
    /// Synthesize on a quadrature grid and write JSON rows
    Synth(commands::SynthArgs),
    /// Synthesize on a quadrature grid, analyse back and report the difference
    Roundtrip(commands::RoundtripArgs),
}

fn dispatch_parsed(command: CliCommand, options: &helpers::GlobalOptions) -> Result<i32, CliError> {
    match command {
        CliCommand::Info(args) => commands::run_info_command(args),
        CliCommand::Convert(args) => commands::run_convert_command(args),
        CliCommand::Rescale(args) => commands::run_rescale_command(args),
        CliCommand::Dv(args) => commands::run_dv_command(args),
        CliCommand::Synth(args) => commands::run_synth_command(args, options),
        CliCommand::Roundtrip(args) => commands::run_roundtrip_command(args, options),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("{0}")]
    Usage(String),
    #[error("{0}")]
    Compute(HarmError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<HarmError> for CliError {
    fn from(error: HarmError) -> Self {
        Self::Compute(error)
    }
}

impl CliError {
    fn as_harm_error(&self) -> HarmError {
        match self {
            Self::Usage(message) => HarmError::invalid_argument("INPUT.CLI_USAGE", message.clone()),
            Self::Compute(error) => error.clone(),
            Self::Internal(error) => HarmError::io("IO.CLI", format!("{error:#}")),
        }
    }
}
