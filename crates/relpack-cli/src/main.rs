//! relpack CLI - check and apply release artifacts in place

use clap::{Args, Parser, Subcommand};
use miette::Result;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod display;
mod error;
mod exit_codes;

use commands::RunOptions;

#[derive(Parser)]
#[command(name = "relpack")]
#[command(author = "relpack Contributors")]
#[command(version)]
#[command(about = "Validate release artifacts and substitute their variables in place", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug output
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Install directory
    #[arg(default_value = ".")]
    path: PathBuf,

    /// Configuration file (default: relpack.yaml in the install directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Registry prefix to replace in container images
    #[arg(long, env = "RELPACK_OLD_REGISTRY")]
    old_registry: Option<String>,

    /// Registry prefix to put in its place
    #[arg(long, env = "RELPACK_NEW_REGISTRY")]
    new_registry: Option<String>,

    /// Only accept raw control-byte markers, not their escaped spelling
    #[arg(long, env = "RELPACK_MARKERS_ONLY")]
    markers_only: bool,

    /// Bytes read per chunk while substituting
    #[arg(long, env = "RELPACK_CHUNK_SIZE")]
    chunk_size: Option<usize>,

    /// Output the run outcome as JSON
    #[arg(long)]
    json: bool,
}

impl From<RunArgs> for RunOptions {
    fn from(args: RunArgs) -> Self {
        RunOptions {
            config: args.config,
            old_registry: args.old_registry,
            new_registry: args.new_registry,
            markers_only: args.markers_only,
            chunk_size: args.chunk_size,
            json: args.json,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the control tables and dry-run substitution; writes nothing
    Check(RunArgs),

    /// Validate, dry-run, and substitute in place when everything passed
    Apply(RunArgs),

    /// Validate the control tables only and print the error matrix
    Tables {
        /// Install directory
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Output the reports as JSON
        #[arg(long)]
        json: bool,
    },
}

fn init_tracing(debug: bool) {
    let default = if debug { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_env("RELPACK_LOG").unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    // Setup miette for nice error display
    miette::set_panic_hook();

    let cli = Cli::parse();
    init_tracing(cli.debug);

    let result = match cli.command {
        Commands::Check(args) => {
            let path = args.path.clone();
            commands::check::run(&path, &args.into())
        }
        Commands::Apply(args) => {
            let path = args.path.clone();
            commands::apply::run(&path, &args.into())
        }
        Commands::Tables { path, json } => commands::tables::run(&path, json),
    };

    if let Err(err) = result {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }

    Ok(())
}
