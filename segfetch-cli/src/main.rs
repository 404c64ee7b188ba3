//! segfetch CLI
//!
//! Command-line front end for the segfetch download engine: download a URL
//! with a progress bar, inspect recorded downloads, and edit the config file.

mod commands;
mod error;
mod logging;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use commands::config::ConfigCommands;
use commands::get::GetArgs;
use commands::list::ListArgs;
use error::CliError;

#[derive(Debug, Parser)]
#[command(name = "segfetch")]
#[command(version, about = "Segmented, resumable HTTP downloader", long_about = None)]
struct Cli {
    /// Write logs to this file instead of stderr
    #[arg(long, global = true, value_name = "PATH")]
    log_file: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Download a URL, resuming any partial file already on disk
    Get(GetArgs),

    /// List recorded downloads
    List(ListArgs),

    /// View or edit configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

fn main() {
    let cli = Cli::parse();

    let _log_guard = match logging::init(cli.log_file.as_deref(), cli.verbose) {
        Ok(guard) => guard,
        Err(e) => exit_with(e),
    };

    if let Err(e) = run(cli.command) {
        exit_with(e);
    }
}

fn run(command: Commands) -> Result<(), CliError> {
    match command {
        Commands::Get(args) => commands::get::run(args),
        Commands::List(args) => commands::list::run(args),
        Commands::Config { command } => commands::config::run(command),
    }
}

fn exit_with(error: CliError) -> ! {
    eprintln!("Error: {}", error);
    std::process::exit(error.exit_code());
}
