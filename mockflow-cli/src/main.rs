// Mockflow CLI
// Entry point for campaign submission, inspection and partitioned workers

mod commands;
mod output;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Submit and inspect multi-realization mock campaigns
#[derive(Parser, Debug)]
#[command(name = "mockflow", version, about)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build and submit every realization, then the stack
    Run(commands::run::RunArgs),

    /// Check a configuration without writing or submitting anything
    Validate(commands::validate::ValidateArgs),

    /// Print the realizations a seed specification expands to
    Seeds(commands::seeds::SeedsArgs),

    /// Print how items are split across worker ranks
    Partition(commands::partition::PartitionArgs),

    /// Run one rank (or all ranks) of a partitioned command list
    Worker(commands::worker::WorkerArgs),

    /// Query the final state of a submitted job
    Status(commands::status::StatusArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    init_tracing(cli.verbose)?;

    match cli.command {
        Command::Run(args) => commands::run::execute(args).await,
        Command::Validate(args) => commands::validate::execute(args),
        Command::Seeds(args) => commands::seeds::execute(args),
        Command::Partition(args) => commands::partition::execute(args),
        Command::Worker(args) => commands::worker::execute(args).await,
        Command::Status(args) => commands::status::execute(args).await,
    }
}

fn init_tracing(verbose: u8) -> Result<()> {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("mockflow={0},mockflow_service={0}", level)))?;

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(filter)
        .init();
    Ok(())
}
