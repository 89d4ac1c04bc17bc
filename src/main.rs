mod commands;

use std::path::PathBuf;

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};

use sprocket::{logging, session::Action};

use crate::commands::{add::AddArgs, control::ControlArgs, list::ListArgs};

#[derive(Parser)]
#[command(author, version, about = "Command-line client for a torrent-download daemon")]
struct Cli {
    /// Path to the configuration file. Defaults to ~/.config/sprocket/config.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity (repeatable)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Show what would change without sending mutations
    #[arg(short = 'n', long = "dry-run", global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List torrents matching the given filters
    List(ListArgs),
    /// Add torrent files to the daemon
    Add(AddArgs),
    /// Remove torrents matching the given filters
    Remove(ControlArgs),
    /// Start torrents matching the given filters
    Start(ControlArgs),
    /// Stop torrents matching the given filters
    Stop(ControlArgs),
    /// Re-verify the data of torrents matching the given filters
    Verify(ControlArgs),
}

fn main() -> Result<()> {
    let Cli {
        config,
        verbose,
        dry_run,
        command,
    } = Cli::parse();

    // dry runs always show what they would have done
    let verbosity = if dry_run { verbose.max(1) } else { verbose };
    logging::init(verbosity);

    if dry_run {
        println!("dry run: no changes will be made");
    }

    match command {
        Commands::List(args) => commands::list::execute(config, args)?,
        Commands::Add(args) => commands::add::execute(config, dry_run, args)?,
        Commands::Remove(args) => commands::control::execute(config, dry_run, Action::Remove, args)?,
        Commands::Start(args) => commands::control::execute(config, dry_run, Action::Start, args)?,
        Commands::Stop(args) => commands::control::execute(config, dry_run, Action::Stop, args)?,
        Commands::Verify(args) => commands::control::execute(config, dry_run, Action::Verify, args)?,
    }

    Ok(())
}
