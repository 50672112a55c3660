//! dagen CLI - generate Ninja build files from build targets

use anyhow::Result;
use clap::Parser;
use miette::Diagnostic;
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;

use cli::{Cli, Commands};
use dagen::builder::{BuildError, GraphError};
use dagen::core::flags::FlagError;
use dagen::core::manifest::ManifestError;

fn main() {
    let cli = Cli::parse();
    let verbose = cli.verbose;

    if let Err(e) = run(cli) {
        eprintln!("error: {:#}", e);
        if verbose {
            if let Some(help) = help_for(&e) {
                eprintln!("help: {}", help);
            }
        }
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    // Set up logging
    let filter = if cli.verbose {
        EnvFilter::new("dagen=debug")
    } else {
        EnvFilter::new("dagen=info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    // Execute command
    match cli.command {
        Commands::Generate(args) => commands::generate::execute(args, cli.verbose),
        Commands::Targets(args) => commands::targets::execute(args, cli.verbose),
        Commands::Flags(args) => commands::flags::execute(args, cli.verbose),
        Commands::Completions(args) => commands::completions::execute(args),
    }
}

/// Help text of the first diagnostic in the error chain that has one.
fn help_for(err: &anyhow::Error) -> Option<String> {
    err.chain().find_map(|cause| {
        let help = if let Some(e) = cause.downcast_ref::<BuildError>() {
            e.help()
        } else if let Some(e) = cause.downcast_ref::<GraphError>() {
            e.help()
        } else if let Some(e) = cause.downcast_ref::<FlagError>() {
            e.help()
        } else if let Some(e) = cause.downcast_ref::<ManifestError>() {
            e.help()
        } else {
            None
        };
        help.map(|h| h.to_string())
    })
}
