mod cli;
mod commands;
mod config;
mod display;
mod facts;
mod manifest;
mod paths;
mod progress;
mod resource;
mod runner;
mod secrets;
mod ui;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command};
use std::io;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp(None)
        .init();

    let ctx = Context {
        verbose: cli.verbose,
        quiet: cli.quiet,
    };

    let code = match cli.command {
        Command::Apply(args) => commands::apply::apply(&ctx, args)?,
        Command::Plan(args) => commands::apply::plan(&ctx, args)?,
        Command::Validate(args) => commands::inspect::validate(&ctx, args)?,
        Command::Graph(args) => commands::inspect::graph(&ctx, args)?,
        Command::Facts(args) => commands::inspect::facts(&ctx, args)?,
        Command::Completions { shell } => {
            generate(shell, &mut Cli::command(), "converge", &mut io::stdout());
            0
        }
    };

    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
