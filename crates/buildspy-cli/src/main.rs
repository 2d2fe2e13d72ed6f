mod cli;
mod commands;
mod logging;
mod render;

use anyhow::Result;
use buildspy_core::config;
use clap::Parser;
use cli::{Cli, Commands, Verbosity};
use colored::Colorize;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let verbosity = cli.verbosity();

    // `completion` needs no config, handle it early
    if let Commands::Completion(args) = cli.command {
        clap_complete::generate(
            args.shell,
            &mut <Cli as clap::CommandFactory>::command(),
            "buildspy",
            &mut std::io::stdout(),
        );
        return Ok(());
    }

    let _log_guard = logging::init(cli.log_file.as_deref(), verbosity);

    let (parser_config, source) = match config::load(cli.config.as_deref()) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("{} Failed to load config: {:#}", "ERROR".red().bold(), e);
            std::process::exit(1);
        }
    };

    if verbosity == Verbosity::Verbose {
        let from = source
            .path()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "built-in defaults".to_string());
        eprintln!("{} config from {}", "DEBUG".dimmed(), from);
    }

    let (result, json) = match cli.command {
        Commands::Parse(args) => {
            let json = args.json;
            (commands::parse::run(&parser_config, args, verbosity).await, json)
        }
        Commands::Completion(_) => unreachable!("completion handled above"),
    };

    match result {
        Ok(()) => {
            if verbosity != Verbosity::Quiet && !json {
                println!("\n{}", "SUCCESS".green().bold());
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("\n{} {}", "FAILED".red().bold(), e);
            std::process::exit(1);
        }
    }
}
