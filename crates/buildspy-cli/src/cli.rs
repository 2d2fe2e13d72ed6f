use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;

use crate::commands::parse::ParseArgs;

/// buildspy: follow a build-tool worker's output as a tree of build events
///
/// Reads the worker's log (with or without the spy channel) and shows
/// which projects and goals ran, what they downloaded and how they ended.
#[derive(Parser, Debug)]
#[command(name = "buildspy", version, about, long_about = None)]
pub struct Cli {
    /// Increase output verbosity (show debug info)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Path to a buildspy.yaml (overrides BUILDSPY_CONFIG and discovery)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Write diagnostics to daily-rotated files in this directory
    #[arg(long, global = true, value_name = "DIR")]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Verbosity level resolved from --verbose / --quiet flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    /// --quiet: only errors and essential output
    Quiet,
    /// default: normal output
    Normal,
    /// --verbose: extra debug info
    Verbose,
}

impl Cli {
    /// Resolve the verbosity level from CLI flags
    pub fn verbosity(&self) -> Verbosity {
        match (self.quiet, self.verbose) {
            (true, _) => Verbosity::Quiet,
            (_, true) => Verbosity::Verbose,
            _ => Verbosity::Normal,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Parse a build log (or stdin) and render its events
    Parse(ParseArgs),

    /// Generate shell completions
    Completion(CompletionArgs),
}

#[derive(Args, Debug)]
pub struct CompletionArgs {
    /// The shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}
