use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use tracing::{debug, warn};

use crate::cli::Verbosity;
use crate::render::{RenderMode, RenderSummary, spawn_renderer};
use buildspy_core::{BuildResult, LineDispatcher, ParserConfig};

/// Arguments for the `parse` command
#[derive(Args, Debug)]
pub struct ParseArgs {
    /// Build log to read (reads stdin when omitted or `-`)
    pub file: Option<PathBuf>,

    /// Print one JSON object per event instead of the tree
    #[arg(long)]
    pub json: bool,

    /// Hide forwarded build output, show only the tree and diagnostics
    #[arg(long)]
    pub no_output: bool,

    /// Also fail when the build never reported how it ended
    #[arg(long)]
    pub strict: bool,
}

/// Open the log source: a file, or stdin for `None` / `-`.
fn open_input(file: Option<&Path>) -> Result<Box<dyn BufRead + Send>> {
    match file {
        Some(path) if path != Path::new("-") => {
            let file = File::open(path)
                .with_context(|| format!("Failed to open build log: {}", path.display()))?;
            Ok(Box::new(BufReader::new(file)))
        }
        _ => Ok(Box::new(BufReader::new(io::stdin()))),
    }
}

/// Split a byte stream into lines, decoding each lossily.
///
/// Worker output is not guaranteed to be valid UTF-8; a read error ends the
/// stream.
fn lines_of(input: Box<dyn BufRead + Send>) -> impl Iterator<Item = String> + Send {
    input.split(b'\n').map_while(|chunk| match chunk {
        Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
        Err(e) => {
            warn!(error = %e, "stopped reading build log");
            None
        }
    })
}

/// Decide the exit status from what the renderer saw.
fn check_outcome(summary: &RenderSummary, strict: bool) -> Result<()> {
    match &summary.session_result {
        Some(BuildResult::Failure { message }) => anyhow::bail!("build failed: {message}"),
        Some(BuildResult::Unknown) | None if strict => {
            anyhow::bail!("build did not report its result")
        }
        _ => Ok(()),
    }
}

/// Parse a build log and render its events
pub async fn run(config: &ParserConfig, args: ParseArgs, verbosity: Verbosity) -> Result<()> {
    let input = open_input(args.file.as_deref())?;

    let mode = if args.json {
        RenderMode::Json
    } else {
        RenderMode::Tree {
            show_output: !args.no_output,
            spinner: verbosity != Verbosity::Quiet,
        }
    };
    let (tx, render_handle) = spawn_renderer(mode);

    let dispatcher = LineDispatcher::with_default_matchers(config);
    let parse_handle = tokio::task::spawn_blocking(move || {
        let mut sink = tx;
        dispatcher.run(lines_of(input), &mut sink)
    });

    let ctx = parse_handle.await.context("parser task panicked")?;
    let summary = render_handle.await.context("renderer task panicked")??;
    debug!(?summary, "build log parsed");

    if verbosity == Verbosity::Verbose && !args.json {
        let pending = ctx.pending_projects();
        if !pending.is_empty() {
            println!(
                "{} {} project(s) never started: {}",
                "DEBUG".dimmed(),
                pending.len(),
                pending.join(", ")
            );
        }
    }

    if !args.json && verbosity != Verbosity::Quiet && summary.errors + summary.warnings > 0 {
        println!(
            "{} error(s), {} warning(s)",
            summary.errors.to_string().red(),
            summary.warnings.to_string().yellow()
        );
    }

    check_outcome(&summary, args.strict)
}
