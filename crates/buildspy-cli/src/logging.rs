use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::cli::Verbosity;

/// Initialize diagnostics logging.
///
/// The filter comes from `BUILDSPY_LOG`, then `RUST_LOG`, and otherwise
/// defaults to `warn` (`debug` with `--verbose`). Without a log directory,
/// records go to stderr so they never mix with rendered events on stdout.
/// With one, they go to `buildspy.YYYY-MM-DD` files rotated daily.
///
/// Returns a [`WorkerGuard`] when logging to files; it **must** be held for
/// the lifetime of the program so buffered records are flushed on shutdown.
pub fn init(log_dir: Option<&Path>, verbosity: Verbosity) -> Option<WorkerGuard> {
    let default_level = match verbosity {
        Verbosity::Verbose => "debug",
        Verbosity::Normal | Verbosity::Quiet => "warn",
    };
    let env_filter = EnvFilter::try_from_env("BUILDSPY_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    match log_dir {
        Some(dir) => {
            let file_appender = tracing_appender::rolling::daily(dir, "buildspy");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            tracing_subscriber::registry()
                .with(
                    fmt::layer()
                        .with_writer(non_blocking)
                        .with_ansi(false)
                        .with_target(true)
                        .with_thread_ids(true),
                )
                .with(env_filter)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
                .with(env_filter)
                .init();
            None
        }
    }
}
