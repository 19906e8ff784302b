//! Logging configuration using tracing.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Verbosity at which live transfer progress is displayed
pub const PROGRESS_VERBOSITY: u8 = 2;

/// Verbosity at which every command is echoed before it runs
pub const ECHO_VERBOSITY: u8 = 3;

/// Map the number of `-v` flags onto a filter directive.
/// Without any flag the configured base level is used.
pub fn level_for_verbosity(verbosity: u8, base: &str) -> &str {
    match verbosity {
        0 => base,
        1 | 2 => "debug",
        _ => "trace",
    }
}

/// Initialize logging with the specified level.
/// All diagnostics go to standard output.
pub fn init(level: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .with_target(false),
        )
        .try_init()?;

    Ok(())
}
