//! Logging bootstrap for the command-line tools.
//!
//! # Responsibility
//! - Route `log` records to stderr with timestamps and levels.
//! - Let `RUST_LOG` override the level chosen on the command line.

use anyhow::{Context, Result};
use flexi_logger::{Logger, LoggerHandle};

/// Maps a `-v` count to a log spec.
pub fn level_for(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}

/// Starts the global logger. Keep the returned handle alive for the whole
/// run; dropping it flushes and shuts the logger down.
pub fn init_logging(verbosity: u8) -> Result<LoggerHandle> {
    Logger::try_with_env_or_str(level_for(verbosity))
        .context("parse log specification")?
        .log_to_stderr()
        .format_for_stderr(flexi_logger::detailed_format)
        .start()
        .context("start logger")
}

#[cfg(test)]
mod tests {
    use super::level_for;

    #[test]
    fn verbosity_raises_the_level() {
        assert_eq!(level_for(0), "info");
        assert_eq!(level_for(1), "debug");
        assert_eq!(level_for(7), "trace");
    }
}
