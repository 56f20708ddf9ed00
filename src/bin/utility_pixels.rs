use anyhow::{Result, bail};
use clap::Parser;
use std::path::PathBuf;

use pixelgrid::grid::{self, DEFAULT_BUFFER};
use pixelgrid::{logging, runtime};

/// Creates a 100m x 100m pixel grid clipped to areas near utility
/// infrastructure.
#[derive(Parser)]
#[command(name = "utility_pixels")]
struct Args {
    /// Input utility lines GeoJSON file
    #[arg(short, long)]
    input: PathBuf,

    /// Output pixel grid GeoJSON file
    #[arg(short, long)]
    output: PathBuf,

    /// Buffer distance in meters
    #[arg(short, long, default_value_t = DEFAULT_BUFFER)]
    buffer: f64,

    /// Verbosity (-v debug, -vv trace); RUST_LOG overrides
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let _logger = logging::init_logging(args.verbose)?;
    runtime::configure_thread_pool();

    if !args.buffer.is_finite() || args.buffer < 0.0 {
        bail!("buffer must be a non-negative distance, got {}", args.buffer);
    }
    if !args.input.exists() {
        bail!("input {:?} does not exist", args.input);
    }
    grid::run(&args.input, &args.output, args.buffer)
}
