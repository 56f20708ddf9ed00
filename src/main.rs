use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use pixelgrid::enrich::{self, Dirs};
use pixelgrid::{logging, runtime};

/// Fills priority and feasibility pixels with attributes based on a config
/// file.
#[derive(Parser)]
#[command(name = "jurisdiction_pixels")]
struct Args {
    /// Configuration name, read from `<config dir>/<name>.yaml`
    config: String,

    /// Verbosity (-v debug, -vv trace); RUST_LOG overrides
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let _logger = logging::init_logging(args.verbose)?;
    runtime::configure_thread_pool();

    let dirs = Dirs::from_env();
    let path = dirs.config_path(&args.config);
    info!("loading configuration {}", path.display());
    let config = enrich::load_config(&path)?;

    let written = enrich::run(&config, &dirs)
        .with_context(|| format!("run configuration {}", path.display()))?;
    info!("done: {} files written to {}", written.len(), dirs.out.display());
    Ok(())
}
