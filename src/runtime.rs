use anyhow::{Result, bail};
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use rayon::ThreadPoolBuilder;
use std::sync::Once;

/// Environment variables consulted, in order, for the worker count. Batch
/// schedulers export the SLURM/OMP ones.
const THREAD_HINTS: [&str; 5] = [
    "PIXELS_THREADS",
    "RAYON_NUM_THREADS",
    "SLURM_CPUS_PER_TASK",
    "SLURM_CPUS_ON_NODE",
    "OMP_NUM_THREADS",
];

#[derive(Debug, PartialEq)]
struct PoolSize {
    threads: usize,
    hint: &'static str,
}

/// First hint holding a positive integer; blanks and garbage are skipped.
fn pool_size_from(lookup: impl Fn(&str) -> Option<String>) -> Option<PoolSize> {
    THREAD_HINTS.iter().find_map(|&hint| {
        let threads = lookup(hint)?.trim().parse::<usize>().ok().filter(|&n| n > 0)?;
        Some(PoolSize { threads, hint })
    })
}

fn pool_size() -> PoolSize {
    pool_size_from(|key| std::env::var(key).ok()).unwrap_or_else(|| PoolSize {
        threads: std::thread::available_parallelism().map_or(1, |n| n.get()),
        hint: "available_parallelism",
    })
}

/// Sizes the global rayon pool once per process. Later calls are no-ops, and
/// a pool someone else already built is kept.
pub fn configure_thread_pool() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let size = pool_size();
        let built = ThreadPoolBuilder::new()
            .num_threads(size.threads)
            .thread_name(|i| format!("pixels-worker-{i}"))
            .build_global();
        match built {
            Ok(()) => info!("rayon pool = {} threads (from {})", size.threads, size.hint),
            Err(err) => warn!("rayon pool left at default: {err}"),
        }
    });
}

/// Bar drawn on stderr; indicatif hides it when stderr is not a terminal.
pub fn progress_bar(len: usize, unit: &str) -> ProgressBar {
    let pb = ProgressBar::new(len as u64);
    let template = format!("[{{elapsed_precise}}] {{bar:40}} {{pos}}/{{len}} {unit} {{msg}}");
    if let Ok(style) = ProgressStyle::with_template(&template) {
        pb.set_style(style.progress_chars("=>-"));
    }
    pb
}

// -------------------------------------------------------------------------------------
// Memory tracking (large grids are the dominant cost)
// -------------------------------------------------------------------------------------

const KB: u64 = 1024;
const MB: u64 = KB * 1024;
const GB: u64 = MB * 1024;

fn parse_budget_var(var: &str, multiplier: u64) -> Option<u64> {
    let raw = std::env::var(var).ok()?;
    if raw.trim().is_empty() {
        return None;
    }
    raw.trim()
        .parse::<u64>()
        .ok()
        .map(|v| v.saturating_mul(multiplier))
}

fn memory_budget_bytes() -> Option<u64> {
    parse_budget_var("PIXELS_MAX_RSS_MB", MB).or_else(|| parse_budget_var("PIXELS_MAX_RSS_GB", GB))
}

fn current_rss_bytes() -> Option<u64> {
    let contents = std::fs::read_to_string("/proc/self/statm").ok()?;
    let mut parts = contents.split_whitespace();
    let _total = parts.next()?;
    let resident_pages: u64 = parts.next()?.parse().ok()?;
    let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if page_size <= 0 {
        return None;
    }
    Some(resident_pages.saturating_mul(page_size as u64))
}

fn bytes_to_gib(bytes: u64) -> f64 {
    bytes as f64 / GB as f64
}

/// Logs resident memory after `stage` and fails once it exceeds the budget
/// set via `PIXELS_MAX_RSS_*`. Silent where `/proc` is unavailable.
pub fn report_memory(stage: &str) -> Result<()> {
    let Some(rss) = current_rss_bytes() else {
        return Ok(());
    };
    match memory_budget_bytes() {
        Some(limit) => {
            info!(
                "[mem] {} rss={:.2} GiB (limit {:.2} GiB)",
                stage,
                bytes_to_gib(rss),
                bytes_to_gib(limit)
            );
            if rss > limit {
                bail!(
                    "RSS {:.2} GiB exceeded limit {:.2} GiB after {} (set via PIXELS_MAX_RSS_*)",
                    bytes_to_gib(rss),
                    bytes_to_gib(limit),
                    stage
                );
            }
        }
        None => info!("[mem] {} rss={:.2} GiB", stage, bytes_to_gib(rss)),
    }
    Ok(())
}
