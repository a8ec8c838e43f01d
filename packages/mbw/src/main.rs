#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(coverage_nightly, coverage(off))]

//! Binary entry point for the mbw benchmark.
//!
//! Excluded from mutation testing; the end-to-end tests exercise it as a subprocess.

use std::io;
use std::process::ExitCode;
use std::time::Duration;

use argh::FromArgs;
use mbw::{
    Configuration, CopyPattern, DEFAULT_BLOCK_SIZE, DEFAULT_LOOPS, DEFAULT_REPEATS, Outcome,
};
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Measure memory copy bandwidth with one pinned worker process per processor. Logs go to
/// stderr, filtered by RUST_LOG (default: warn).
#[derive(FromArgs)]
struct Args {
    /// size of each of the two buffers every worker copies between, in MiB
    #[argh(positional)]
    array_mib: u64,

    /// number of runs per test; 0 runs a single test until terminated
    #[argh(option, short = 'n', default = "DEFAULT_LOOPS")]
    loops: u32,

    /// number of full-buffer copies timed together as one trial
    #[argh(option, short = 'r', default = "DEFAULT_REPEATS")]
    repeats: u32,

    /// test to run: 0 = plain copy, 1 = element-wise copy, 2 = block copy; repeatable, all by
    /// default
    #[argh(option, short = 't')]
    tests: Vec<usize>,

    /// block size in bytes for the block copy test
    #[argh(option, short = 'b', default = "DEFAULT_BLOCK_SIZE")]
    block_size: usize,

    /// number of worker processes
    #[argh(option, short = 'p', default = "1")]
    processes: usize,

    /// cpus to pin the workers to, e.g. "0,2,4:7,8:2:14"; worker i uses cpu i-1 by default
    #[argh(option, short = 'f')]
    affinity: Option<String>,

    /// print only the pin list and the final report
    #[argh(switch, short = 'q')]
    quiet: bool,

    /// do not print each worker's per-test average lines
    #[argh(switch, short = 'a')]
    no_average: bool,

    /// pause in milliseconds before each phase, letting the system settle
    #[argh(option, short = 's', default = "1000")]
    settle_ms: u64,
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn configure(args: Args) -> Result<Configuration, String> {
    let mut builder = Configuration::builder(args.array_mib)
        .loops(args.loops)
        .repeats(args.repeats)
        .block_size(args.block_size)
        .processes(args.processes)
        .quiet(args.quiet)
        .show_average(!args.no_average)
        .settle(Duration::from_millis(args.settle_ms));

    for test in args.tests {
        let pattern = CopyPattern::from_index(test).ok_or_else(|| {
            format!(
                "unknown test {test}, expected 0 to {}",
                CopyPattern::ALL.len().saturating_sub(1)
            )
        })?;
        builder = builder.pattern(pattern);
    }

    if let Some(affinity) = args.affinity {
        builder = builder.affinity(affinity);
    }

    builder.build().map_err(|e| e.to_string())
}

// Binary entry point - mutations would require subprocess testing.
#[cfg_attr(test, mutants::skip)]
fn main() -> ExitCode {
    let args: Args = argh::from_env();

    init_logging();

    let config = match configure(args) {
        Ok(config) => config,
        Err(message) => {
            eprintln!("Error: {message}");
            return ExitCode::FAILURE;
        }
    };

    debug!(?config, "configuration accepted");

    // Children inherit the unlocked handle and write to it directly.
    match mbw::run(&config, &mut io::stdout()) {
        Ok(outcome) => {
            if matches!(outcome, Outcome::Detached) {
                debug!("workers keep running until terminated");
            }
            ExitCode::SUCCESS
        }
        Err(error) => {
            eprintln!("Error: {error}");
            ExitCode::FAILURE
        }
    }
}
