//! Console output of a run. The numbers are what matters; the wording is for humans.

use std::fmt::{self, Display};
use std::io::{self, Write};
use std::time::Duration;

use crate::{Configuration, CopyPattern, ProcessorIndex, Statistics, Word};

/// One line describing a single trial (or a pattern's average), printed by workers.
#[derive(Clone, Copy, Debug)]
pub(crate) struct TrialLine {
    pattern: CopyPattern,
    seconds: f64,
    mib: f64,
}

impl TrialLine {
    pub(crate) fn new(pattern: CopyPattern, seconds: f64, mib: f64) -> Self {
        Self {
            pattern,
            seconds,
            mib,
        }
    }
}

impl Display for TrialLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Method: {}\tElapsed: {:.5}\tMiB: {:.5}\tCopy: {:.3} MiB/s",
            self.pattern,
            self.seconds,
            self.mib,
            self.mib / self.seconds
        )
    }
}

/// Prints the processor each worker is pinned to, in worker order.
pub(crate) fn write_pins(out: &mut impl Write, pins: &[ProcessorIndex]) -> io::Result<()> {
    writeln!(out, "The workers would be pinned to these cpus:")?;

    for pin in pins {
        write!(out, "{pin:4}")?;
    }

    writeln!(out)
}

/// Prints how much memory the run is about to use.
pub(crate) fn write_plan(out: &mut impl Write, config: &Configuration) -> io::Result<()> {
    let elements = config.element_count();

    writeln!(
        out,
        "Each element uses {} bytes. Allocating 2*{elements} elements = {} bytes of memory per worker.",
        size_of::<Word>(),
        config.array_bytes().saturating_mul(2)
    )?;

    if config.patterns().contains(CopyPattern::Block) {
        writeln!(
            out,
            "Using {} bytes as blocks for memcpy block copy test.",
            config.block_size()
        )?;
    }

    match config.loops() {
        Some(loops) => writeln!(out, "Getting down to business... Doing {loops} runs per test."),
        None => writeln!(out, "Getting down to business... Running until terminated."),
    }
}

/// Everything the controller learned from a completed run.
#[derive(Clone, Debug, PartialEq)]
pub struct Report {
    sync_cost: Duration,
    alloc_cost: Duration,
    statistics: Statistics,
}

impl Report {
    pub(crate) fn new(sync_cost: Duration, alloc_cost: Duration, statistics: Statistics) -> Self {
        Self {
            sync_cost,
            alloc_cost,
            statistics,
        }
    }

    /// Time between requesting readiness and the last worker confirming it. A large value means
    /// workers were not all scheduled at once and the results are less trustworthy.
    #[must_use]
    pub fn sync_cost(&self) -> Duration {
        self.sync_cost
    }

    /// Time the workers needed to allocate and touch their buffers.
    #[must_use]
    pub fn alloc_cost(&self) -> Duration {
        self.alloc_cost
    }

    /// The aggregated measurements.
    #[must_use]
    pub fn statistics(&self) -> &Statistics {
        &self.statistics
    }
}

impl Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stats = &self.statistics;

        for worker in stats.workers() {
            writeln!(f, "Worker #{}", worker.worker())?;

            for row in worker.rows() {
                write!(f, "{:<8}", row.pattern())?;
                for seconds in row.elapsed() {
                    write!(f, "\t{seconds:8.3}")?;
                }
                writeln!(f)?;
            }

            for row in worker.rows() {
                write!(f, "{:<8}", row.pattern())?;
                for speed in row.speeds() {
                    write!(f, "\t{speed:8.3}")?;
                }
                writeln!(f, "\t| {:8.3}", row.loop_std_dev())?;
            }

            writeln!(f, "Worker idle time: {:8.3}", worker.idle_seconds())?;
        }

        writeln!(f)?;
        writeln!(f, "Speed, std-dev and idle time:")?;
        for (index, summary) in stats.summaries().iter().enumerate() {
            write!(f, "{:<8}", summary.pattern())?;
            for worker in stats.workers() {
                let row = worker.rows().get(index);
                write!(f, " {:7.2}", row.map(|r| r.mean_speed()).unwrap_or_default())?;
            }
            write!(f, " |")?;
            for worker in stats.workers() {
                let row = worker.rows().get(index);
                write!(f, " {:7.2}", row.map(|r| r.spread_std_dev()).unwrap_or_default())?;
            }
            writeln!(f)?;
        }

        writeln!(f)?;
        writeln!(f, "Total speed:")?;
        for summary in stats.summaries() {
            writeln!(
                f,
                "{:<8} {:7.2} {:7.2} {:7.2}",
                summary.pattern(),
                summary.total_speed(),
                summary.mean_speed(),
                summary.std_dev()
            )?;
        }
        for worker in stats.workers() {
            write!(f, " {:7.2}", worker.idle_seconds())?;
        }
        writeln!(f)?;

        writeln!(
            f,
            "All tests done in {:10.3} seconds",
            stats.total_run_seconds()
        )?;
        writeln!(f)
    }
}
