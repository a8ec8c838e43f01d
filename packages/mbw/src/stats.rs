//! Aggregation of the workers' elapsed-time samples into speeds, spreads and idle times.
//!
//! Two views of the spread are produced. [`PatternRow::loop_std_dev`] is the sample standard
//! deviation of one worker's speed across its own loops. [`PatternRow::spread_std_dev`] and
//! [`PatternSummary::std_dev`] divide by the worker count instead, describing how consistent a
//! pattern's speed is across the workers of the run.

use std::time::Duration;

use crate::{CopyPattern, PatternSet};

/// Read access to one worker's elapsed-time samples.
pub trait SampleTable {
    /// Number of measured loops. Rows `1..=loops` hold samples, row 0 holds the mean.
    fn loops(&self) -> usize;

    /// Elapsed seconds in `row` for `pattern`.
    fn elapsed(&self, row: usize, pattern: CopyPattern) -> f64;
}

/// One pattern's numbers for one worker.
#[derive(Clone, Debug, PartialEq)]
pub struct PatternRow {
    pattern: CopyPattern,
    elapsed: Vec<f64>,
    speeds: Vec<f64>,
    mean_speed: f64,
    loop_std_dev: f64,
    spread_std_dev: f64,
}

impl PatternRow {
    /// The pattern these numbers describe.
    #[must_use]
    pub fn pattern(&self) -> CopyPattern {
        self.pattern
    }

    /// Elapsed seconds, index 0 being the worker's own mean and `1..=loops` the trials.
    #[must_use]
    pub fn elapsed(&self) -> &[f64] {
        &self.elapsed
    }

    /// Speed in MiB/s for each entry of [`Self::elapsed`].
    #[must_use]
    pub fn speeds(&self) -> &[f64] {
        &self.speeds
    }

    /// Mean of the per-trial speeds, in MiB/s.
    #[must_use]
    pub fn mean_speed(&self) -> f64 {
        self.mean_speed
    }

    /// Sample standard deviation of the per-trial speeds across this worker's loops.
    #[must_use]
    pub fn loop_std_dev(&self) -> f64 {
        self.loop_std_dev
    }

    /// Standard deviation of the per-trial speeds normalized by the worker count, as reported in
    /// the cross-worker table. Zero for a single worker.
    #[must_use]
    pub fn spread_std_dev(&self) -> f64 {
        self.spread_std_dev
    }
}

/// Everything measured about one worker.
#[derive(Clone, Debug, PartialEq)]
pub struct WorkerStatistics {
    worker: usize,
    rows: Vec<PatternRow>,
    idle_seconds: f64,
}

impl WorkerStatistics {
    /// Worker number (1-based).
    #[must_use]
    pub fn worker(&self) -> usize {
        self.worker
    }

    /// One row per enabled pattern, in execution order.
    #[must_use]
    pub fn rows(&self) -> &[PatternRow] {
        &self.rows
    }

    /// Run time during which this worker was not executing its measured workload.
    #[must_use]
    pub fn idle_seconds(&self) -> f64 {
        self.idle_seconds
    }
}

/// One pattern's numbers across all workers.
#[derive(Clone, Debug, PartialEq)]
pub struct PatternSummary {
    pattern: CopyPattern,
    total_speed: f64,
    mean_speed: f64,
    std_dev: f64,
}

impl PatternSummary {
    /// The pattern these numbers describe.
    #[must_use]
    pub fn pattern(&self) -> CopyPattern {
        self.pattern
    }

    /// Sum of the workers' mean speeds: the bandwidth of the whole machine, in MiB/s.
    #[must_use]
    pub fn total_speed(&self) -> f64 {
        self.total_speed
    }

    /// Mean of every per-trial speed of every worker, in MiB/s.
    #[must_use]
    pub fn mean_speed(&self) -> f64 {
        self.mean_speed
    }

    /// Spread of every per-trial speed of every worker, normalized by the worker count.
    #[must_use]
    pub fn std_dev(&self) -> f64 {
        self.std_dev
    }
}

/// The aggregate of a completed run.
#[derive(Clone, Debug, PartialEq)]
pub struct Statistics {
    workers: Vec<WorkerStatistics>,
    summaries: Vec<PatternSummary>,
    total_run_seconds: f64,
}

impl Statistics {
    /// Per-worker numbers, in worker order.
    #[must_use]
    pub fn workers(&self) -> &[WorkerStatistics] {
        &self.workers
    }

    /// Cross-worker numbers, one per enabled pattern.
    #[must_use]
    pub fn summaries(&self) -> &[PatternSummary] {
        &self.summaries
    }

    /// Wall-clock time from the execution request until the last worker finished.
    #[must_use]
    pub fn total_run_seconds(&self) -> f64 {
        self.total_run_seconds
    }
}

#[derive(Clone, Copy, Debug, Default)]
struct Sums {
    sum: f64,
    sum_of_squares: f64,
}

impl Sums {
    fn add(&mut self, value: f64) {
        self.sum += value;
        self.sum_of_squares += value * value;
    }

    fn merge(&mut self, other: Self) {
        self.sum += other.sum;
        self.sum_of_squares += other.sum_of_squares;
    }

    /// Sum of squared deviations from the mean of `count` values, divided by `denominator`.
    fn std_dev(self, count: f64, denominator: f64) -> f64 {
        let deviations = self.sum_of_squares - self.sum * self.sum / count;

        // Rounding can push a zero variance slightly negative.
        (deviations / denominator).max(0.0).sqrt()
    }
}

#[expect(
    clippy::cast_precision_loss,
    reason = "worker and loop counts are far below 2^52"
)]
fn as_f64(count: usize) -> f64 {
    count as f64
}

/// Aggregates the samples of all workers (in worker order) for the enabled patterns.
///
/// `trial_mib` is the payload moved by one trial. Every table must have the same loop count.
///
/// # Panics
///
/// Panics if `tables` is empty or the tables disagree on the loop count.
pub fn aggregate<T: SampleTable>(
    tables: &[T],
    patterns: PatternSet,
    trial_mib: f64,
    total_run: Duration,
) -> Statistics {
    let loops = tables.first().expect("at least one worker").loops();
    assert!(
        tables.iter().all(|t| t.loops() == loops),
        "all workers run the same number of loops"
    );

    let worker_count = as_f64(tables.len());
    let loop_count = as_f64(loops);
    let total_run_seconds = total_run.as_secs_f64();

    let mut global = vec![Sums::default(); CopyPattern::ALL.len()];
    let mut total_speeds = vec![0.0; CopyPattern::ALL.len()];

    let workers = tables
        .iter()
        .zip(1..)
        .map(|(table, worker)| {
            let mut busy_seconds = 0.0;

            let rows = patterns
                .iter()
                .map(|pattern| {
                    let elapsed = (0..=loops)
                        .map(|row| table.elapsed(row, pattern))
                        .collect::<Vec<_>>();
                    let speeds = elapsed
                        .iter()
                        .map(|seconds| trial_mib / seconds)
                        .collect::<Vec<_>>();

                    // Row 0 is the mean, which is not a sample of its own.
                    let mut sums = Sums::default();
                    for speed in speeds.iter().skip(1) {
                        sums.add(*speed);
                    }

                    if let Some(accumulated) = global.get_mut(pattern.index()) {
                        accumulated.merge(sums);
                    }

                    let mean_speed = sums.sum / loop_count;
                    if let Some(total) = total_speeds.get_mut(pattern.index()) {
                        *total += mean_speed;
                    }

                    busy_seconds += elapsed.first().copied().unwrap_or_default() * loop_count;

                    PatternRow {
                        pattern,
                        mean_speed,
                        loop_std_dev: if loops > 1 {
                            sums.std_dev(loop_count, loop_count - 1.0)
                        } else {
                            0.0
                        },
                        spread_std_dev: if tables.len() > 1 {
                            sums.std_dev(loop_count, worker_count - 1.0)
                        } else {
                            0.0
                        },
                        elapsed,
                        speeds,
                    }
                })
                .collect();

            WorkerStatistics {
                worker,
                rows,
                idle_seconds: total_run_seconds - busy_seconds,
            }
        })
        .collect();

    let summaries = patterns
        .iter()
        .map(|pattern| {
            let sums = global.get(pattern.index()).copied().unwrap_or_default();
            let samples = loop_count * worker_count;

            PatternSummary {
                pattern,
                total_speed: total_speeds.get(pattern.index()).copied().unwrap_or_default(),
                mean_speed: sums.sum / samples,
                std_dev: if tables.len() > 1 {
                    sums.std_dev(samples, worker_count - 1.0)
                } else {
                    0.0
                },
            }
        })
        .collect();

    Statistics {
        workers,
        summaries,
        total_run_seconds,
    }
}
