use std::io::{self, Write};

use tracing::{debug, warn};

use crate::ops::timed_trial;
use crate::pal::{Bindings, BindingsFacade};
use crate::plane::{Interrupted, PhasePlane, WorkerSlot};
use crate::report::TrialLine;
use crate::results::ResultStore;
use crate::{Configuration, CopyPattern, Phase, Word};

/// Written into every word of a freshly allocated buffer so the kernel has to back all of its
/// pages before measuring starts.
const FILL_PATTERN: Word = 0xaa;

/// How a worker's participation in the run ended. Becomes the worker process exit code.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum WorkerExit {
    /// The workload ran to completion and the results are published.
    Done,

    /// The worker hit a problem and marked its slot as failed.
    Failed,

    /// The controller aborted the run.
    Aborted,
}

impl WorkerExit {
    pub(crate) fn code(self) -> i32 {
        match self {
            Self::Done => 0,
            Self::Failed | Self::Aborted => 1,
        }
    }
}

/// The measured side of the run: one per worker process.
#[derive(Debug)]
pub(crate) struct Worker<'a, P: PhasePlane + ?Sized> {
    config: &'a Configuration,
    slot: WorkerSlot<'a, P>,
    results: Option<&'a ResultStore>,
    bindings: &'a BindingsFacade,
}

impl<'a, P: PhasePlane + ?Sized> Worker<'a, P> {
    /// `results` is `None` only when the run has no loop limit, in which case nothing is recorded.
    pub(crate) fn new(
        config: &'a Configuration,
        worker: usize,
        plane: &'a P,
        results: Option<&'a ResultStore>,
        bindings: &'a BindingsFacade,
    ) -> Self {
        Self {
            config,
            slot: WorkerSlot::new(plane, worker),
            results,
            bindings,
        }
    }

    /// Takes part in every phase of the run. Returns only when the run is over for this worker,
    /// which for an unlimited run means never (unless something fails first).
    ///
    /// Per-trial lines go to `out` unless the run is quiet.
    pub(crate) fn run(&self, out: &mut impl Write) -> WorkerExit {
        match self.run_phases(out) {
            Ok(()) => WorkerExit::Done,
            Err(exit) => exit,
        }
    }

    fn run_phases(&self, out: &mut impl Write) -> Result<(), WorkerExit> {
        let worker = self.slot.worker();

        // Pinning comes first, but a failure can only be reported once the controller has issued
        // its first request, as that request would otherwise overwrite the report.
        let pinned = self.pin();

        self.await_request(Phase::Unstarted, Phase::SyncRequested)?;
        if !pinned {
            return Err(self.fail());
        }
        self.acknowledge(Phase::SyncRequested)?;

        self.await_request(Phase::SyncAck, Phase::AllocRequested)?;
        let Some(mut buffers) = Buffers::allocate(self.config.element_count()) else {
            warn!(worker, bytes = self.config.array_bytes(), "failed to allocate buffers");
            return Err(self.fail());
        };
        self.acknowledge(Phase::AllocRequested)?;
        debug!(worker, "buffers allocated");

        self.await_request(Phase::AllocAck, Phase::RunRequested)?;
        if let Err(error) = self.execute(&mut buffers, out) {
            warn!(worker, %error, "failed to write trial output");
            return Err(self.fail());
        }
        self.acknowledge(Phase::RunRequested)?;
        debug!(worker, "workload finished");

        Ok(())
    }

    fn pin(&self) -> bool {
        let worker = self.slot.worker();

        let processor = worker
            .checked_sub(1)
            .and_then(|index| self.config.pins().get(index))
            .copied()
            .expect("the configuration has one pin per worker");

        match self.bindings.pin_current_process(processor) {
            Ok(()) => {
                debug!(worker, processor, "pinned");
                true
            }
            Err(error) => {
                warn!(worker, processor, %error, "failed to pin worker");
                false
            }
        }
    }

    /// Waits for the controller to move past `current` and checks that it asked for `expected`.
    fn await_request(&self, current: Phase, expected: Phase) -> Result<(), WorkerExit> {
        match self.slot.await_request(current) {
            Ok(request) if request == expected => Ok(()),
            Ok(request) => {
                warn!(worker = self.slot.worker(), ?request, ?expected, "out-of-order request");
                Err(self.fail())
            }
            Err(Interrupted::Aborted) => Err(WorkerExit::Aborted),
            Err(Interrupted::Unexpected(code)) => {
                warn!(worker = self.slot.worker(), code, "unexpected slot code");
                Err(self.fail())
            }
        }
    }

    /// Answers `request`, stepping aside if the controller aborted the run while we were busy.
    fn acknowledge(&self, request: Phase) -> Result<(), WorkerExit> {
        match self.slot.acknowledge(request) {
            Ok(()) => Ok(()),
            Err(Interrupted::Aborted) => {
                debug!(worker = self.slot.worker(), ?request, "aborted before acknowledging");
                Err(WorkerExit::Aborted)
            }
            Err(Interrupted::Unexpected(code)) => {
                warn!(worker = self.slot.worker(), code, ?request, "request was replaced");
                Err(self.fail())
            }
        }
    }

    fn fail(&self) -> WorkerExit {
        self.slot.fail();
        WorkerExit::Failed
    }

    fn execute(&self, buffers: &mut Buffers, out: &mut impl Write) -> io::Result<()> {
        let worker = self.slot.worker();
        let loops = self.config.loops();
        let trial_mib = self.config.trial_mib();
        let verbose = !self.config.quiet();

        for pattern in self.config.patterns().iter() {
            let mut total_seconds = 0.0;
            let mut completed: u32 = 0;

            while loops.is_none_or(|limit| completed < limit.get()) {
                let seconds = self.trial(pattern, buffers);
                total_seconds += seconds;

                // Trial lines count from 0; result rows count from 1 as row 0 holds the mean.
                if verbose {
                    writeln!(
                        out,
                        "worker {worker}\t{completed}\t{}",
                        TrialLine::new(pattern, seconds, trial_mib)
                    )?;
                }

                completed = completed.saturating_add(1);

                if let Some(results) = self.results {
                    results.record_trial(completed as usize, pattern, seconds);
                }
            }

            let mean_seconds = total_seconds / f64::from(completed);

            if verbose && self.config.show_average() {
                writeln!(
                    out,
                    "worker {worker}\tAVG\t{}",
                    TrialLine::new(pattern, mean_seconds, trial_mib)
                )?;
            }

            if let Some(results) = self.results {
                results.record_mean(pattern, mean_seconds);
            }
        }

        out.flush()
    }

    fn trial(&self, pattern: CopyPattern, buffers: &mut Buffers) -> f64 {
        timed_trial(
            pattern,
            &buffers.src,
            &mut buffers.dst,
            self.config.block_size(),
            self.config.repeats(),
        )
        .as_secs_f64()
    }
}

/// The two equally sized buffers a worker copies between.
#[derive(Debug)]
struct Buffers {
    src: Vec<Word>,
    dst: Vec<Word>,
}

impl Buffers {
    /// Allocates and touches both buffers. Returns `None` if the memory is not available.
    fn allocate(element_count: usize) -> Option<Self> {
        Some(Self {
            src: allocate_buffer(element_count)?,
            dst: allocate_buffer(element_count)?,
        })
    }
}

fn allocate_buffer(element_count: usize) -> Option<Vec<Word>> {
    let mut buffer = Vec::new();
    buffer.try_reserve_exact(element_count).ok()?;
    buffer.resize(element_count, FILL_PATTERN);
    Some(buffer)
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::io;
    use std::num::NonZero;
    use std::sync::Arc;
    use std::sync::atomic::AtomicI32;
    use std::thread;
    use std::time::Duration;

    use testing::with_watchdog;

    use super::*;
    use crate::pal::MockBindings;
    use crate::plane::PhaseBarrier;
    use crate::{Error, SampleTable};

    fn heap_plane(workers: usize) -> Arc<[AtomicI32]> {
        (0..workers).map(|_| AtomicI32::new(0)).collect()
    }

    fn pinning_bindings(result: fn() -> io::Result<()>) -> BindingsFacade {
        let mut bindings = MockBindings::new();
        bindings
            .expect_pin_current_process()
            .times(1)
            .returning(move |_| result());
        BindingsFacade::from_mock(bindings)
    }

    /// Runs one worker on its own thread and returns what it printed and how it ended.
    fn spawn_worker(
        config: Configuration,
        worker: usize,
        plane: Arc<[AtomicI32]>,
        results: Option<Arc<ResultStore>>,
        bindings: BindingsFacade,
    ) -> thread::JoinHandle<(WorkerExit, String)> {
        thread::spawn(move || {
            let worker = Worker::new(&config, worker, &*plane, results.as_deref(), &bindings);
            let mut out = Vec::new();
            let exit = worker.run(&mut out);
            (exit, String::from_utf8(out).unwrap())
        })
    }

    #[test]
    fn full_run_records_trials_and_mean() {
        with_watchdog(|| {
            let config = Configuration::builder(1)
                .loops(3)
                .repeats(1)
                .block_size(4096)
                .build()
                .unwrap();
            let plane = heap_plane(1);
            let results = Arc::new(ResultStore::new(NonZero::new(3).unwrap()).unwrap());

            let handle = spawn_worker(
                config,
                1,
                Arc::clone(&plane),
                Some(Arc::clone(&results)),
                pinning_bindings(|| Ok(())),
            );

            let barrier = PhaseBarrier::new(&*plane);
            for request in [Phase::SyncRequested, Phase::AllocRequested, Phase::RunRequested] {
                barrier.request_all(request);
                barrier.await_all(request).unwrap();
            }

            let (exit, output) = handle.join().unwrap();
            assert_eq!(exit, WorkerExit::Done);

            // 3 trials and an average line for each of the 3 patterns.
            assert_eq!(output.lines().count(), 12);
            assert_eq!(output.lines().filter(|l| l.contains("\tAVG\t")).count(), 3);
            assert!(output.lines().all(|l| l.starts_with("worker 1\t")));

            // Trial lines count loops from 0.
            assert_eq!(output.lines().filter(|l| l.starts_with("worker 1\t0\t")).count(), 3);
            assert_eq!(output.lines().filter(|l| l.starts_with("worker 1\t2\t")).count(), 3);
            assert!(!output.lines().any(|l| l.starts_with("worker 1\t3\t")));

            for pattern in CopyPattern::ALL {
                let trials = (1..=3).map(|row| results.elapsed(row, pattern)).collect::<Vec<_>>();
                assert!(trials.iter().all(|s| *s > 0.0), "{pattern}: {trials:?}");

                let mean = trials.iter().sum::<f64>() / 3.0;
                assert!((results.elapsed(0, pattern) - mean).abs() < 1e-12);
            }
        });
    }

    #[test]
    fn quiet_worker_prints_nothing_and_hidden_average_is_still_recorded() {
        with_watchdog(|| {
            let config = Configuration::builder(1)
                .loops(2)
                .repeats(1)
                .pattern(CopyPattern::Plain)
                .quiet(true)
                .show_average(false)
                .build()
                .unwrap();
            let plane = heap_plane(1);
            let results = Arc::new(ResultStore::new(NonZero::new(2).unwrap()).unwrap());

            let handle = spawn_worker(
                config,
                1,
                Arc::clone(&plane),
                Some(Arc::clone(&results)),
                pinning_bindings(|| Ok(())),
            );

            let barrier = PhaseBarrier::new(&*plane);
            for request in [Phase::SyncRequested, Phase::AllocRequested, Phase::RunRequested] {
                barrier.request_all(request);
                barrier.await_all(request).unwrap();
            }

            let (exit, output) = handle.join().unwrap();
            assert_eq!(exit, WorkerExit::Done);
            assert!(output.is_empty());
            assert!(results.elapsed(0, CopyPattern::Plain) > 0.0);

            // Disabled patterns are never written.
            assert_eq!(results.elapsed(1, CopyPattern::Block).to_bits(), 0);
        });
    }

    #[test]
    fn allocation_failure_is_reported_through_the_slot() {
        with_watchdog(|| {
            // 2^40 MiB per buffer cannot be reserved on any real machine.
            let config = Configuration::builder(1 << 40)
                .loops(1)
                .build()
                .unwrap();
            let plane = heap_plane(2);

            let handle = spawn_worker(
                config,
                2,
                Arc::clone(&plane),
                None,
                pinning_bindings(|| Ok(())),
            );

            // Worker 1 is played by the test itself.
            let barrier = PhaseBarrier::new(&*plane);
            barrier.request_all(Phase::SyncRequested);
            plane.store(1, Phase::SyncAck.code());
            barrier.await_all(Phase::SyncRequested).unwrap();

            barrier.request_all(Phase::AllocRequested);
            plane.store(1, Phase::AllocAck.code());
            let result = barrier.await_all(Phase::AllocRequested);

            assert!(matches!(
                result,
                Err(Error::WorkerFailed {
                    worker: 2,
                    phase: Phase::AllocRequested
                })
            ));

            let (exit, _) = handle.join().unwrap();
            assert_eq!(exit, WorkerExit::Failed);
        });
    }

    #[test]
    fn pin_failure_is_reported_at_readiness() {
        with_watchdog(|| {
            let config = Configuration::builder(1).build().unwrap();
            let plane = heap_plane(1);

            let handle = spawn_worker(
                config,
                1,
                Arc::clone(&plane),
                None,
                pinning_bindings(|| Err(io::Error::from_raw_os_error(libc::EINVAL))),
            );

            let barrier = PhaseBarrier::new(&*plane);
            barrier.request_all(Phase::SyncRequested);
            let result = barrier.await_all(Phase::SyncRequested);

            assert!(matches!(
                result,
                Err(Error::WorkerFailed {
                    worker: 1,
                    phase: Phase::SyncRequested
                })
            ));

            let (exit, _) = handle.join().unwrap();
            assert_eq!(exit, WorkerExit::Failed);
        });
    }

    #[test]
    fn abort_before_allocation_ends_worker_without_side_effects() {
        with_watchdog(|| {
            let config = Configuration::builder(1).loops(1).build().unwrap();
            let plane = heap_plane(1);
            let results = Arc::new(ResultStore::new(NonZero::new(1).unwrap()).unwrap());

            let handle = spawn_worker(
                config,
                1,
                Arc::clone(&plane),
                Some(Arc::clone(&results)),
                pinning_bindings(|| Ok(())),
            );

            let barrier = PhaseBarrier::new(&*plane);
            barrier.request_all(Phase::SyncRequested);
            barrier.await_all(Phase::SyncRequested).unwrap();
            barrier.abort_all();

            let (exit, output) = handle.join().unwrap();
            assert_eq!(exit, WorkerExit::Aborted);
            assert!(output.is_empty());

            // The worker never writes to its own slot after the abort.
            assert_eq!(plane.load(1), Phase::Abort.code());
            assert_eq!(results.elapsed(0, CopyPattern::Plain).to_bits(), 0);
        });
    }

    #[test]
    fn abort_during_allocation_is_never_overwritten() {
        with_watchdog(|| {
            // Large enough that touching the buffers takes a while.
            let config = Configuration::builder(128)
                .loops(1)
                .processes(2)
                .build()
                .unwrap();
            let plane = heap_plane(2);

            let handle = spawn_worker(
                config,
                2,
                Arc::clone(&plane),
                None,
                pinning_bindings(|| Ok(())),
            );

            // Worker 1 is played by the test itself and fails while worker 2 is still allocating.
            let barrier = PhaseBarrier::new(&*plane);
            barrier.request_all(Phase::SyncRequested);
            plane.store(1, Phase::SyncAck.code());
            barrier.await_all(Phase::SyncRequested).unwrap();

            barrier.request_all(Phase::AllocRequested);
            thread::sleep(Duration::from_millis(20));
            plane.store(1, Phase::Failed.code());

            assert!(barrier.await_all(Phase::AllocRequested).is_err());
            barrier.abort_all();

            // Whether the abort landed before or after the acknowledgement, the worker ends.
            let (exit, output) = handle.join().unwrap();
            assert_eq!(exit, WorkerExit::Aborted);
            assert!(output.is_empty());
            assert_eq!(plane.load(2), Phase::Abort.code());
        });
    }

    #[test]
    fn exit_codes() {
        assert_eq!(WorkerExit::Done.code(), 0);
        assert_eq!(WorkerExit::Failed.code(), 1);
        assert_eq!(WorkerExit::Aborted.code(), 1);
    }

    #[test]
    fn buffers_are_filled() {
        let buffers = Buffers::allocate(16).unwrap();

        assert!(buffers.src.iter().chain(&buffers.dst).all(|w| *w == FILL_PATTERN));
    }
}
