use std::io::{self, Write};
use std::sync::atomic::AtomicI32;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::pal::{Bindings, BindingsFacade, Forked, Pid, exit_worker_process};
use crate::plane::{PhaseBarrier, PhasePlane};
use crate::report::{Report, write_pins, write_plan};
use crate::results::ResultStore;
use crate::shared::SharedRegion;
use crate::worker::Worker;
use crate::{Configuration, Error, Phase, Result, aggregate};

/// How a run that did not fail came to an end.
#[derive(Debug)]
#[non_exhaustive]
pub enum Outcome {
    /// Every worker finished every loop and the report was written.
    Completed(Report),

    /// The run has no loop limit. The workers were told to start and keep running until they are
    /// terminated from outside; there is nothing to report.
    Detached,
}

/// Runs the whole benchmark: spawns one pinned worker process per configured processor, drives
/// them through the phase barrier and writes progress and the final report to `out`.
///
/// Must be called while the process is still single-threaded, as workers are forked from it.
pub fn run(config: &Configuration, out: &mut impl Write) -> Result<Outcome> {
    Controller::new(config, BindingsFacade::target()).run(out)
}

#[derive(Debug)]
struct Controller<'a> {
    config: &'a Configuration,
    bindings: BindingsFacade,
}

impl<'a> Controller<'a> {
    fn new(config: &'a Configuration, bindings: BindingsFacade) -> Self {
        Self { config, bindings }
    }

    fn run(&self, out: &mut impl Write) -> Result<Outcome> {
        write_pins(out, self.config.pins())?;
        if !self.config.quiet() {
            write_plan(out, self.config)?;
        }

        let plane =
            SharedRegion::<AtomicI32>::new(self.config.processes()).map_err(Error::SharedMemory)?;
        let results = self.create_result_stores()?;

        // Anything still buffered would be printed again by every child.
        out.flush()?;
        io::stdout().flush()?;

        let children = self.spawn_workers(&*plane, &results)?;

        self.supervise(&PhaseBarrier::new(&*plane), &results, &children, out)
    }

    /// Drives the spawned workers to the end of the run and collects them.
    ///
    /// On failure every worker is aborted and the controller waits for all of them to leave, so
    /// none is left behind when the error is returned.
    fn supervise<P: PhasePlane + ?Sized>(
        &self,
        barrier: &PhaseBarrier<'_, P>,
        results: &[ResultStore],
        children: &[Pid],
        out: &mut impl Write,
    ) -> Result<Outcome> {
        let outcome = self.drive(barrier, results, out);

        match &outcome {
            // Unlimited workers outlive the controller.
            Ok(Outcome::Detached) => {}
            Ok(_) => self.reap(children),
            Err(error) => {
                debug!(%error, "aborting all workers");
                barrier.abort_all();
                self.reap(children);
            }
        }

        outcome
    }

    fn create_result_stores(&self) -> Result<Vec<ResultStore>> {
        let Some(loops) = self.config.loops() else {
            return Ok(Vec::new());
        };

        (0..self.config.processes())
            .map(|_| ResultStore::new(loops))
            .collect::<io::Result<Vec<_>>>()
            .map_err(Error::SharedMemory)
    }

    /// Forks one process per worker. In a child this never returns.
    ///
    /// If a fork fails, the workers created so far are aborted through the plane and reaped.
    fn spawn_workers<P: PhasePlane + ?Sized>(
        &self,
        plane: &P,
        results: &[ResultStore],
    ) -> Result<Vec<Pid>> {
        let mut children = Vec::with_capacity(self.config.processes());

        for worker in 1..=self.config.processes() {
            match self.bindings.fork() {
                Ok(Forked::Parent(pid)) => {
                    debug!(worker, pid, "worker spawned");
                    children.push(pid);
                }
                Ok(Forked::Child) => self.become_worker(worker, plane, results),
                Err(source) => {
                    warn!(worker, %source, "failed to fork worker");
                    PhaseBarrier::new(plane).abort_all();
                    self.reap(&children);
                    return Err(Error::Spawn { worker, source });
                }
            }
        }

        Ok(children)
    }

    #[cfg_attr(coverage_nightly, coverage(off))]
    #[cfg_attr(test, mutants::skip)] // Only reachable in a real forked child.
    fn become_worker<P: PhasePlane + ?Sized>(
        &self,
        worker: usize,
        plane: &P,
        results: &[ResultStore],
    ) -> ! {
        let store = worker.checked_sub(1).and_then(|index| results.get(index));

        let mut stdout = io::stdout();
        let exit = Worker::new(self.config, worker, plane, store, &self.bindings).run(&mut stdout);

        // The exit below skips the usual flush of stdio buffers.
        drop(stdout.flush());

        exit_worker_process(exit.code())
    }

    fn drive<P: PhasePlane + ?Sized>(
        &self,
        barrier: &PhaseBarrier<'_, P>,
        results: &[ResultStore],
        out: &mut impl Write,
    ) -> Result<Outcome> {
        let settle = self.config.settle();

        writeln!(
            out,
            "Ensure all processes can respond simultaneously after {:.1}s.",
            settle.as_secs_f64()
        )?;
        out.flush()?;
        thread::sleep(settle);

        let sync_cost = timed_phase(barrier, Phase::SyncRequested)?;
        writeln!(
            out,
            "Syncing all workers cost {:4.3} seconds.\nIf that's too long, the result should be considered unreliable.",
            sync_cost.as_secs_f64()
        )?;

        writeln!(out, "Pre-allocate memory after {:.1}s.", settle.as_secs_f64())?;
        out.flush()?;
        thread::sleep(settle);

        let alloc_cost = timed_phase(barrier, Phase::AllocRequested)?;
        writeln!(
            out,
            "Pre-allocating memory cost {:4.3} seconds.",
            alloc_cost.as_secs_f64()
        )?;

        let run_settle = settle.saturating_mul(2);
        writeln!(out, "Run tests after {:.1}s.", run_settle.as_secs_f64())?;
        out.flush()?;
        thread::sleep(run_settle);

        let start = Instant::now();
        barrier.request_all(Phase::RunRequested);
        debug!("execution requested");

        if self.config.loops().is_none() {
            return Ok(Outcome::Detached);
        }

        barrier.await_all(Phase::RunRequested)?;
        let total_run = start.elapsed();
        debug!(seconds = total_run.as_secs_f64(), "all workers finished");

        let statistics = aggregate(
            results,
            self.config.patterns(),
            self.config.trial_mib(),
            total_run,
        );

        let report = Report::new(sync_cost, alloc_cost, statistics);
        write!(out, "{report}")?;
        out.flush()?;

        Ok(Outcome::Completed(report))
    }

    /// Collects the exit status of every worker. Each has either finished or been aborted, so this
    /// only waits for them to leave.
    fn reap(&self, children: &[Pid]) {
        for (pid, worker) in children.iter().zip(1_usize..) {
            match self.bindings.wait_for_child(*pid) {
                Ok(0) => {}
                Ok(code) => warn!(worker, pid, code, "worker exited with failure"),
                Err(error) => warn!(worker, pid, %error, "failed to wait for worker"),
            }
        }
    }
}

/// Requests a phase from every worker and measures how long it takes all of them to confirm.
fn timed_phase<P: PhasePlane + ?Sized>(
    barrier: &PhaseBarrier<'_, P>,
    request: Phase,
) -> Result<Duration> {
    let start = Instant::now();

    barrier.request_all(request);
    barrier.await_all(request)?;

    let cost = start.elapsed();
    debug!(phase = %request, seconds = cost.as_secs_f64(), "phase complete");

    Ok(cost)
}
