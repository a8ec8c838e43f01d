//! The synchronization plane: one phase slot per worker, shared between the controller and the
//! worker processes, used as a polling phase barrier.
//!
//! Nothing here ever blocks in the kernel. Every wait is a tight poll of one slot, because any
//! sleeping primitive would add wake-up latency to the very bandwidth being measured. The price
//! is that every waiting participant occupies a full processor.
//!
//! Each slot has one writer per direction: the controller writes requests and [`Phase::Abort`],
//! the owning worker writes acknowledgements and [`Phase::Failed`]. That discipline is what
//! makes plain atomic loads and stores sufficient, without compare-and-swap or locks.

use std::fmt::Debug;
use std::hint;
use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicI32, Ordering};

use crate::{Error, Phase, Result};

/// Storage of the phase slots, indexed by worker number (1-based).
#[cfg_attr(test, mockall::automock)]
pub trait PhasePlane: Debug + Send + Sync {
    /// Number of worker slots.
    fn worker_count(&self) -> usize;

    /// Reads the raw code in a worker's slot.
    ///
    /// # Panics
    ///
    /// Panics if `worker` is not in `1..=worker_count()`.
    fn load(&self, worker: usize) -> i32;

    /// Writes a raw code into a worker's slot.
    ///
    /// # Panics
    ///
    /// Panics if `worker` is not in `1..=worker_count()`.
    fn store(&self, worker: usize, code: i32);

    /// Replaces the code in a worker's slot with `new` only if it still holds `current`.
    ///
    /// Returns the code found in the slot when it was not `current`.
    ///
    /// # Panics
    ///
    /// Panics if `worker` is not in `1..=worker_count()`.
    fn replace(&self, worker: usize, current: i32, new: i32) -> std::result::Result<(), i32>;
}

impl PhasePlane for [AtomicI32] {
    fn worker_count(&self) -> usize {
        self.len()
    }

    fn load(&self, worker: usize) -> i32 {
        slot(self, worker).load(Ordering::Acquire)
    }

    fn store(&self, worker: usize, code: i32) {
        // Release publishes everything written before the phase change, including the result
        // store contents that precede `RunDone`.
        slot(self, worker).store(code, Ordering::Release);
    }

    fn replace(&self, worker: usize, current: i32, new: i32) -> std::result::Result<(), i32> {
        slot(self, worker)
            .compare_exchange(current, new, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
    }
}

fn slot(slots: &[AtomicI32], worker: usize) -> &AtomicI32 {
    worker
        .checked_sub(1)
        .and_then(|index| slots.get(index))
        .expect("worker numbers are 1-based and never exceed the plane size")
}

/// The controller's view of the plane: issues requests to all workers and waits for all of them.
#[derive(Debug)]
pub struct PhaseBarrier<'a, P: PhasePlane + ?Sized> {
    plane: &'a P,
}

impl<'a, P: PhasePlane + ?Sized> PhaseBarrier<'a, P> {
    /// Wraps a plane for the controller.
    pub fn new(plane: &'a P) -> Self {
        Self { plane }
    }

    /// Number of workers taking part.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.plane.worker_count()
    }

    /// Writes the request to every worker's slot.
    pub fn request_all(&self, request: Phase) {
        debug_assert!(request.ack().is_some(), "{request:?} is not a request");

        for worker in self.workers() {
            self.plane.store(worker, request.code());
        }
    }

    /// Waits until every worker has moved its slot past `request`, in worker order.
    ///
    /// Fails on the first worker that answers with anything but the expected acknowledgement.
    /// The plane is left as found: aborting the other workers is the caller's decision.
    pub fn await_all(&self, request: Phase) -> Result<()> {
        for worker in self.workers() {
            self.await_phase(worker, request)?;
        }

        Ok(())
    }

    /// Waits until one worker moves its slot past `request` and checks what it moved to.
    pub fn await_phase(&self, worker: usize, request: Phase) -> Result<()> {
        let code = spin_while(self.plane, worker, request.code());

        match Phase::from_code(code) {
            Some(phase) if Some(phase) == request.ack() => Ok(()),
            Some(Phase::Failed) => Err(Error::WorkerFailed {
                worker,
                phase: request,
            }),
            Some(Phase::Abort) => Err(Error::Aborted {
                worker,
                phase: request,
            }),
            _ => Err(Error::Protocol {
                worker,
                code,
                phase: request,
            }),
        }
    }

    /// Tells every worker to exit. Workers observe this at their next poll.
    pub fn abort_all(&self) {
        for worker in self.workers() {
            self.plane.store(worker, Phase::Abort.code());
        }
    }

    fn workers(&self) -> RangeInclusive<usize> {
        1..=self.plane.worker_count()
    }
}

/// Why a worker stops waiting without receiving a request it can act on.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Interrupted {
    /// The controller wrote [`Phase::Abort`].
    Aborted,

    /// The slot held a code no participant should have written at this point.
    Unexpected(i32),
}

/// One worker's view of the plane: waits for requests addressed to it and answers them.
#[derive(Debug)]
pub struct WorkerSlot<'a, P: PhasePlane + ?Sized> {
    plane: &'a P,
    worker: usize,
}

impl<'a, P: PhasePlane + ?Sized> WorkerSlot<'a, P> {
    /// Binds the view to one worker number (1-based).
    pub fn new(plane: &'a P, worker: usize) -> Self {
        Self { plane, worker }
    }

    /// The worker number this slot belongs to.
    #[must_use]
    pub fn worker(&self) -> usize {
        self.worker
    }

    /// Waits until the slot no longer holds `current` and returns the request found there.
    ///
    /// `current` is what the worker last saw or wrote: [`Phase::Unstarted`] before the first
    /// request, afterwards its own latest acknowledgement.
    pub fn await_request(&self, current: Phase) -> std::result::Result<Phase, Interrupted> {
        let code = spin_while(self.plane, self.worker, current.code());

        match Phase::from_code(code) {
            Some(Phase::Abort) => Err(Interrupted::Aborted),
            Some(phase) if phase.ack().is_some() => Ok(phase),
            _ => Err(Interrupted::Unexpected(code)),
        }
    }

    /// Answers `request` with its acknowledgement.
    ///
    /// The slot only changes if it still holds `request`. An abort written by the controller in
    /// the meantime is kept and reported instead.
    pub fn acknowledge(&self, request: Phase) -> std::result::Result<(), Interrupted> {
        let Some(ack) = request.ack() else {
            return Err(Interrupted::Unexpected(request.code()));
        };

        self.plane
            .replace(self.worker, request.code(), ack.code())
            .map_err(interruption)
    }

    /// Tells the controller this worker cannot continue, unless the controller has already
    /// aborted the run.
    pub fn fail(&self) {
        loop {
            let current = self.plane.load(self.worker);

            if current == Phase::Abort.code()
                || self
                    .plane
                    .replace(self.worker, current, Phase::Failed.code())
                    .is_ok()
            {
                return;
            }
        }
    }
}

fn interruption(code: i32) -> Interrupted {
    if code == Phase::Abort.code() {
        Interrupted::Aborted
    } else {
        Interrupted::Unexpected(code)
    }
}

/// Polls a slot until it holds something other than `code` and returns the new value.
#[cfg_attr(test, mutants::skip)] // Mutations turn this into an endless loop.
fn spin_while<P: PhasePlane + ?Sized>(plane: &P, worker: usize, code: i32) -> i32 {
    loop {
        let current = plane.load(worker);

        if current != code {
            return current;
        }

        hint::spin_loop();
    }
}
