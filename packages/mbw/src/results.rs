use std::io;
use std::num::NonZero;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::shared::SharedRegion;
use crate::{CopyPattern, SampleTable};

/// One worker's elapsed-time samples, in a region shared with the controller.
///
/// Row 0 holds the mean of each pattern, rows `1..=loops` the individual trials. Only the owning
/// worker writes, and only before it acknowledges the execution phase. The controller reads only
/// after observing that acknowledgement, whose release/acquire pair publishes the relaxed cell
/// writes.
#[derive(Debug)]
pub(crate) struct ResultStore {
    cells: SharedRegion<AtomicU64>,
    loops: usize,
}

impl ResultStore {
    pub(crate) fn new(loops: NonZero<u32>) -> io::Result<Self> {
        let loops = usize::try_from(loops.get()).map_err(io::Error::other)?;

        let rows = loops
            .checked_add(1)
            .ok_or_else(|| io::Error::from(io::ErrorKind::OutOfMemory))?;

        let cells = rows
            .checked_mul(CopyPattern::ALL.len())
            .ok_or_else(|| io::Error::from(io::ErrorKind::OutOfMemory))?;

        Ok(Self {
            cells: SharedRegion::new(cells)?,
            loops,
        })
    }

    /// Records the elapsed seconds of trial `loop_number` (1-based).
    pub(crate) fn record_trial(&self, loop_number: usize, pattern: CopyPattern, seconds: f64) {
        debug_assert!(loop_number >= 1, "row 0 is reserved for the mean");

        self.cell(loop_number, pattern)
            .store(seconds.to_bits(), Ordering::Relaxed);
    }

    /// Records the mean elapsed seconds of all trials of a pattern.
    pub(crate) fn record_mean(&self, pattern: CopyPattern, seconds: f64) {
        self.cell(0, pattern)
            .store(seconds.to_bits(), Ordering::Relaxed);
    }

    fn cell(&self, row: usize, pattern: CopyPattern) -> &AtomicU64 {
        row.checked_mul(CopyPattern::ALL.len())
            .and_then(|start| start.checked_add(pattern.index()))
            .and_then(|index| self.cells.get(index))
            .expect("row is within 0..=loops and pattern index within the pattern count")
    }
}

impl SampleTable for ResultStore {
    fn loops(&self) -> usize {
        self.loops
    }

    fn elapsed(&self, row: usize, pattern: CopyPattern) -> f64 {
        f64::from_bits(self.cell(row, pattern).load(Ordering::Relaxed))
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn trials_and_mean_land_in_their_own_cells() {
        let store = ResultStore::new(NonZero::new(3).unwrap()).unwrap();

        store.record_trial(1, CopyPattern::Block, 0.5);
        store.record_trial(3, CopyPattern::Block, 1.5);
        store.record_trial(2, CopyPattern::Plain, 0.25);
        store.record_mean(CopyPattern::Block, 2.0 / 3.0);

        assert_eq!(store.loops(), 3);
        assert_eq!(store.elapsed(1, CopyPattern::Block).to_bits(), 0.5_f64.to_bits());
        assert_eq!(store.elapsed(3, CopyPattern::Block).to_bits(), 1.5_f64.to_bits());
        assert_eq!(store.elapsed(2, CopyPattern::Plain).to_bits(), 0.25_f64.to_bits());
        assert_eq!(
            store.elapsed(0, CopyPattern::Block).to_bits(),
            (2.0_f64 / 3.0).to_bits()
        );

        // Untouched cells read as zero.
        assert_eq!(store.elapsed(1, CopyPattern::ElementWise).to_bits(), 0);
    }

    #[test]
    #[should_panic(expected = "within 0..=loops")]
    fn row_past_last_loop_panics() {
        let store = ResultStore::new(NonZero::new(2).unwrap()).unwrap();

        store.record_trial(3, CopyPattern::Plain, 1.0);
    }
}
