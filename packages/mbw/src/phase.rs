use std::fmt::{self, Display};

/// Codes stored in a worker's slot of the synchronization plane.
///
/// The controller writes the odd "requested" codes and [`Phase::Abort`]. The worker that owns the
/// slot writes the even acknowledgements and [`Phase::Failed`]. Both negative codes are terminal.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[repr(i32)]
pub enum Phase {
    /// Initial zero-filled state of a freshly mapped slot.
    Unstarted = 0,

    /// Controller asks the worker to prove it is scheduled and polling.
    SyncRequested = 1,

    /// Worker is alive, pinned and polling.
    SyncAck = 2,

    /// Controller asks the worker to allocate and touch its buffers.
    AllocRequested = 3,

    /// Worker holds fully materialized buffers.
    AllocAck = 4,

    /// Controller asks the worker to run the measured workload.
    RunRequested = 5,

    /// Worker finished the workload and its results are readable.
    RunDone = 6,

    /// Controller tells every worker to exit without further side effects.
    Abort = -1,

    /// Worker cannot continue (e.g. its buffers could not be allocated).
    Failed = -2,
}

impl Phase {
    /// The raw slot value of this phase.
    #[must_use]
    pub const fn code(self) -> i32 {
        self as i32
    }

    /// Interprets a raw slot value. Returns `None` for codes no participant ever writes.
    #[must_use]
    pub const fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Unstarted),
            1 => Some(Self::SyncRequested),
            2 => Some(Self::SyncAck),
            3 => Some(Self::AllocRequested),
            4 => Some(Self::AllocAck),
            5 => Some(Self::RunRequested),
            6 => Some(Self::RunDone),
            -1 => Some(Self::Abort),
            -2 => Some(Self::Failed),
            _ => None,
        }
    }

    /// The acknowledgement a worker answers this request with, if this is a request.
    #[must_use]
    pub const fn ack(self) -> Option<Self> {
        match self {
            Self::SyncRequested => Some(Self::SyncAck),
            Self::AllocRequested => Some(Self::AllocAck),
            Self::RunRequested => Some(Self::RunDone),
            _ => None,
        }
    }

    /// Whether the code tells the worker to stop.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        self.code() < 0
    }
}

impl Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unstarted => "startup",
            Self::SyncRequested | Self::SyncAck => "readiness",
            Self::AllocRequested | Self::AllocAck => "allocation",
            Self::RunRequested | Self::RunDone => "execution",
            Self::Abort => "abort",
            Self::Failed => "failure",
        })
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    const EVERY_PHASE: [Phase; 9] = [
        Phase::Unstarted,
        Phase::SyncRequested,
        Phase::SyncAck,
        Phase::AllocRequested,
        Phase::AllocAck,
        Phase::RunRequested,
        Phase::RunDone,
        Phase::Abort,
        Phase::Failed,
    ];

    #[test]
    fn codes_are_stable() {
        for phase in EVERY_PHASE {
            assert_eq!(Phase::from_code(phase.code()), Some(phase));
        }

        assert_eq!(Phase::from_code(7), None);
        assert_eq!(Phase::from_code(-3), None);
    }

    #[test]
    fn requests_are_odd_and_acks_follow() {
        for phase in EVERY_PHASE {
            if let Some(ack) = phase.ack() {
                assert_eq!(phase.code() % 2, 1);
                assert_eq!(ack.code(), phase.code() + 1);
            }
        }
    }

    #[test]
    fn only_negative_codes_are_terminal() {
        for phase in EVERY_PHASE {
            assert_eq!(phase.is_terminal(), phase.code() < 0);
        }
    }
}
