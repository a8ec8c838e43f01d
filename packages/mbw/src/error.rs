use std::io;

use thiserror::Error;

use crate::{ConfigError, Phase};

/// Errors that end a benchmark run. Every one of them is terminal: a run with fewer workers than
/// requested would measure a different memory contention profile, so nothing is retried.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The configuration was rejected before any worker process was created.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A memory region shared with the workers could not be mapped.
    #[error("failed to map shared memory: {0}")]
    SharedMemory(#[source] io::Error),

    /// The operating system refused to create a worker process.
    #[error("error forking worker {worker}: {source}")]
    Spawn {
        /// Number of the worker that could not be created (1-based).
        worker: usize,

        /// The underlying operating system error.
        #[source]
        source: io::Error,
    },

    /// A worker reported that it cannot continue. In the allocation phase this means it could
    /// not obtain its buffers.
    #[error("worker {worker} failed during the {phase} phase")]
    WorkerFailed {
        /// Number of the failed worker (1-based).
        worker: usize,

        /// The phase the controller was waiting on.
        phase: Phase,
    },

    /// The run was aborted from outside while the controller was waiting on a worker.
    #[error("run aborted while waiting for worker {worker} in the {phase} phase")]
    Aborted {
        /// Number of the worker whose slot carried the abort (1-based).
        worker: usize,

        /// The phase the controller was waiting on.
        phase: Phase,
    },

    /// A worker slot held a code that is not valid at this point of the protocol.
    #[error("worker {worker} slot holds unexpected code {code} in the {phase} phase")]
    Protocol {
        /// Number of the worker (1-based).
        worker: usize,

        /// The raw code found in the slot.
        code: i32,

        /// The phase the controller was waiting on.
        phase: Phase,
    },

    /// The report could not be written.
    #[error("failed to write report: {0}")]
    Output(#[from] io::Error),
}

/// A specialized `Result` type for benchmark runs, returning the crate's [`Error`] type as the
/// error value.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::fmt::Debug;

    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(Error: Send, Sync, Debug);

    #[test]
    fn worker_failure_names_worker_and_phase() {
        let error = Error::WorkerFailed {
            worker: 3,
            phase: Phase::AllocRequested,
        };

        assert_eq!(
            error.to_string(),
            "worker 3 failed during the allocation phase"
        );
    }

    #[test]
    fn config_error_is_transparent() {
        let error = Error::from(ConfigError::ProcessCountZero);

        assert_eq!(error.to_string(), ConfigError::ProcessCountZero.to_string());
    }
}
