#![cfg_attr(
    test,
    expect(
        clippy::struct_field_names,
        reason = "false positive from automock generated code"
    )
)]

use std::fmt::Debug;
use std::io;

use crate::ProcessorIndex;

/// Process identifier of a forked worker.
pub(crate) type Pid = libc::pid_t;

/// Which side of a successful `fork()` the caller continues on.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Forked {
    /// The original process. Carries the identifier of the new child.
    Parent(Pid),

    /// The newly created child process.
    Child,
}

/// Bindings for process-control calls into the operating system.
///
/// All PAL FFI calls must go through this trait, enabling them to be mocked.
#[cfg_attr(test, mockall::automock)]
pub(crate) trait Bindings: Debug + Send + Sync + 'static {
    /// fork() of the current process. The caller must be single-threaded.
    fn fork(&self) -> Result<Forked, io::Error>;

    /// sched_setaffinity() of the current (single-threaded) process to exactly one processor.
    fn pin_current_process(&self, processor: ProcessorIndex) -> Result<(), io::Error>;

    /// waitpid() for one child, returning its exit code (or 128 + signal number if killed).
    fn wait_for_child(&self, pid: Pid) -> Result<i32, io::Error>;
}
