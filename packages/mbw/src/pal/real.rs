use std::fmt::Debug;
use std::{io, mem};

use libc::cpu_set_t;

use crate::ProcessorIndex;
use crate::pal::{Bindings, Forked, Pid};

/// FFI bindings that target the real operating system that the build is targeting.
///
/// You would only use different bindings in unit tests that need to use mock bindings.
#[derive(Debug, Default)]
pub(crate) struct BuildTargetBindings;

// Real OS bindings are excluded from coverage measurement because:
// 1. They are exercised by the end-to-end tests that run the real binary.
// 2. Error paths require OS-level failures that are impractical to trigger in tests.
#[cfg_attr(coverage_nightly, coverage(off))]
impl Bindings for BuildTargetBindings {
    fn fork(&self) -> Result<Forked, io::Error> {
        // SAFETY: The controller forks before it starts any threads, so the child inherits a
        // consistent single-threaded process image.
        let pid = unsafe { libc::fork() };

        match pid {
            0 => Ok(Forked::Child),
            pid if pid > 0 => Ok(Forked::Parent(pid)),
            _ => Err(io::Error::last_os_error()),
        }
    }

    fn pin_current_process(&self, processor: ProcessorIndex) -> Result<(), io::Error> {
        let index = usize::try_from(processor)
            .ok()
            .filter(|index| *index < libc::CPU_SETSIZE as usize)
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("processor {processor} is beyond the affinity mask size"),
                )
            })?;

        // SAFETY: All zeroes is a valid cpu_set_t.
        let mut cpuset: cpu_set_t = unsafe { mem::zeroed() };

        // SAFETY: The index was checked against the mask size above.
        unsafe { libc::CPU_SET(index, &mut cpuset) };

        // 0 means the calling thread, which is the only thread of a worker process.
        // SAFETY: No safety requirements beyond passing valid arguments.
        let result =
            unsafe { libc::sched_setaffinity(0, size_of::<cpu_set_t>(), &raw const cpuset) };

        if result == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    fn wait_for_child(&self, pid: Pid) -> Result<i32, io::Error> {
        let mut status = 0;

        loop {
            // SAFETY: Valid status pointer, waiting on a child of this process.
            let result = unsafe { libc::waitpid(pid, &raw mut status, 0) };

            if result == pid {
                break;
            }

            let error = io::Error::last_os_error();
            if error.kind() != io::ErrorKind::Interrupted {
                return Err(error);
            }
        }

        if libc::WIFEXITED(status) {
            Ok(libc::WEXITSTATUS(status))
        } else {
            Ok(128_i32.saturating_add(libc::WTERMSIG(status)))
        }
    }
}

/// Ends a worker process immediately with the given exit code.
///
/// Skips destructors, atexit handlers and stdio buffers inherited from the controller, all of
/// which belong to the controller's copy of the process state.
#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg_attr(test, mutants::skip)] // Terminating the test process is not observable.
pub(crate) fn exit_worker_process(code: i32) -> ! {
    // SAFETY: No safety requirements. Never returns.
    unsafe { libc::_exit(code) }
}
