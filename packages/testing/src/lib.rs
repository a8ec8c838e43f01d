#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(coverage_nightly, coverage(off))] // This is all test code, no need to test it.

//! Private helpers for testing the mbw packages.
//!
//! Most of what mbw does is spin on shared memory until another participant moves. A bug in
//! either side turns a test into an endless loop, so such tests run under a watchdog.

use std::sync::mpsc;
use std::thread;
use std::time::Duration;

/// Timeout applied by [`with_watchdog`].
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Runs a test body on its own thread and panics if it does not finish within
/// [`DEFAULT_TIMEOUT`].
///
/// When the `MUTATION_TESTING` environment variable is set to "1", the watchdog is disabled and
/// the body runs directly, so that mutations which hang are detected as such.
///
/// # Panics
///
/// Panics if the body times out, and re-raises any panic of the body itself.
///
/// # Example
///
/// ```rust
/// use testing::with_watchdog;
///
/// let answer = with_watchdog(|| 6 * 7);
/// assert_eq!(answer, 42);
/// ```
pub fn with_watchdog<F, R>(test_fn: F) -> R
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    with_watchdog_timeout(DEFAULT_TIMEOUT, test_fn)
}

/// Like [`with_watchdog`] but with a caller-chosen timeout, for tests that launch whole
/// benchmark runs.
///
/// # Panics
///
/// Panics if the body times out, and re-raises any panic of the body itself.
pub fn with_watchdog_timeout<F, R>(timeout: Duration, test_fn: F) -> R
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    if std::env::var("MUTATION_TESTING").as_deref() == Ok("1") {
        return test_fn();
    }

    // Miri is far slower at thread synchronization.
    let timeout = if cfg!(miri) {
        timeout.saturating_mul(6)
    } else {
        timeout
    };

    let (tx, rx) = mpsc::channel();

    let test_handle = thread::spawn(move || {
        let result = test_fn();
        // The receiver is gone if we already timed out.
        drop(tx.send(result));
    });

    match rx.recv_timeout(timeout) {
        Ok(result) => {
            test_handle.join().expect("test thread should not panic");
            result
        }
        Err(mpsc::RecvTimeoutError::Timeout) => {
            panic!("test exceeded its {timeout:?} timeout, probably spinning forever")
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => match test_handle.join() {
            Ok(()) => panic!("test thread disconnected unexpectedly"),
            Err(e) => std::panic::resume_unwind(e),
        },
    }
}

/// Asserts that two measurements agree to within `tolerance`.
///
/// # Panics
///
/// Panics if they do not.
#[track_caller]
pub fn assert_close(actual: f64, expected: f64, tolerance: f64) {
    assert!(
        (actual - expected).abs() <= tolerance,
        "expected {expected} (within {tolerance}), got {actual}"
    );
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn watchdog_returns_value() {
        assert_eq!(with_watchdog(|| 42), 42);
    }

    #[test]
    fn custom_timeout_returns_value() {
        let result = with_watchdog_timeout(Duration::from_secs(30), || "done");
        assert_eq!(result, "done");
    }

    #[test]
    #[should_panic(expected = "boom")]
    fn body_panic_is_propagated() {
        with_watchdog(|| panic!("boom"));
    }

    #[test]
    fn close_values_pass() {
        assert_close(1.0, 1.0 + 1e-12, 1e-9);
    }

    #[test]
    #[should_panic(expected = "expected 2")]
    fn distant_values_fail() {
        assert_close(1.0, 2.0, 0.5);
    }
}
