//! End-to-end tests that run the `mbw` binary as a subprocess.
//!
//! The runs are kept small (a loop or two, no settle pause) and every worker is
//! pinned to processor 0, which exists on any machine.

#![cfg(all(not(miri), target_os = "linux"))]

use std::process::{Command, Output};
use std::time::Duration;

use testing::with_watchdog_timeout;

fn run_mbw(args: &[&str]) -> Output {
    let args = args.iter().map(ToString::to_string).collect::<Vec<_>>();

    with_watchdog_timeout(Duration::from_secs(60), move || {
        Command::new(env!("CARGO_BIN_EXE_mbw"))
            .args(&args)
            .env_remove("RUST_LOG")
            .output()
            .expect("mbw binary can be launched")
    })
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn single_worker_plain_copy_reports() {
    let output = run_mbw(&["64", "-n", "1", "-r", "1", "-p", "1", "-t", "0", "-s", "0"]);
    let text = stdout(&output);

    assert!(output.status.success(), "{}", stderr(&output));

    assert!(text.starts_with("The workers would be pinned to these cpus:\n   0\n"));
    assert!(text.contains("Getting down to business... Doing 1 runs per test."));
    assert!(!text.contains("as blocks"));
    assert!(text.contains("Syncing all workers cost"));

    assert_eq!(
        text.lines()
            .filter(|l| l.starts_with("worker 1\t0\tMethod: MEMCPY\t"))
            .count(),
        1
    );
    assert_eq!(
        text.lines()
            .filter(|l| l.starts_with("worker 1\tAVG\tMethod: MEMCPY\t"))
            .count(),
        1
    );

    assert_eq!(text.matches("Worker #").count(), 1);
    assert!(text.contains("Total speed:"));
    assert!(text.contains("All tests done in"));
    assert!(!text.contains("DUMB"));
    assert!(!text.contains("MCBLOCK"));
}

#[test]
fn every_worker_output_is_printed_once() {
    let output = run_mbw(&["1", "-n", "2", "-r", "1", "-p", "2", "-f", "0,0", "-s", "0"]);
    let text = stdout(&output);

    assert!(output.status.success(), "{}", stderr(&output));

    // The controller's banner must not be duplicated by the forked workers.
    assert_eq!(
        text.matches("The workers would be pinned to these cpus:")
            .count(),
        1
    );

    for worker in 1..=2 {
        let prefix = format!("worker {worker}\t");
        let trial_lines = text
            .lines()
            .filter(|l| l.starts_with(&prefix) && !l.contains("\tAVG\t"))
            .count();

        // Two loops of each of the three patterns.
        assert_eq!(trial_lines, 6, "{text}");
    }

    assert_eq!(text.matches("Worker #").count(), 2);
}

#[test]
fn quiet_run_hides_plan_and_trial_lines() {
    let output = run_mbw(&["1", "-n", "1", "-r", "1", "-t", "2", "-q", "-s", "0"]);
    let text = stdout(&output);

    assert!(output.status.success(), "{}", stderr(&output));
    assert!(text.contains("The workers would be pinned to these cpus:"));
    assert!(!text.contains("Getting down to business"));
    assert!(!text.contains("worker 1\t"));
    assert!(text.contains("MCBLOCK"));
    assert!(text.contains("All tests done in"));
}

#[test]
fn affinity_count_mismatch_is_rejected_before_spawning() {
    let output = run_mbw(&["1", "-p", "4", "-f", "0:2", "-s", "0"]);

    assert_eq!(output.status.code(), Some(1));
    assert!(stdout(&output).is_empty());
    assert!(stderr(&output).contains("refer to 3 CPUs, rather than 4"));
}

#[test]
fn infinite_loops_need_a_single_test() {
    let output = run_mbw(&["1", "-n", "0", "-t", "0", "-t", "1", "-s", "0"]);

    assert_eq!(output.status.code(), Some(1));
    assert!(stdout(&output).is_empty());
}

#[test]
fn block_larger_than_buffer_is_rejected() {
    let output = run_mbw(&["1", "-b", "2097152", "-t", "2", "-s", "0"]);

    assert_eq!(output.status.code(), Some(1));
    assert!(stdout(&output).is_empty());
}

#[test]
fn unknown_test_index_is_rejected() {
    let output = run_mbw(&["1", "-t", "3"]);

    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("unknown test 3"));
}

#[test]
fn malformed_affinity_is_rejected() {
    let output = run_mbw(&["1", "-f", "0:x"]);

    assert_eq!(output.status.code(), Some(1));
    assert!(stdout(&output).is_empty());
}
