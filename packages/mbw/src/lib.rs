#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Measures memory copy bandwidth by running the same copy workload in many worker processes at
//! once, each pinned to its own processor.
//!
//! The controller forks one worker per configured processor and drives all of them through a
//! sequence of phases: readiness, buffer allocation and execution. Phase changes travel through a
//! shared-memory slot per worker that both sides poll in a tight loop, so that every worker
//! starts copying at nearly the same instant and the measured bandwidth is the bandwidth the
//! machine delivers under full concurrent load.
//!
//! Three copy patterns are measured:
//!
//! * [`CopyPattern::Plain`] copies the whole buffer with one bulk copy.
//! * [`CopyPattern::ElementWise`] copies one word at a time.
//! * [`CopyPattern::Block`] copies the buffer in fixed-size chunks.
//!
//! Each worker publishes its elapsed times into a shared result store, from which the controller
//! derives per-worker speeds, spreads and idle times once everyone has finished.
//!
//! # Example
//!
//! ```no_run
//! use std::io;
//!
//! use mbw::{Configuration, CopyPattern, Outcome};
//!
//! let config = Configuration::builder(64)
//!     .loops(5)
//!     .processes(4)
//!     .affinity("0:2:6")
//!     .pattern(CopyPattern::Plain)
//!     .build()?;
//!
//! if let Outcome::Completed(report) = mbw::run(&config, &mut io::stdout())? {
//!     for summary in report.statistics().summaries() {
//!         println!("{}: {:.1} MiB/s", summary.pattern(), summary.total_speed());
//!     }
//! }
//! # Ok::<(), mbw::Error>(())
//! ```
//!
//! Only Linux-like targets with `fork()` and `sched_setaffinity()` are supported.

pub mod affinity;
mod config;
mod controller;
mod error;
mod ops;
mod pal;
mod phase;
mod plane;
mod report;
mod results;
mod shared;
mod stats;
mod worker;

pub use affinity::{ProcessorIndex, parse_affinity};
pub use config::*;
pub use controller::*;
pub use error::*;
pub use ops::*;
pub use phase::*;
pub use plane::*;
pub use report::*;
pub use stats::*;
