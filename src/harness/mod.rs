//! Execution strategies.
//!
//! A [`Harness`] runs one of the four workloads (serial, parallel,
//! producer-consumer, lock contention) against its pool, under a waiting
//! discipline expressed as a [`SuspendPoint`].

mod dispatch;
mod probe;
mod report;
mod runner;
mod suspend;

pub use dispatch::run_configured;
pub use probe::{NoProbe, Probe};
pub use report::RunReport;
pub use runner::Harness;
pub use suspend::{NoSuspend, SuspendPoint, YieldNow};
