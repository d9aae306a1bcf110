//! grid2point command-line service.
//!
//! Loads conversion jobs (from flags or a YAML job file), runs them on the
//! blocking pool with bounded concurrency, and writes a JSON report.

pub mod jobs;
pub mod logging;
pub mod report;
pub mod runner;

/// Every job completed.
pub const EXIT_OK: u8 = 0;
/// At least one job failed.
pub const EXIT_FAILED: u8 = 1;
/// Invalid invocation or configuration.
pub const EXIT_USAGE: u8 = 2;
