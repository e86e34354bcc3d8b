//! Output module for run summaries
//!
//! This module handles:
//! - Collecting per-run counters into a `RunReport`
//! - Printing the report when a job ends

mod report;

pub use report::{print_report, RunReport};
