//! Command-line interface for replay-bench.
//!
//! Provides commands for running evaluations, validating datasets and
//! re-summarizing existing exports.

mod commands;

pub use commands::{parse_cli, run_with_cli, Cli};
