//! Command-line interface for the compliance scheduler.
//!
//! Provides commands for running the scheduler, applying the schema and
//! triggering jobs by hand.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
