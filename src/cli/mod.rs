//! Command-line interface for the workflow engine.
//!
//! Provides commands to list, inspect and run pipelines.

mod commands;

pub use commands::{parse_cli, run_with_cli, Cli, Commands};
