//! Command-line interface for ctfd-challenge-sync.
//!
//! Provides commands to apply, plan, refresh, import and destroy a challenge.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli};
