//! Command-line interface for issue-forge.
//!
//! Provides the issue processing cycle, evaluation suites and commit reports.

mod commands;

pub use commands::{
    apply_run_overrides, load_settings, parse_cli, render_report, run_with_cli, Cli, Commands,
    EvalsArgs, ReportArgs, RunArgs,
};
