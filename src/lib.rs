//! issue-forge: turn open repository issues into pull requests.
//!
//! An issue is applied to a fresh clone by an LLM driving a fixed set of
//! commands, reviewed by a second command loop, checked with external tools
//! and published as a pull request. The [`scheduler`] runs many issues
//! concurrently and merges approved pull requests between cycles.

pub mod checks;
pub mod cli;
pub mod command_loop;
pub mod commands;
pub mod config;
pub mod error;
pub mod evals;
pub mod hosting;
pub mod llm;
pub mod metrics;
pub mod pipeline;
pub mod prompts;
pub mod report;
pub mod scheduler;
pub mod session;
pub mod shell;
pub mod store;
pub mod vcs;

pub use error::{
    CheckError, CommandError, HostingError, LlmError, LoopError, PipelineError, StoreError,
    VcsError,
};
