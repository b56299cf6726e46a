//! Per-issue orchestration.
//!
//! # Stages
//!
//! 1. **Eligibility**: authorized author, issue still open, no open pull
//!    request with the same title (when configured)
//! 2. **Retry accounting**: the attempt is counted and persisted before any
//!    work starts
//! 3. **Workspace**: fresh clone, branch `issue-<id>` reset to the default branch
//! 4. **Apply**: change-application command loop over every tracked file
//! 5. **Sync**: changed files written, removed files deleted
//! 6. **Verify**: review command loop over the diff, ending in a verdict
//! 7. **Quality gate**: external checks with bounded fix attempts; failure
//!    downgrades the pull request to a draft
//! 8. **Publish**: commit, force-push, open a pull request and comment on
//!    the issue with its number
//!
//! Stages 1 and 2 skip quietly. Later stages return typed errors that the
//! scheduler records per issue.

pub mod apply;
pub mod diff;
mod issue;
pub mod quality;
pub mod workspace;

pub use apply::{apply_and_verify, apply_prompt, verify_change};
pub use diff::{filter_changed, sync_to_disk};
pub use issue::{IssueOutcome, IssuePipeline, SkipReason};
pub use workspace::Workspace;
