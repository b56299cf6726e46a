//! Version-control collaborator.
//!
//! The pipeline only needs a handful of operations; [`Git`] implements them
//! by shelling out to the `git` CLI.

mod git;

pub use git::Git;

use async_trait::async_trait;
use std::path::Path;

use crate::error::VcsError;

/// Operations the pipeline and commands perform on a working copy.
#[async_trait]
pub trait VersionControl: Send + Sync {
    /// Clone `repo` (`owner/name`) into `dest`.
    async fn clone_repository(&self, repo: &str, dest: &Path) -> Result<(), VcsError>;

    /// Create or reset `branch` to `origin/<base>` and remove untracked files.
    async fn switch_and_reset_branch(
        &self,
        dir: &Path,
        branch: &str,
        base: &str,
    ) -> Result<(), VcsError>;

    /// Paths of tracked and untracked non-ignored files, relative to `dir`.
    async fn tracked_files(&self, dir: &Path) -> Result<Vec<String>, VcsError>;

    /// Stage everything and commit. Returns false when there was nothing to commit.
    async fn commit_all(&self, dir: &Path, subject: &str, body: &str) -> Result<bool, VcsError>;

    async fn force_push(&self, dir: &Path, branch: &str) -> Result<(), VcsError>;

    /// Revert the given commits newest first and record a single commit.
    async fn revert_commits(&self, dir: &Path, hashes: &[String]) -> Result<(), VcsError>;

    async fn fetch(&self, dir: &Path) -> Result<(), VcsError>;

    /// Committer emails of commits in the given date range, newest first.
    async fn committer_emails(
        &self,
        dir: &Path,
        since: &str,
        until: Option<&str>,
    ) -> Result<Vec<String>, VcsError>;
}
