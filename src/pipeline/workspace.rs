//! Issue-scoped working copies.

use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::PipelineError;
use crate::session::{read_files, FileMap};
use crate::vcs::VersionControl;

/// A fresh clone at `<target_root>/issue-<id>/<name>` on branch `issue-<id>`.
#[derive(Debug, Clone)]
pub struct Workspace {
    dir: PathBuf,
    repo: String,
    branch: String,
}

impl Workspace {
    pub fn new(target_root: &Path, issue_id: u64, repo: &str) -> Self {
        let name = repo.rsplit('/').next().unwrap_or(repo);
        Self {
            dir: target_root.join(format!("issue-{}", issue_id)).join(name),
            repo: repo.to_string(),
            branch: branch_name(issue_id),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    /// Clone from scratch and reset the issue branch to `origin/<base>`.
    pub async fn prepare(&self, vcs: &dyn VersionControl, base: &str) -> Result<(), PipelineError> {
        if tokio::fs::try_exists(&self.dir).await? {
            tokio::fs::remove_dir_all(&self.dir).await?;
        }
        if let Some(parent) = self.dir.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        info!(repo = %self.repo, dir = %self.dir.display(), "Cloning repository");
        vcs.clone_repository(&self.repo, &self.dir).await?;
        vcs.switch_and_reset_branch(&self.dir, &self.branch, base)
            .await?;
        Ok(())
    }

    /// Contents of every tracked file.
    pub async fn snapshot(&self, vcs: &dyn VersionControl) -> Result<FileMap, PipelineError> {
        let tracked = vcs.tracked_files(&self.dir).await?;
        Ok(read_files(&self.dir, &tracked).await)
    }
}

/// Deterministic branch for an issue.
pub fn branch_name(issue_id: u64) -> String {
    format!("issue-{}", issue_id)
}
