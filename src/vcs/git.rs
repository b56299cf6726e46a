//! `git` CLI implementation of [`VersionControl`].

use async_trait::async_trait;
use std::collections::HashSet;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

use super::VersionControl;
use crate::error::VcsError;

/// Attempts for operations that talk to the remote.
const MAX_ATTEMPTS: u32 = 3;

/// Base delay for exponential backoff in milliseconds.
const BASE_RETRY_DELAY_MS: u64 = 1000;

/// Runs `git` as a child process for every operation.
#[derive(Debug, Clone)]
pub struct Git {
    remote_base: String,
    token: Option<String>,
    user_name: String,
    user_email: String,
    max_attempts: u32,
    retry_delay: Duration,
}

impl Default for Git {
    fn default() -> Self {
        Self {
            remote_base: "https://github.com".to_string(),
            token: None,
            user_name: "issue-forge".to_string(),
            user_email: "issue-forge@users.noreply.github.com".to_string(),
            max_attempts: MAX_ATTEMPTS,
            retry_delay: Duration::from_millis(BASE_RETRY_DELAY_MS),
        }
    }
}

impl Git {
    pub fn new() -> Self {
        Self::default()
    }

    /// Authenticate HTTPS remotes with a token.
    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token.filter(|t| !t.is_empty());
        self
    }

    /// Base that `owner/name` is appended to. May be a local directory.
    pub fn with_remote_base(mut self, base: impl Into<String>) -> Self {
        self.remote_base = base.into().trim_end_matches('/').to_string();
        self
    }

    /// Identity recorded on commits.
    pub fn with_identity(mut self, name: impl Into<String>, email: impl Into<String>) -> Self {
        self.user_name = name.into();
        self.user_email = email.into();
        self
    }

    /// Bound on clone, push and fetch attempts; the delay doubles after each failure.
    pub fn with_retry(mut self, max_attempts: u32, base_delay: Duration) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.retry_delay = base_delay;
        self
    }

    fn remote_url(&self, repo: &str) -> String {
        match (&self.token, self.remote_base.strip_prefix("https://")) {
            (Some(token), Some(host)) => {
                format!("https://x-access-token:{}@{}/{}.git", token, host, repo)
            }
            _ => format!("{}/{}.git", self.remote_base, repo),
        }
    }

    fn redact(&self, text: &str) -> String {
        match &self.token {
            Some(token) => text.replace(token.as_str(), "***"),
            None => text.to_string(),
        }
    }

    /// Run git in `dir` and return its stdout.
    async fn run(&self, dir: &Path, args: &[&str]) -> Result<String, VcsError> {
        debug!(dir = %dir.display(), args = %self.redact(&args.join(" ")), "Running git");

        let output = Command::new("git")
            .arg("-c")
            .arg(format!("user.name={}", self.user_name))
            .arg("-c")
            .arg(format!("user.email={}", self.user_email))
            .args(args)
            .current_dir(dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        if !output.status.success() {
            return Err(VcsError::CommandFailed {
                command: self.redact(&args.join(" ")),
                stderr: self.redact(String::from_utf8_lossy(&output.stderr).trim()),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// Run a command that talks to the remote, retrying failures with backoff.
    ///
    /// `scratch` is removed before each retry so a partial clone does not
    /// block the next attempt.
    async fn run_remote(
        &self,
        dir: &Path,
        args: &[&str],
        scratch: Option<&Path>,
    ) -> Result<String, VcsError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.run(dir, args).await {
                Ok(stdout) => return Ok(stdout),
                Err(VcsError::CommandFailed { command, stderr }) if attempt < self.max_attempts => {
                    let delay = self.retry_delay * 2u32.pow(attempt - 1);
                    warn!(
                        command = %command,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        stderr = %stderr,
                        "git remote operation failed, retrying"
                    );
                    if let Some(path) = scratch {
                        if tokio::fs::try_exists(path).await? {
                            tokio::fs::remove_dir_all(path).await?;
                        }
                    }
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl VersionControl for Git {
    async fn clone_repository(&self, repo: &str, dest: &Path) -> Result<(), VcsError> {
        let parent = dest.parent().unwrap_or_else(|| Path::new("."));
        tokio::fs::create_dir_all(parent).await?;
        let dest_str = dest.to_string_lossy();
        self.run_remote(parent, &["clone", &self.remote_url(repo), &dest_str], Some(dest))
            .await?;
        Ok(())
    }

    async fn switch_and_reset_branch(
        &self,
        dir: &Path,
        branch: &str,
        base: &str,
    ) -> Result<(), VcsError> {
        self.run(dir, &["checkout", "-B", branch]).await?;
        self.run(dir, &["reset", "--hard", &format!("origin/{}", base)])
            .await?;
        self.run(dir, &["clean", "-f", "-d"]).await?;
        Ok(())
    }

    async fn tracked_files(&self, dir: &Path) -> Result<Vec<String>, VcsError> {
        let stdout = self
            .run(
                dir,
                &["ls-files", "--cached", "--others", "--exclude-standard"],
            )
            .await?;
        Ok(stdout
            .lines()
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    async fn commit_all(&self, dir: &Path, subject: &str, body: &str) -> Result<bool, VcsError> {
        self.run(dir, &["add", "-A"]).await?;
        let status = self.run(dir, &["status", "--porcelain"]).await?;
        if status.trim().is_empty() {
            return Ok(false);
        }
        let mut args = vec!["commit", "-m", subject];
        if !body.is_empty() {
            args.extend(["-m", body]);
        }
        self.run(dir, &args).await?;
        Ok(true)
    }

    async fn force_push(&self, dir: &Path, branch: &str) -> Result<(), VcsError> {
        self.run_remote(dir, &["push", "--force", "origin", branch], None)
            .await?;
        Ok(())
    }

    async fn revert_commits(&self, dir: &Path, hashes: &[String]) -> Result<(), VcsError> {
        if hashes.is_empty() {
            return Ok(());
        }

        let mut wanted = HashSet::new();
        for hash in hashes {
            let spec = format!("{}^{{commit}}", hash);
            let full = self.run(dir, &["rev-parse", "--verify", &spec]).await?;
            wanted.insert(full.trim().to_string());
        }

        // Topological order of HEAD's history is newest first.
        let history = self.run(dir, &["rev-list", "--topo-order", "HEAD"]).await?;
        let ordered: Vec<&str> = history.lines().filter(|l| wanted.contains(*l)).collect();
        if ordered.len() != wanted.len() {
            return Err(VcsError::CommandFailed {
                command: format!("revert {}", hashes.join(" ")),
                stderr: "some commits are not on the current branch".to_string(),
            });
        }

        for hash in ordered {
            self.run(dir, &["revert", "--no-commit", hash]).await?;
        }

        let message = format!("Revert {}", hashes.join(", "));
        self.run(dir, &["commit", "-m", &message]).await?;
        Ok(())
    }

    async fn fetch(&self, dir: &Path) -> Result<(), VcsError> {
        self.run_remote(dir, &["fetch", "origin"], None).await?;
        Ok(())
    }

    async fn committer_emails(
        &self,
        dir: &Path,
        since: &str,
        until: Option<&str>,
    ) -> Result<Vec<String>, VcsError> {
        let since_arg = format!("--since={}", since);
        let until_arg = until.map(|u| format!("--until={}", u));
        let mut args = vec!["log", since_arg.as_str(), "--format=%ce"];
        if let Some(until_arg) = &until_arg {
            args.push(until_arg.as_str());
        }
        let stdout = self.run(dir, &args).await?;
        Ok(stdout
            .lines()
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }
}
