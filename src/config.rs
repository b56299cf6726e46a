//! Run configuration.
//!
//! `Settings` is built once per run (YAML file, then CLI overrides) and shared
//! read-only through an `Arc`. Nothing mutates it after startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default maximum number of characters sent to the LLM in one prompt.
pub const DEFAULT_MAX_INPUT_CHARS: usize = 48_000;

/// Immutable settings for one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Repositories to process, as `owner/name`.
    pub repositories: Vec<String>,
    /// Issue authors allowed to trigger changes. Empty means any author.
    pub admin_users: Vec<String>,
    /// Users requested as reviewers on created pull requests.
    pub reviewers: Vec<String>,
    /// Whether to request reviews on created pull requests.
    pub request_review: bool,
    /// Skip issues that already have an open pull request with the same title.
    pub check_open_pr: bool,
    /// Run static analysis and tests before publishing.
    pub do_quality_checks: bool,
    /// Automatic fix attempts after failing quality checks.
    pub quality_retries: usize,
    /// Attempts per issue before it is no longer processed.
    pub max_retries: u32,
    /// Attempts per approved pull request during the merge pre-pass.
    pub merge_retries: u32,
    /// Maximum prompt size in characters.
    pub max_input_chars: usize,
    /// Model used for the command loops.
    pub model: String,
    /// Iteration bound for a single command loop.
    pub loop_max_iterations: usize,
    /// Consecutive error bound for a single command loop.
    pub loop_max_exceptions: usize,
    /// Number of issues processed concurrently.
    pub workers: usize,
    /// Source directory relative to the repository root.
    pub code_path: String,
    /// Root directory for issue workspaces.
    pub target_root: PathBuf,
    /// Directory holding per-issue retry state.
    pub state_dir: PathBuf,
    /// Directory holding memoized LLM completions.
    pub cache_dir: PathBuf,
    /// Memoize LLM completions on disk.
    pub use_cache: bool,
    /// Upstream branch that issue branches are reset to.
    pub default_branch: String,
    /// Local checkout refreshed with `git fetch` after merges and after each batch.
    pub local_checkout: Option<PathBuf>,
    /// Committer email identifying agent-authored commits in reports.
    pub agent_email: String,
    /// Timeout for terminal commands and external checks, in seconds.
    pub command_timeout_secs: u64,
    /// Base URL of the OpenAI-compatible completion API.
    pub api_base: String,
    /// Base URL of the GitHub REST API.
    pub github_api_base: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            repositories: Vec::new(),
            admin_users: Vec::new(),
            reviewers: Vec::new(),
            request_review: true,
            check_open_pr: false,
            do_quality_checks: true,
            quality_retries: 0,
            max_retries: 3,
            merge_retries: 2,
            max_input_chars: DEFAULT_MAX_INPUT_CHARS,
            model: "gpt-4-1106-preview".to_string(),
            loop_max_iterations: 15,
            loop_max_exceptions: 5,
            workers: 4,
            code_path: "src".to_string(),
            target_root: PathBuf::from("target"),
            state_dir: PathBuf::from(".cache/state"),
            cache_dir: PathBuf::from(".cache/llm"),
            use_cache: false,
            default_branch: "main".to_string(),
            local_checkout: None,
            agent_email: "issue-forge@users.noreply.github.com".to_string(),
            command_timeout_secs: 300,
            api_base: "https://api.openai.com/v1".to_string(),
            github_api_base: "https://api.github.com".to_string(),
        }
    }
}

impl Settings {
    /// Load settings from a YAML file. Missing fields take their defaults.
    pub fn from_yaml_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    /// Parse settings from YAML text.
    pub fn from_yaml_str(text: &str) -> anyhow::Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(text)?)
    }

    /// Whether `author` may trigger changes.
    pub fn is_authorized(&self, author: &str) -> bool {
        self.admin_users.is_empty() || self.admin_users.iter().any(|u| u == author)
    }

    /// Reviewers to request on a new pull request.
    pub fn review_requests(&self) -> Vec<String> {
        if self.request_review {
            self.reviewers.clone()
        } else {
            Vec::new()
        }
    }

    /// Timeout applied to spawned processes.
    pub fn command_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.command_timeout_secs)
    }
}
