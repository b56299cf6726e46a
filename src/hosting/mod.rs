//! Hosting-service collaborator: issues and pull requests.

mod github;

pub use github::GitHubClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::HostingError;

/// A comment on an issue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueComment {
    pub author: String,
    pub body: String,
}

/// An open work item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    /// Globally unique id, stable across title edits.
    pub id: u64,
    /// Number within the repository, as referenced by `#N`.
    pub number: u64,
    pub title: String,
    pub body: String,
    pub author: String,
    /// `owner/name`.
    pub repository: String,
    pub comments: Vec<IssueComment>,
}

/// An open pull request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    pub title: String,
    pub head: String,
}

/// Fields of a pull request to create.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPullRequest {
    pub title: String,
    pub body: String,
    pub head: String,
    pub base: String,
    pub draft: bool,
    pub reviewers: Vec<String>,
}

/// Operations the scheduler and pipeline perform against the hosting service.
#[async_trait]
pub trait HostingService: Send + Sync {
    /// Open issues with their comments, excluding pull requests.
    async fn list_open_issues(&self, repo: &str) -> Result<Vec<Issue>, HostingError>;

    async fn is_issue_open(&self, repo: &str, number: u64) -> Result<bool, HostingError>;

    /// Whether an open pull request carries `title`.
    async fn pull_request_exists(&self, repo: &str, title: &str) -> Result<bool, HostingError>;

    /// Create a pull request and return its number.
    async fn create_pull_request(
        &self,
        repo: &str,
        request: &NewPullRequest,
    ) -> Result<u64, HostingError>;

    /// Open pull requests with at least one approving review.
    async fn list_approved_pull_requests(&self, repo: &str)
        -> Result<Vec<PullRequest>, HostingError>;

    /// Merge when conflict-free, otherwise fail with `MergeConflict`.
    async fn merge_pull_request(&self, repo: &str, number: u64) -> Result<(), HostingError>;

    /// Close the open issue titled `title`. Returns false when none matched.
    async fn close_issue_by_title(&self, repo: &str, title: &str) -> Result<bool, HostingError>;

    /// Post `body` as a comment on issue `number`.
    async fn comment_on_issue(&self, repo: &str, number: u64, body: &str)
        -> Result<(), HostingError>;
}
