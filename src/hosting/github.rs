//! GitHub REST v3 implementation of [`HostingService`].

use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{HostingService, Issue, IssueComment, NewPullRequest, PullRequest};
use crate::error::HostingError;

const PAGE_SIZE: usize = 100;
const MAX_ATTEMPTS: u32 = 3;
const BASE_RETRY_DELAY_MS: u64 = 1000;
/// Issues whose comments are fetched concurrently.
const COMMENT_FETCH_CONCURRENCY: usize = 4;

#[derive(Debug, Deserialize)]
struct RawUser {
    login: String,
}

#[derive(Debug, Deserialize)]
struct RawIssue {
    id: u64,
    number: u64,
    title: String,
    #[serde(default)]
    body: Option<String>,
    user: RawUser,
    #[serde(default)]
    state: String,
    #[serde(default)]
    pull_request: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct RawComment {
    user: RawUser,
    #[serde(default)]
    body: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawRef {
    #[serde(rename = "ref")]
    name: String,
}

#[derive(Debug, Deserialize)]
struct RawPull {
    number: u64,
    title: String,
    head: RawRef,
    #[serde(default)]
    mergeable: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct RawReview {
    state: String,
}

#[derive(Debug, Deserialize)]
struct Created {
    number: u64,
}

/// GitHub API client authenticated with a token.
pub struct GitHubClient {
    http: Client,
    api_base: String,
}

impl GitHubClient {
    pub fn new(token: &str, api_base: impl Into<String>) -> Result<Self, HostingError> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("issue-forge"));
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(
            "x-github-api-version",
            HeaderValue::from_static("2022-11-28"),
        );
        let auth = HeaderValue::from_str(&format!("Bearer {}", token.trim()))
            .map_err(|e| HostingError::HttpError(format!("invalid token header: {}", e)))?;
        headers.insert(AUTHORIZATION, auth);

        let http = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()
            .expect("Failed to build HTTP client");

        Ok(Self {
            http,
            api_base: api_base.into().trim_end_matches('/').to_string(),
        })
    }

    /// Build a client from the `GITHUB_API_KEY` environment variable.
    pub fn from_env(api_base: impl Into<String>) -> Result<Self, HostingError> {
        let token = std::env::var("GITHUB_API_KEY").map_err(|_| HostingError::MissingToken)?;
        Self::new(&token, api_base)
    }

    fn url(&self, repo: &str, path: &str) -> String {
        let repo = repo
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect::<Vec<_>>()
            .join("/");
        format!("{}/repos/{}{}", self.api_base, repo, path)
    }

    /// Send a request, retrying transport errors, 429 and 5xx with backoff.
    async fn request_json<T, F>(&self, operation: &str, build: F) -> Result<T, HostingError>
    where
        T: DeserializeOwned,
        F: Fn() -> RequestBuilder,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match build().send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let text = response
                            .text()
                            .await
                            .map_err(|e| HostingError::HttpError(e.to_string()))?;
                        let text = if text.trim().is_empty() { "null" } else { text.as_str() };
                        return serde_json::from_str(text).map_err(|e| {
                            HostingError::ParseError(format!("{}: {}", operation, e))
                        });
                    }

                    let retry_after = response
                        .headers()
                        .get("retry-after")
                        .and_then(|v| v.to_str().ok())
                        .and_then(|v| v.trim().parse::<u64>().ok());
                    let body = response.text().await.unwrap_or_default();
                    let retryable = status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error();

                    if retryable && attempt < MAX_ATTEMPTS {
                        let delay = retry_after
                            .map(|s| s * 1000)
                            .unwrap_or(BASE_RETRY_DELAY_MS * 2u64.pow(attempt - 1));
                        warn!(operation, status = status.as_u16(), attempt, "GitHub request failed, retrying");
                        tokio::time::sleep(Duration::from_millis(delay)).await;
                        continue;
                    }

                    if status == StatusCode::TOO_MANY_REQUESTS {
                        return Err(HostingError::RateLimited { retry_after });
                    }
                    return Err(HostingError::ApiError {
                        operation: operation.to_string(),
                        code: status.as_u16(),
                        message: body.chars().take(800).collect(),
                    });
                }
                Err(e) => {
                    if (e.is_timeout() || e.is_connect()) && attempt < MAX_ATTEMPTS {
                        warn!(operation, attempt, error = %e, "GitHub transport error, retrying");
                        tokio::time::sleep(Duration::from_millis(
                            BASE_RETRY_DELAY_MS * 2u64.pow(attempt - 1),
                        ))
                        .await;
                        continue;
                    }
                    return Err(HostingError::HttpError(format!("{}: {}", operation, e)));
                }
            }
        }
    }

    /// Fetch every page of a list endpoint.
    async fn paginate<T: DeserializeOwned>(
        &self,
        operation: &str,
        url: &str,
        query: &str,
    ) -> Result<Vec<T>, HostingError> {
        let mut rows = Vec::new();
        let mut page = 1u32;
        loop {
            let page_url = format!("{}?{}per_page={}&page={}", url, query, PAGE_SIZE, page);
            let chunk: Vec<T> = self
                .request_json(operation, || self.http.get(&page_url))
                .await?;
            let len = chunk.len();
            rows.extend(chunk);
            if len < PAGE_SIZE {
                return Ok(rows);
            }
            page += 1;
        }
    }

    async fn open_issues_raw(&self, repo: &str) -> Result<Vec<RawIssue>, HostingError> {
        let issues: Vec<RawIssue> = self
            .paginate("list issues", &self.url(repo, "/issues"), "state=open&")
            .await?;
        Ok(issues
            .into_iter()
            .filter(|issue| issue.pull_request.is_none())
            .collect())
    }

    async fn open_pulls(&self, repo: &str) -> Result<Vec<RawPull>, HostingError> {
        self.paginate("list pull requests", &self.url(repo, "/pulls"), "state=open&")
            .await
    }

    async fn comments(&self, repo: &str, number: u64) -> Result<Vec<IssueComment>, HostingError> {
        let raw: Vec<RawComment> = self
            .paginate(
                "list issue comments",
                &self.url(repo, &format!("/issues/{}/comments", number)),
                "",
            )
            .await?;
        Ok(raw
            .into_iter()
            .map(|c| IssueComment {
                author: c.user.login,
                body: c.body.unwrap_or_default(),
            })
            .collect())
    }
}

#[async_trait]
impl HostingService for GitHubClient {
    async fn list_open_issues(&self, repo: &str) -> Result<Vec<Issue>, HostingError> {
        let raw = self.open_issues_raw(repo).await?;
        debug!(repo, count = raw.len(), "Fetched open issues");

        stream::iter(raw)
            .map(|issue| async move {
                let comments = self.comments(repo, issue.number).await?;
                Ok::<_, HostingError>(Issue {
                    id: issue.id,
                    number: issue.number,
                    title: issue.title,
                    body: issue.body.unwrap_or_default(),
                    author: issue.user.login,
                    repository: repo.to_string(),
                    comments,
                })
            })
            .buffered(COMMENT_FETCH_CONCURRENCY)
            .try_collect()
            .await
    }

    async fn is_issue_open(&self, repo: &str, number: u64) -> Result<bool, HostingError> {
        let url = self.url(repo, &format!("/issues/{}", number));
        let issue: RawIssue = self
            .request_json("get issue", || self.http.get(&url))
            .await?;
        Ok(issue.state == "open")
    }

    async fn pull_request_exists(&self, repo: &str, title: &str) -> Result<bool, HostingError> {
        Ok(self
            .open_pulls(repo)
            .await?
            .iter()
            .any(|pr| pr.title == title))
    }

    async fn create_pull_request(
        &self,
        repo: &str,
        request: &NewPullRequest,
    ) -> Result<u64, HostingError> {
        let url = self.url(repo, "/pulls");
        let payload = json!({
            "title": request.title,
            "body": request.body,
            "head": request.head,
            "base": request.base,
            "draft": request.draft,
        });
        let created: Created = self
            .request_json("create pull request", || self.http.post(&url).json(&payload))
            .await?;
        info!(repo, number = created.number, draft = request.draft, "Created pull request");

        if !request.reviewers.is_empty() {
            let url = self.url(repo, &format!("/pulls/{}/requested_reviewers", created.number));
            let payload = json!({ "reviewers": request.reviewers });
            let _: Value = self
                .request_json("request reviewers", || self.http.post(&url).json(&payload))
                .await?;
        }
        Ok(created.number)
    }

    async fn list_approved_pull_requests(
        &self,
        repo: &str,
    ) -> Result<Vec<PullRequest>, HostingError> {
        let mut approved = Vec::new();
        for pr in self.open_pulls(repo).await? {
            let reviews: Vec<RawReview> = self
                .paginate(
                    "list reviews",
                    &self.url(repo, &format!("/pulls/{}/reviews", pr.number)),
                    "",
                )
                .await?;
            if reviews.iter().any(|r| r.state == "APPROVED") {
                approved.push(PullRequest {
                    number: pr.number,
                    title: pr.title,
                    head: pr.head.name,
                });
            }
        }
        Ok(approved)
    }

    async fn merge_pull_request(&self, repo: &str, number: u64) -> Result<(), HostingError> {
        let url = self.url(repo, &format!("/pulls/{}", number));
        let pr: RawPull = self
            .request_json("get pull request", || self.http.get(&url))
            .await?;
        if pr.mergeable != Some(true) {
            return Err(HostingError::MergeConflict(number));
        }

        let merge_url = format!("{}/merge", url);
        let payload = json!({ "merge_method": "rebase" });
        let result: Result<Value, _> = self
            .request_json("merge pull request", || self.http.put(&merge_url).json(&payload))
            .await;
        match result {
            Ok(_) => {
                info!(repo, number, "Merged pull request");
                Ok(())
            }
            Err(HostingError::ApiError { code: 405 | 409, .. }) => {
                Err(HostingError::MergeConflict(number))
            }
            Err(e) => Err(e),
        }
    }

    async fn close_issue_by_title(&self, repo: &str, title: &str) -> Result<bool, HostingError> {
        let Some(issue) = self
            .open_issues_raw(repo)
            .await?
            .into_iter()
            .find(|issue| issue.title == title)
        else {
            return Ok(false);
        };

        let url = self.url(repo, &format!("/issues/{}", issue.number));
        let payload = json!({ "state": "closed" });
        let _: Value = self
            .request_json("close issue", || self.http.patch(&url).json(&payload))
            .await?;
        info!(repo, number = issue.number, "Closed issue");
        Ok(true)
    }

    async fn comment_on_issue(
        &self,
        repo: &str,
        number: u64,
        body: &str,
    ) -> Result<(), HostingError> {
        let url = self.url(repo, &format!("/issues/{}/comments", number));
        let payload = json!({ "body": body });
        let _: Value = self
            .request_json("comment on issue", || self.http.post(&url).json(&payload))
            .await?;
        Ok(())
    }
}
