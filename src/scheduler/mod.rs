//! Batch scheduling for one or more repositories.
//!
//! Per repository and cycle:
//! 1. Merge approved, conflict-free pull requests one at a time. Any merge
//!    ends the cycle for that repository after refreshing the local checkout.
//! 2. Fetch open issues and drop those blocked by another open issue.
//! 3. Run the issue pipeline for each remaining issue on a bounded pool.
//! 4. Refresh the local checkout.
//!
//! Steps 1 and 4 are skipped in dry-run mode. Every issue runs in its own
//! task, so an error or panic in one never affects the others.

use regex::Regex;
use std::collections::HashSet;
use std::sync::{Arc, OnceLock};
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, info_span, warn, Instrument};

use crate::error::HostingError;
use crate::hosting::Issue;
use crate::metrics;
use crate::pipeline::{IssueOutcome, IssuePipeline};

/// Outcome of one failed issue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueFailure {
    pub number: u64,
    pub error: String,
}

/// Pull requests handled by the merge pre-pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub merged: Vec<u64>,
    /// Pull requests skipped after a conflict or exhausted retries.
    pub skipped: Vec<(u64, String)>,
}

/// Summary of one repository cycle.
#[derive(Debug, Clone, Default)]
pub struct ScheduleReport {
    pub repository: String,
    pub merges: MergeReport,
    /// Issues not processed this cycle because of the merge pre-pass.
    pub stopped_after_merge: bool,
    pub blocked: Vec<u64>,
    pub outcomes: Vec<(u64, IssueOutcome)>,
    pub failures: Vec<IssueFailure>,
}

impl ScheduleReport {
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }
}

fn issue_reference() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"#(\d+)").expect("valid issue reference pattern"))
}

/// Issue numbers referenced as `#N` in `text`.
pub fn referenced_issues(text: &str) -> Vec<u64> {
    issue_reference()
        .captures_iter(text)
        .filter_map(|c| c[1].parse().ok())
        .collect()
}

/// Numbers of issues whose body references another issue of the batch.
pub fn blocked_issues(issues: &[Issue]) -> HashSet<u64> {
    let open: HashSet<u64> = issues.iter().map(|i| i.number).collect();
    issues
        .iter()
        .filter(|issue| {
            referenced_issues(&issue.body)
                .into_iter()
                .any(|n| n != issue.number && open.contains(&n))
        })
        .map(|issue| issue.number)
        .collect()
}

/// Runs cycles of the issue pipeline.
pub struct Scheduler {
    pipeline: Arc<IssuePipeline>,
    workers: usize,
    issue_filter: Option<u64>,
}

impl Scheduler {
    pub fn new(pipeline: Arc<IssuePipeline>) -> Self {
        let workers = pipeline.settings().workers;
        Self {
            pipeline,
            workers,
            issue_filter: None,
        }
    }

    /// Only process the issue with this number.
    pub fn with_issue_filter(mut self, number: Option<u64>) -> Self {
        self.issue_filter = number;
        self
    }

    /// One cycle over every configured repository.
    ///
    /// A repository whose issues cannot be listed is logged and skipped.
    pub async fn run(&self) -> Vec<ScheduleReport> {
        let mut reports = Vec::new();
        for repo in &self.pipeline.settings().repositories {
            match self.run_repository(repo).await {
                Ok(report) => reports.push(report),
                Err(e) => error!(repo = %repo, error = %e, "Failed to schedule repository"),
            }
        }
        reports
    }

    pub async fn run_repository(&self, repo: &str) -> Result<ScheduleReport, HostingError> {
        let mut report = ScheduleReport {
            repository: repo.to_string(),
            ..Default::default()
        };
        let dry_run = self.pipeline.is_dry_run();

        if !dry_run {
            report.merges = self.merge_approved(repo).await;
            if !report.merges.merged.is_empty() {
                info!(repo, merged = report.merges.merged.len(), "Merged pull requests, ending cycle");
                self.fetch_new_changes().await;
                report.stopped_after_merge = true;
                return Ok(report);
            }
        }

        let mut issues = self.pipeline.hosting().list_open_issues(repo).await?;
        let blocked = blocked_issues(&issues);
        issues.retain(|issue| !blocked.contains(&issue.number));
        if let Some(number) = self.issue_filter {
            issues.retain(|issue| issue.number == number);
        }
        report.blocked = blocked.into_iter().collect();
        report.blocked.sort_unstable();
        info!(repo, issues = issues.len(), blocked = report.blocked.len(), "Processing issues");

        let (outcomes, failures) = self.process_batch(issues).await;
        report.outcomes = outcomes;
        report.failures = failures;

        if !dry_run {
            self.fetch_new_changes().await;
        }
        Ok(report)
    }

    /// Merge approved pull requests, retrying each up to `merge_retries` times.
    pub async fn merge_approved(&self, repo: &str) -> MergeReport {
        let hosting = self.pipeline.hosting();
        let mut report = MergeReport::default();

        let approved = match hosting.list_approved_pull_requests(repo).await {
            Ok(prs) => prs,
            Err(e) => {
                warn!(repo, error = %e, "Could not list approved pull requests");
                return report;
            }
        };

        let attempts = self.pipeline.settings().merge_retries.max(1);
        for pr in approved {
            let mut last_error = String::new();
            let mut merged = false;
            let mut conflict = false;

            for attempt in 1..=attempts {
                match hosting.merge_pull_request(repo, pr.number).await {
                    Ok(()) => {
                        merged = true;
                        break;
                    }
                    Err(HostingError::MergeConflict(n)) => {
                        metrics::record_merge("conflict");
                        last_error = format!("pull request #{} has conflicts", n);
                        conflict = true;
                        break;
                    }
                    Err(e) => {
                        warn!(repo, pr = pr.number, attempt, error = %e, "Merge attempt failed");
                        last_error = e.to_string();
                    }
                }
            }

            if merged {
                metrics::record_merge("merged");
                info!(repo, pr = pr.number, "Merged approved pull request");
                if let Err(e) = hosting.close_issue_by_title(repo, &pr.title).await {
                    warn!(repo, title = %pr.title, error = %e, "Could not close merged issue");
                }
                report.merged.push(pr.number);
            } else {
                if !conflict {
                    metrics::record_merge("failed");
                }
                warn!(repo, pr = pr.number, reason = %last_error, "Skipping pull request");
                report.skipped.push((pr.number, last_error));
            }
        }
        report
    }

    /// Run the pipeline for each issue on at most `workers` concurrent tasks.
    pub async fn process_batch(
        &self,
        issues: Vec<Issue>,
    ) -> (Vec<(u64, IssueOutcome)>, Vec<IssueFailure>) {
        let semaphore = Arc::new(Semaphore::new(self.workers.max(1)));
        let mut tasks = JoinSet::new();

        for issue in issues {
            let semaphore = semaphore.clone();
            let pipeline = self.pipeline.clone();
            let span = info_span!(
                "issue",
                id = issue.id,
                number = issue.number,
                repo = %issue.repository
            );

            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                let number = issue.number;
                let started = Instant::now();
                metrics::worker_started();

                // Inner task so a panic is reported against this issue.
                let handle = tokio::spawn(
                    async move { pipeline.process(&issue).await }.instrument(span),
                );
                let result = match handle.await {
                    Ok(Ok(outcome)) => Ok(outcome),
                    Ok(Err(e)) => Err(e.to_string()),
                    Err(join) => Err(format!("issue task panicked: {}", join)),
                };

                metrics::worker_finished();
                let label = match &result {
                    Ok(outcome) => outcome.label(),
                    Err(_) => "failed",
                };
                metrics::record_issue_outcome(label, started.elapsed());
                (number, result)
            });
        }

        let mut outcomes = Vec::new();
        let mut failures = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((number, Ok(outcome))) => {
                    info!(issue = number, outcome = ?outcome, "Issue finished");
                    outcomes.push((number, outcome));
                }
                Ok((number, Err(error))) => {
                    error!(issue = number, error = %error, "Issue failed");
                    failures.push(IssueFailure { number, error });
                }
                Err(e) => error!(error = %e, "Worker task failed"),
            }
        }

        outcomes.sort_by_key(|(number, _)| *number);
        failures.sort_by_key(|f| f.number);
        (outcomes, failures)
    }

    /// `git fetch` in the configured local checkout, if any.
    async fn fetch_new_changes(&self) {
        let Some(dir) = &self.pipeline.settings().local_checkout else {
            return;
        };
        if let Err(e) = self.pipeline.vcs().fetch(dir).await {
            warn!(dir = %dir.display(), error = %e, "Failed to fetch new changes");
        }
    }
}
