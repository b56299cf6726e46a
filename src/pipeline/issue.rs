//! Per-issue pipeline: eligibility, retry accounting, workspace, change
//! application, verification, quality gate and publication.

use std::sync::Arc;
use tracing::{info, warn};

use super::apply::{apply_prompt, verify_change};
use super::diff::sync_to_disk;
use super::quality::quality_gate;
use super::workspace::Workspace;
use crate::checks::{Formatter, QualityCheck};
use crate::command_loop::LoopConfig;
use crate::commands::CommandContext;
use crate::config::Settings;
use crate::error::PipelineError;
use crate::hosting::{HostingService, Issue, NewPullRequest};
use crate::llm::Gateway;
use crate::prompts::{PromptComment, Prompts};
use crate::store::FileStateStore;
use crate::vcs::VersionControl;

/// Why an issue was not processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Unauthorized,
    Closed,
    PullRequestExists,
    RetryLimit,
}

/// Result of processing one issue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IssueOutcome {
    Skipped(SkipReason),
    /// Changes were pushed. `pull_request` is `None` when one already existed.
    Published {
        pull_request: Option<u64>,
        draft: bool,
    },
    /// Changes were made and verified but not published.
    DryRun { draft: bool },
}

impl IssueOutcome {
    /// Metric label.
    pub fn label(&self) -> &'static str {
        match self {
            IssueOutcome::Skipped(_) => "skipped",
            IssueOutcome::Published { draft: true, .. } | IssueOutcome::DryRun { draft: true } => {
                "draft"
            }
            IssueOutcome::Published { .. } | IssueOutcome::DryRun { .. } => "published",
        }
    }
}

/// Everything needed to process issues. Cheap to share across workers.
pub struct IssuePipeline {
    settings: Arc<Settings>,
    gateway: Arc<Gateway>,
    prompts: Arc<Prompts>,
    hosting: Arc<dyn HostingService>,
    vcs: Arc<dyn VersionControl>,
    store: Arc<FileStateStore>,
    checks: Vec<Arc<dyn QualityCheck>>,
    formatter: Option<Arc<dyn Formatter>>,
    dry_run: bool,
}

impl IssuePipeline {
    pub fn new(
        settings: Arc<Settings>,
        gateway: Arc<Gateway>,
        hosting: Arc<dyn HostingService>,
        vcs: Arc<dyn VersionControl>,
        store: Arc<FileStateStore>,
    ) -> Result<Self, PipelineError> {
        Ok(Self {
            settings,
            gateway,
            prompts: Arc::new(Prompts::new()?),
            hosting,
            vcs,
            store,
            checks: Vec::new(),
            formatter: None,
            dry_run: false,
        })
    }

    pub fn with_checks(mut self, checks: Vec<Arc<dyn QualityCheck>>) -> Self {
        self.checks = checks;
        self
    }

    pub fn with_formatter(mut self, formatter: Arc<dyn Formatter>) -> Self {
        self.formatter = Some(formatter);
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn hosting(&self) -> &Arc<dyn HostingService> {
        &self.hosting
    }

    pub fn vcs(&self) -> &Arc<dyn VersionControl> {
        &self.vcs
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Objective text for `issue`, with discussion from authorized users.
    pub fn objective(&self, issue: &Issue) -> Result<String, PipelineError> {
        let comments: Vec<PromptComment<'_>> = issue
            .comments
            .iter()
            .filter(|c| self.settings.is_authorized(&c.author))
            .map(|c| PromptComment {
                author: &c.author,
                body: &c.body,
            })
            .collect();
        Ok(self.prompts.issue(&issue.title, &issue.body, &comments)?)
    }

    /// Text whose change resets the retry count.
    pub fn fingerprint(&self, issue: &Issue) -> Result<String, PipelineError> {
        Ok(self.prompts.issue(&issue.title, &issue.body, &[])?)
    }

    fn command_context(&self) -> CommandContext<'_> {
        CommandContext {
            gateway: &self.gateway,
            prompts: &self.prompts,
            vcs: self.vcs.as_ref(),
            formatter: self.formatter.as_deref(),
            code_path: &self.settings.code_path,
            timeout: self.settings.command_timeout(),
        }
    }

    /// Run every stage for `issue`.
    pub async fn process(&self, issue: &Issue) -> Result<IssueOutcome, PipelineError> {
        if let Some(reason) = self.check_eligibility(issue).await? {
            info!(?reason, "Skipping issue");
            return Ok(IssueOutcome::Skipped(reason));
        }

        let fingerprint = self.fingerprint(issue)?;
        let Some(state) =
            self.store
                .begin_attempt(issue.id, &fingerprint, self.settings.max_retries)?
        else {
            info!("Retry limit reached, skipping issue");
            return Ok(IssueOutcome::Skipped(SkipReason::RetryLimit));
        };
        info!(attempt = state.retry_count, "Processing issue");

        let workspace = Workspace::new(&self.settings.target_root, issue.id, &issue.repository);
        workspace
            .prepare(self.vcs.as_ref(), &self.settings.default_branch)
            .await?;

        let objective = self.objective(issue)?;
        let ctx = self.command_context();
        let config = LoopConfig::from_settings(&self.settings);

        let original = workspace.snapshot(self.vcs.as_ref()).await?;
        let updated = apply_prompt(&objective, &original, workspace.dir(), &ctx, &config).await?;
        sync_to_disk(workspace.dir(), &original, &updated).await?;
        verify_change(&original, &updated, &objective, workspace.dir(), &ctx, &config).await?;

        let mut quality_findings = None;
        if self.settings.do_quality_checks && !self.checks.is_empty() {
            match quality_gate(
                &workspace,
                &self.checks,
                self.settings.quality_retries,
                self.vcs.as_ref(),
                &ctx,
                &config,
            )
            .await
            {
                Ok(()) => {}
                Err(PipelineError::Quality { attempts, findings }) => {
                    warn!(attempts, "Quality gate failed, publishing as draft");
                    quality_findings = Some(findings);
                }
                Err(e) => return Err(e),
            }
        }
        let draft = quality_findings.is_some();

        if self.dry_run {
            info!(draft, "Dry run, not publishing");
            return Ok(IssueOutcome::DryRun { draft });
        }

        let pull_request = self
            .publish(issue, &workspace, quality_findings.as_deref())
            .await?;
        Ok(IssueOutcome::Published {
            pull_request,
            draft,
        })
    }

    async fn check_eligibility(&self, issue: &Issue) -> Result<Option<SkipReason>, PipelineError> {
        if !self.settings.is_authorized(&issue.author) {
            return Ok(Some(SkipReason::Unauthorized));
        }
        if !self
            .hosting
            .is_issue_open(&issue.repository, issue.number)
            .await?
        {
            return Ok(Some(SkipReason::Closed));
        }
        if self.settings.check_open_pr
            && self
                .hosting
                .pull_request_exists(&issue.repository, &issue.title)
                .await?
        {
            return Ok(Some(SkipReason::PullRequestExists));
        }
        Ok(None)
    }

    async fn publish(
        &self,
        issue: &Issue,
        workspace: &Workspace,
        quality_findings: Option<&str>,
    ) -> Result<Option<u64>, PipelineError> {
        let body = format!("Prompt: \"{}\"", issue.body);
        if !self
            .vcs
            .commit_all(workspace.dir(), &issue.title, &body)
            .await?
        {
            return Err(PipelineError::Aborted("nothing to commit".to_string()));
        }
        self.vcs
            .force_push(workspace.dir(), workspace.branch())
            .await?;

        if self
            .hosting
            .pull_request_exists(&issue.repository, &issue.title)
            .await?
        {
            info!("Pull request already exists, branch updated");
            return Ok(None);
        }

        let mut pr_body = issue.body.clone();
        if let Some(findings) = quality_findings {
            pr_body.push_str(&format!(
                "\n\n---\nQuality checks did not pass:\n```\n{}\n```",
                findings
            ));
        }
        let request = NewPullRequest {
            title: issue.title.clone(),
            body: pr_body,
            head: workspace.branch().to_string(),
            base: self.settings.default_branch.clone(),
            draft: quality_findings.is_some(),
            reviewers: self.settings.review_requests(),
        };
        let number = self
            .hosting
            .create_pull_request(&issue.repository, &request)
            .await?;

        let comment = format!("Opened pull request #{}.", number);
        if let Err(e) = self
            .hosting
            .comment_on_issue(&issue.repository, issue.number, &comment)
            .await
        {
            warn!(error = %e, "Failed to comment on issue");
        }
        Ok(Some(number))
    }
}
