//! End-to-end tests of the issue pipeline and scheduler with scripted
//! collaborators. Nothing here touches the network or a real repository.

use async_trait::async_trait;
use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use issue_forge::checks::QualityCheck;
use issue_forge::command_loop::LoopConfig;
use issue_forge::commands::{Command, CommandContext};
use issue_forge::config::Settings;
use issue_forge::error::{CheckError, CommandError, HostingError, LlmError, VcsError};
use issue_forge::evals::{run_suite, EvalCase, EvalSuite};
use issue_forge::hosting::{HostingService, Issue, NewPullRequest, PullRequest};
use issue_forge::llm::{
    Choice, CompletionRequest, Gateway, GenerationRequest, GenerationResponse, LlmProvider,
    Message, ResponseCache, Usage,
};
use issue_forge::pipeline::{
    apply_and_verify, apply_prompt, sync_to_disk, IssueOutcome, IssuePipeline, SkipReason,
};
use issue_forge::prompts::{Prompts, REPLACE_SYSTEM_PROMPT, REPLACE_THINK_SYSTEM_PROMPT};
use issue_forge::scheduler::Scheduler;
use issue_forge::session::{read_tree, FileMap, SessionState};
use issue_forge::store::FileStateStore;
use issue_forge::vcs::VersionControl;

const REPO: &str = "acme/widgets";

type Script = dyn Fn(&GenerationRequest) -> Result<Message, LlmError> + Send + Sync;

/// Answers each request through a script and counts calls.
struct ScriptedProvider {
    script: Box<Script>,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    fn new(
        script: impl Fn(&GenerationRequest) -> Result<Message, LlmError> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            script: Box::new(script),
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let message = (self.script)(&request)?;
        Ok(GenerationResponse {
            id: "scripted".to_string(),
            model: request.model.clone(),
            choices: vec![Choice {
                index: 0,
                message,
                finish_reason: "stop".to_string(),
            }],
            usage: Usage::default(),
        })
    }
}

fn offered_tools(request: &GenerationRequest) -> Vec<&str> {
    request
        .tools
        .iter()
        .flatten()
        .map(|tool| tool.name())
        .collect()
}

fn verdict(passed: bool) -> Message {
    Message::assistant_call(
        "Verdict",
        serde_json::json!({"reasoning": "looks right", "verdict": passed}).to_string(),
    )
}

/// A model that adds `add_one` to `src/helpers.py` and approves the result.
fn add_one_script(request: &GenerationRequest) -> Result<Message, LlmError> {
    add_one_into("src/helpers.py", request)
}

fn add_one_into(filename: &str, request: &GenerationRequest) -> Result<Message, LlmError> {
    let system = request.messages[0].content.as_str();
    let prompt = request.messages[1].content.as_str();

    if system == REPLACE_THINK_SYSTEM_PROMPT {
        return Ok(Message::assistant("Define add_one returning its argument plus one."));
    }
    if system == REPLACE_SYSTEM_PROMPT {
        return Ok(Message::assistant(
            "```python\ndef add_one(x):\n    return x + 1\n```",
        ));
    }

    if offered_tools(request).contains(&"ReplaceFile") {
        if prompt.contains(&format!("File {} has been replaced.", filename)) {
            return Ok(verdict(true));
        }
        return Ok(Message::assistant_call(
            "ReplaceFile",
            serde_json::json!({
                "filename": filename,
                "instructions": "add a function add_one(x) returning x + 1"
            })
            .to_string(),
        ));
    }
    Ok(verdict(true))
}

#[derive(Default)]
struct VcsLog {
    clones: usize,
    commits: Vec<(String, String)>,
    pushes: Vec<String>,
    fetches: usize,
}

/// Clones a fixed file tree and records every write operation.
struct FakeVcs {
    seed: FileMap,
    log: Mutex<VcsLog>,
}

impl FakeVcs {
    fn new() -> Arc<Self> {
        let seed: FileMap = [
            ("README.md".to_string(), "# widgets\n".to_string()),
            ("src/helpers.py".to_string(), String::new()),
        ]
        .into();
        Arc::new(Self {
            seed,
            log: Mutex::new(VcsLog::default()),
        })
    }
}

#[async_trait]
impl VersionControl for FakeVcs {
    async fn clone_repository(&self, _repo: &str, dest: &Path) -> Result<(), VcsError> {
        for (path, content) in &self.seed {
            let target = dest.join(path);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(target, content)?;
        }
        self.log.lock().unwrap().clones += 1;
        Ok(())
    }

    async fn switch_and_reset_branch(&self, _: &Path, _: &str, _: &str) -> Result<(), VcsError> {
        Ok(())
    }

    async fn tracked_files(&self, dir: &Path) -> Result<Vec<String>, VcsError> {
        Ok(read_tree(dir)?.into_keys().collect())
    }

    async fn commit_all(&self, _: &Path, subject: &str, body: &str) -> Result<bool, VcsError> {
        self.log
            .lock()
            .unwrap()
            .commits
            .push((subject.to_string(), body.to_string()));
        Ok(true)
    }

    async fn force_push(&self, _: &Path, branch: &str) -> Result<(), VcsError> {
        self.log.lock().unwrap().pushes.push(branch.to_string());
        Ok(())
    }

    async fn revert_commits(&self, _: &Path, _: &[String]) -> Result<(), VcsError> {
        Ok(())
    }

    async fn fetch(&self, _: &Path) -> Result<(), VcsError> {
        self.log.lock().unwrap().fetches += 1;
        Ok(())
    }

    async fn committer_emails(
        &self,
        _: &Path,
        _: &str,
        _: Option<&str>,
    ) -> Result<Vec<String>, VcsError> {
        Ok(Vec::new())
    }
}

#[derive(Default)]
struct HostingLog {
    created: Vec<NewPullRequest>,
    merge_attempts: Vec<u64>,
    closed: Vec<String>,
    comments: Vec<(u64, String)>,
}

/// In-memory issues and pull requests.
#[derive(Default)]
struct FakeHosting {
    issues: Mutex<Vec<Issue>>,
    approved: Vec<PullRequest>,
    conflicting: HashSet<u64>,
    log: Mutex<HostingLog>,
}

impl FakeHosting {
    fn with_issues(issues: Vec<Issue>) -> Self {
        Self {
            issues: Mutex::new(issues),
            ..Default::default()
        }
    }
}

#[async_trait]
impl HostingService for FakeHosting {
    async fn list_open_issues(&self, repo: &str) -> Result<Vec<Issue>, HostingError> {
        let issues = self.issues.lock().unwrap();
        Ok(issues.iter().filter(|i| i.repository == repo).cloned().collect())
    }

    async fn is_issue_open(&self, _: &str, number: u64) -> Result<bool, HostingError> {
        Ok(self.issues.lock().unwrap().iter().any(|i| i.number == number))
    }

    async fn pull_request_exists(&self, _: &str, title: &str) -> Result<bool, HostingError> {
        Ok(self.log.lock().unwrap().created.iter().any(|pr| pr.title == title))
    }

    async fn create_pull_request(
        &self,
        _: &str,
        request: &NewPullRequest,
    ) -> Result<u64, HostingError> {
        let mut log = self.log.lock().unwrap();
        log.created.push(request.clone());
        Ok(log.created.len() as u64)
    }

    async fn list_approved_pull_requests(&self, _: &str) -> Result<Vec<PullRequest>, HostingError> {
        Ok(self.approved.clone())
    }

    async fn merge_pull_request(&self, _: &str, number: u64) -> Result<(), HostingError> {
        self.log.lock().unwrap().merge_attempts.push(number);
        if self.conflicting.contains(&number) {
            return Err(HostingError::MergeConflict(number));
        }
        Ok(())
    }

    async fn close_issue_by_title(&self, _: &str, title: &str) -> Result<bool, HostingError> {
        let mut issues = self.issues.lock().unwrap();
        let before = issues.len();
        issues.retain(|i| i.title != title);
        self.log.lock().unwrap().closed.push(title.to_string());
        Ok(issues.len() < before)
    }

    async fn comment_on_issue(&self, _: &str, number: u64, body: &str) -> Result<(), HostingError> {
        self.log
            .lock()
            .unwrap()
            .comments
            .push((number, body.to_string()));
        Ok(())
    }
}

/// Always reports the same finding.
struct FailingCheck;

#[async_trait]
impl QualityCheck for FailingCheck {
    fn name(&self) -> &str {
        "lint"
    }

    async fn run(&self, _dir: &Path) -> Result<Option<String>, CheckError> {
        Ok(Some("helpers.py:1: missing docstring".to_string()))
    }
}

/// Reports a finding on its first `failures` runs, then passes.
struct FlakyCheck {
    failures: usize,
    runs: AtomicUsize,
}

impl FlakyCheck {
    fn new(failures: usize) -> Arc<Self> {
        Arc::new(Self {
            failures,
            runs: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl QualityCheck for FlakyCheck {
    fn name(&self) -> &str {
        "lint"
    }

    async fn run(&self, _dir: &Path) -> Result<Option<String>, CheckError> {
        let run = self.runs.fetch_add(1, Ordering::SeqCst);
        if run < self.failures {
            return Ok(Some("helpers.py:1: missing docstring".to_string()));
        }
        Ok(None)
    }
}

fn context<'a>(gateway: &'a Gateway, prompts: &'a Prompts, vcs: &'a FakeVcs) -> CommandContext<'a> {
    CommandContext {
        gateway,
        prompts,
        vcs,
        formatter: None,
        code_path: "src",
        timeout: std::time::Duration::from_secs(30),
    }
}

fn issue(number: u64, title: &str, body: &str) -> Issue {
    Issue {
        id: 1000 + number,
        number,
        title: title.to_string(),
        body: body.to_string(),
        author: "alice".to_string(),
        repository: REPO.to_string(),
        comments: Vec::new(),
    }
}

fn settings(root: &Path) -> Settings {
    Settings {
        repositories: vec![REPO.to_string()],
        target_root: root.join("target"),
        state_dir: root.join("state"),
        do_quality_checks: false,
        loop_max_exceptions: 2,
        workers: 2,
        ..Default::default()
    }
}

fn build_pipeline(
    settings: Settings,
    provider: Arc<ScriptedProvider>,
    hosting: Arc<FakeHosting>,
    vcs: Arc<FakeVcs>,
) -> IssuePipeline {
    let store = Arc::new(FileStateStore::new(&settings.state_dir).unwrap());
    IssuePipeline::new(
        Arc::new(settings),
        Arc::new(Gateway::new(provider)),
        hosting,
        vcs,
        store,
    )
    .unwrap()
}

#[tokio::test]
async fn test_add_one_issue_is_published() {
    let tmp = tempfile::tempdir().unwrap();
    let add_one = issue(1, "Add add_one helper", "Create add_one in src/helpers.py");
    let hosting = Arc::new(FakeHosting::with_issues(vec![add_one.clone()]));
    let vcs = FakeVcs::new();
    let provider = ScriptedProvider::new(add_one_script);
    let pipeline = build_pipeline(settings(tmp.path()), provider, hosting.clone(), vcs.clone());

    let outcome = pipeline.process(&add_one).await.unwrap();
    assert_eq!(
        outcome,
        IssueOutcome::Published {
            pull_request: Some(1),
            draft: false
        }
    );

    let written = std::fs::read_to_string(
        tmp.path().join("target/issue-1001/widgets/src/helpers.py"),
    )
    .unwrap();
    assert!(written.contains("def add_one(x):"));

    let vcs_log = vcs.log.lock().unwrap();
    assert_eq!(
        vcs_log.commits,
        vec![(
            "Add add_one helper".to_string(),
            "Prompt: \"Create add_one in src/helpers.py\"".to_string()
        )]
    );
    assert_eq!(vcs_log.pushes, vec!["issue-1001".to_string()]);

    let hosting_log = hosting.log.lock().unwrap();
    let pr = &hosting_log.created[0];
    assert_eq!(pr.head, "issue-1001");
    assert_eq!(pr.base, "main");
    assert!(!pr.draft);
    assert_eq!(
        hosting_log.comments,
        vec![(1, "Opened pull request #1.".to_string())]
    );
}

#[tokio::test]
async fn test_add_one_applied_to_empty_file() {
    let tmp = tempfile::tempdir().unwrap();
    let provider = ScriptedProvider::new(|request| add_one_into("main.py", request));
    let gateway = Gateway::new(provider.clone());
    let prompts = Prompts::new().unwrap();
    let vcs = FakeVcs::new();
    let ctx = context(&gateway, &prompts, vcs.as_ref());
    let files: FileMap = [("main.py".to_string(), String::new())].into();

    let updated = apply_and_verify(
        "# Add helper\n\ncreate a function add_one that adds one to its input",
        &files,
        tmp.path(),
        &ctx,
        &LoopConfig::default(),
    )
    .await
    .unwrap();

    assert!(updated["main.py"].contains("def add_one(x):"));
    // Plan, write and decide in the change session, then one review verdict.
    assert_eq!(provider.calls(), 5);
}

#[tokio::test]
async fn test_add_one_evaluates_correctly() {
    let provider = ScriptedProvider::new(|request| add_one_into("main.py", request));
    let gateway = Gateway::new(provider);
    let prompts = Prompts::new().unwrap();
    let vcs = FakeVcs::new();
    let ctx = context(&gateway, &prompts, vcs.as_ref());
    let suite: EvalSuite = [(
        "create a function add_one that adds one to its input".to_string(),
        EvalCase {
            tests: vec![
                "add_one(3) == 4".to_string(),
                "add_one(-5) == -4".to_string(),
                "add_one(0) == 1".to_string(),
            ],
            file: None,
        },
    )]
    .into();

    let results = run_suite(
        &suite,
        &ctx,
        &LoopConfig::default(),
        std::time::Duration::from_secs(30),
    )
    .await;

    assert_eq!(results.len(), 1);
    assert!(results[0].success(), "{:?}", results[0]);
    assert_eq!(results[0].passed.len(), 3);
}

#[tokio::test]
async fn test_retry_ceiling_skips_without_work() {
    let tmp = tempfile::tempdir().unwrap();
    let broken = issue(1, "Impossible", "Cannot be done");
    let hosting = Arc::new(FakeHosting::with_issues(vec![broken.clone()]));
    let vcs = FakeVcs::new();
    let provider = ScriptedProvider::new(|_| {
        Err(LlmError::ApiError {
            code: 400,
            message: "bad request".to_string(),
        })
    });
    let mut config = settings(tmp.path());
    config.max_retries = 1;
    let pipeline = build_pipeline(config, provider.clone(), hosting, vcs.clone());

    assert!(pipeline.process(&broken).await.is_err());
    assert!(pipeline.process(&broken).await.is_err());
    let calls = provider.calls();
    assert_eq!(calls, 4);

    let outcome = pipeline.process(&broken).await.unwrap();
    assert_eq!(outcome, IssueOutcome::Skipped(SkipReason::RetryLimit));
    assert_eq!(provider.calls(), calls);
    assert_eq!(vcs.log.lock().unwrap().clones, 2);

    // Editing the issue resets the retry count.
    let edited = Issue {
        body: "Cannot be done, here is more detail".to_string(),
        ..broken
    };
    assert!(pipeline.process(&edited).await.is_err());
    assert!(provider.calls() > calls);
    assert_eq!(vcs.log.lock().unwrap().clones, 3);
}

#[tokio::test]
async fn test_failing_issue_does_not_affect_others() {
    let tmp = tempfile::tempdir().unwrap();
    let hosting = Arc::new(FakeHosting::with_issues(vec![
        issue(1, "Add add_one helper", "Create add_one in src/helpers.py"),
        issue(2, "Break everything", "This one always fails"),
    ]));
    let vcs = FakeVcs::new();
    let provider = ScriptedProvider::new(|request| {
        if request.messages[1].content.contains("Break everything") {
            return Err(LlmError::RequestFailed("connection reset".to_string()));
        }
        add_one_script(request)
    });
    let pipeline = build_pipeline(settings(tmp.path()), provider, hosting.clone(), vcs.clone());
    let scheduler = Scheduler::new(Arc::new(pipeline));

    let report = scheduler.run_repository(REPO).await.unwrap();

    assert_eq!(report.outcomes.len(), 1);
    assert_eq!(report.outcomes[0].0, 1);
    assert!(matches!(
        report.outcomes[0].1,
        IssueOutcome::Published { draft: false, .. }
    ));
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].number, 2);
    assert_eq!(hosting.log.lock().unwrap().created.len(), 1);
}

#[tokio::test]
async fn test_dry_run_does_not_publish_or_merge() {
    let tmp = tempfile::tempdir().unwrap();
    let hosting = Arc::new(FakeHosting {
        approved: vec![PullRequest {
            number: 9,
            title: "Old change".to_string(),
            head: "issue-9".to_string(),
        }],
        ..FakeHosting::with_issues(vec![issue(
            1,
            "Add add_one helper",
            "Create add_one in src/helpers.py",
        )])
    });
    let vcs = FakeVcs::new();
    let provider = ScriptedProvider::new(add_one_script);
    let pipeline = build_pipeline(settings(tmp.path()), provider, hosting.clone(), vcs.clone())
        .with_dry_run(true);
    let scheduler = Scheduler::new(Arc::new(pipeline));

    let report = scheduler.run_repository(REPO).await.unwrap();

    assert_eq!(report.outcomes, vec![(1, IssueOutcome::DryRun { draft: false })]);
    assert!(report.merges.merged.is_empty());
    let hosting_log = hosting.log.lock().unwrap();
    assert!(hosting_log.merge_attempts.is_empty());
    assert!(hosting_log.created.is_empty());
    let vcs_log = vcs.log.lock().unwrap();
    assert!(vcs_log.commits.is_empty());
    assert!(vcs_log.pushes.is_empty());
}

#[tokio::test]
async fn test_merge_prepass_ends_cycle() {
    let tmp = tempfile::tempdir().unwrap();
    let hosting = Arc::new(FakeHosting {
        approved: vec![
            PullRequest {
                number: 10,
                title: "Add add_one helper".to_string(),
                head: "issue-1001".to_string(),
            },
            PullRequest {
                number: 11,
                title: "Conflicting change".to_string(),
                head: "issue-1002".to_string(),
            },
        ],
        conflicting: HashSet::from([11]),
        ..FakeHosting::with_issues(vec![issue(
            1,
            "Add add_one helper",
            "Create add_one in src/helpers.py",
        )])
    });
    let provider = ScriptedProvider::new(add_one_script);
    let vcs = FakeVcs::new();
    let mut config = settings(tmp.path());
    config.local_checkout = Some(tmp.path().to_path_buf());
    let pipeline = build_pipeline(config, provider.clone(), hosting.clone(), vcs.clone());
    let scheduler = Scheduler::new(Arc::new(pipeline));

    let report = scheduler.run_repository(REPO).await.unwrap();

    assert_eq!(vcs.log.lock().unwrap().fetches, 1);
    assert_eq!(report.merges.merged, vec![10]);
    assert_eq!(report.merges.skipped.len(), 1);
    assert_eq!(report.merges.skipped[0].0, 11);
    assert!(report.stopped_after_merge);
    assert!(report.outcomes.is_empty());
    assert_eq!(provider.calls(), 0);

    let hosting_log = hosting.log.lock().unwrap();
    // Conflicts are not retried.
    assert_eq!(hosting_log.merge_attempts, vec![10, 11]);
    assert_eq!(hosting_log.closed, vec!["Add add_one helper".to_string()]);
}

#[tokio::test]
async fn test_unauthorized_and_blocked_issues_are_not_processed() {
    let tmp = tempfile::tempdir().unwrap();
    let mut stranger = issue(1, "Delete the repo", "rm -rf");
    stranger.author = "mallory".to_string();
    let hosting = Arc::new(FakeHosting::with_issues(vec![
        stranger,
        issue(2, "Follow-up", "Do this after #1 lands"),
    ]));
    let provider = ScriptedProvider::new(add_one_script);
    let mut config = settings(tmp.path());
    config.admin_users = vec!["alice".to_string()];
    let pipeline = build_pipeline(config, provider.clone(), hosting, FakeVcs::new())
        .with_dry_run(true);
    let scheduler = Scheduler::new(Arc::new(pipeline));

    let report = scheduler.run_repository(REPO).await.unwrap();

    assert_eq!(report.blocked, vec![2]);
    assert_eq!(
        report.outcomes,
        vec![(1, IssueOutcome::Skipped(SkipReason::Unauthorized))]
    );
    assert_eq!(provider.calls(), 0);
}

#[tokio::test]
async fn test_quality_failure_publishes_draft() {
    let tmp = tempfile::tempdir().unwrap();
    let add_one = issue(1, "Add add_one helper", "Create add_one in src/helpers.py");
    let hosting = Arc::new(FakeHosting::with_issues(vec![add_one.clone()]));
    let provider = ScriptedProvider::new(add_one_script);
    let mut config = settings(tmp.path());
    config.do_quality_checks = true;
    let pipeline = build_pipeline(config, provider, hosting.clone(), FakeVcs::new())
        .with_checks(vec![Arc::new(FailingCheck)]);

    let outcome = pipeline.process(&add_one).await.unwrap();
    assert_eq!(
        outcome,
        IssueOutcome::Published {
            pull_request: Some(1),
            draft: true
        }
    );

    let hosting_log = hosting.log.lock().unwrap();
    let pr = &hosting_log.created[0];
    assert!(pr.draft);
    assert!(pr.body.contains("missing docstring"));
}

#[tokio::test]
async fn test_persistent_cache_replays_across_gateways() {
    let tmp = tempfile::tempdir().unwrap();
    let provider = ScriptedProvider::new(|_| Ok(Message::assistant("cached answer")));
    let request = CompletionRequest::new("Summarize the repo", "Be brief.");

    let first = Gateway::new(provider.clone())
        .with_cache(Arc::new(ResponseCache::persistent(tmp.path()).unwrap()));
    let a = first.complete(&request).await.unwrap();
    let b = first.complete(&request).await.unwrap();
    assert_eq!(a, b);
    assert_eq!(provider.calls(), 1);

    let second = Gateway::new(provider.clone())
        .with_cache(Arc::new(ResponseCache::persistent(tmp.path()).unwrap()));
    let c = second.complete(&request).await.unwrap();
    assert_eq!(a, c);
    assert_eq!(provider.calls(), 1);
}

#[tokio::test]
async fn test_quality_fix_clears_findings() {
    let tmp = tempfile::tempdir().unwrap();
    let add_one = issue(1, "Add add_one helper", "Create add_one in src/helpers.py");
    let hosting = Arc::new(FakeHosting::with_issues(vec![add_one.clone()]));
    let provider = ScriptedProvider::new(add_one_script);
    let check = FlakyCheck::new(1);
    let mut config = settings(tmp.path());
    config.do_quality_checks = true;
    config.quality_retries = 1;
    let pipeline = build_pipeline(config, provider, hosting.clone(), FakeVcs::new())
        .with_checks(vec![check.clone() as Arc<dyn QualityCheck>]);

    let outcome = pipeline.process(&add_one).await.unwrap();
    assert_eq!(
        outcome,
        IssueOutcome::Published {
            pull_request: Some(1),
            draft: false
        }
    );
    assert_eq!(check.runs.load(Ordering::SeqCst), 2);
    let hosting_log = hosting.log.lock().unwrap();
    assert!(!hosting_log.created[0].draft);
    assert!(!hosting_log.created[0].body.contains("missing docstring"));
}

#[tokio::test]
async fn test_failed_quality_fix_publishes_draft() {
    let tmp = tempfile::tempdir().unwrap();
    let add_one = issue(1, "Add add_one helper", "Create add_one in src/helpers.py");
    let hosting = Arc::new(FakeHosting::with_issues(vec![add_one.clone()]));
    let fix_requests = Arc::new(AtomicUsize::new(0));
    let seen = fix_requests.clone();
    let provider = ScriptedProvider::new(move |request| {
        if request.messages[1].content.contains("missing docstring") {
            seen.fetch_add(1, Ordering::SeqCst);
            return Ok(verdict(false));
        }
        add_one_script(request)
    });
    let check = FlakyCheck::new(usize::MAX);
    let mut config = settings(tmp.path());
    config.do_quality_checks = true;
    config.quality_retries = 2;
    let pipeline = build_pipeline(config, provider, hosting.clone(), FakeVcs::new())
        .with_checks(vec![check.clone() as Arc<dyn QualityCheck>]);

    let outcome = pipeline.process(&add_one).await.unwrap();
    assert_eq!(
        outcome,
        IssueOutcome::Published {
            pull_request: Some(1),
            draft: true
        }
    );
    // A rejected fix ends the gate instead of spending the remaining retries.
    assert_eq!(fix_requests.load(Ordering::SeqCst), 1);
    assert_eq!(check.runs.load(Ordering::SeqCst), 1);
    assert!(hosting.log.lock().unwrap().created[0].draft);
}

#[tokio::test]
async fn test_change_session_replays_from_persistent_cache() {
    let tmp = tempfile::tempdir().unwrap();
    let cache_dir = tmp.path().join("cache");
    let work = tmp.path().join("work");
    std::fs::create_dir_all(&work).unwrap();
    let provider = ScriptedProvider::new(|request| add_one_into("main.py", request));
    let prompts = Prompts::new().unwrap();
    let vcs = FakeVcs::new();
    let files: FileMap = [("main.py".to_string(), String::new())].into();

    let mut results = Vec::new();
    let mut calls = Vec::new();
    for _ in 0..2 {
        let gateway = Gateway::new(provider.clone())
            .with_cache(Arc::new(ResponseCache::persistent(cache_dir.clone()).unwrap()));
        let ctx = context(&gateway, &prompts, vcs.as_ref());
        let updated = apply_prompt("create add_one", &files, &work, &ctx, &LoopConfig::default())
            .await
            .unwrap();
        results.push(updated);
        calls.push(provider.calls());
    }

    assert!(results[0]["main.py"].contains("def add_one(x):"));
    assert_eq!(results[0], results[1]);
    assert!(calls[0] > 0);
    assert_eq!(calls[1], calls[0]);
}

#[tokio::test]
async fn test_terminal_keeps_hidden_and_large_tracked_files() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path();
    let big = "0".repeat(600 * 1024);
    std::fs::create_dir_all(dir.join(".github/workflows")).unwrap();
    std::fs::create_dir_all(dir.join("src")).unwrap();
    std::fs::write(dir.join(".github/workflows/ci.yml"), "on: push\n").unwrap();
    std::fs::write(dir.join("src/a.py"), "a = 1\n").unwrap();
    std::fs::write(dir.join("data.json"), &big).unwrap();
    let original: FileMap = [
        (".github/workflows/ci.yml".to_string(), "on: push\n".to_string()),
        ("data.json".to_string(), big.clone()),
        ("src/a.py".to_string(), "a = 1\n".to_string()),
    ]
    .into();

    let gateway = Gateway::new(ScriptedProvider::new(|_| Ok(verdict(true))));
    let prompts = Prompts::new().unwrap();
    let vcs = FakeVcs::new();
    let ctx = context(&gateway, &prompts, vcs.as_ref());
    let mut state = SessionState::new(original.clone(), dir);

    let output = Command::Terminal {
        command: "ls".to_string(),
    }
    .execute(&mut state, &ctx)
    .await
    .unwrap();
    assert!(output.starts_with("Exit code: 0"));
    assert_eq!(state.files, original);

    sync_to_disk(dir, &original, &state.files).await.unwrap();
    assert!(dir.join(".github/workflows/ci.yml").exists());
    assert!(dir.join("data.json").exists());

    // Files created or removed by the shell are still picked up.
    Command::Terminal {
        command: "rm src/a.py && echo b > src/b.py".to_string(),
    }
    .execute(&mut state, &ctx)
    .await
    .unwrap();
    assert_eq!(
        state.files.keys().collect::<Vec<_>>(),
        vec![".github/workflows/ci.yml", "data.json", "src/b.py"]
    );
    assert_eq!(state.files["src/b.py"], "b\n");
}

#[tokio::test]
async fn test_install_package_requires_names() {
    let tmp = tempfile::tempdir().unwrap();
    let gateway = Gateway::new(ScriptedProvider::new(|_| Ok(verdict(true))));
    let prompts = Prompts::new().unwrap();
    let vcs = FakeVcs::new();
    let ctx = context(&gateway, &prompts, vcs.as_ref());
    let files: FileMap = [("main.py".to_string(), "x = 1\n".to_string())].into();
    let mut state = SessionState::new(files.clone(), tmp.path());

    let err = Command::InstallPackage { names: Vec::new() }
        .execute(&mut state, &ctx)
        .await
        .unwrap_err();
    assert!(matches!(err, CommandError::MalformedArguments { .. }));
    assert_eq!(state.files, files);
    assert!(!tmp.path().join("main.py").exists());
}
