//! CLI command definitions for issue-forge.
//!
//! Three run modes share one settings file:
//! `run` processes open issues, `evals` scores prompts against Python
//! assertions, and `report` counts agent versus human commits.

use anyhow::Context;
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::checks::{default_checks, BlackFormatter};
use crate::command_loop::LoopConfig;
use crate::commands::CommandContext;
use crate::config::Settings;
use crate::evals::{load_suite, run_suite, summarize};
use crate::hosting::GitHubClient;
use crate::llm::{Gateway, OpenAiClient, ResponseCache};
use crate::metrics;
use crate::pipeline::IssuePipeline;
use crate::prompts::Prompts;
use crate::report::{commit_statistics, parse_date};
use crate::scheduler::{ScheduleReport, Scheduler};
use crate::store::FileStateStore;
use crate::vcs::Git;

/// Settings file read when `--config` is not given and the file exists.
const DEFAULT_CONFIG_FILE: &str = "issue-forge.yaml";

/// Turn open repository issues into reviewed pull requests.
#[derive(Parser)]
#[command(name = "issue-forge")]
#[command(about = "Turn open repository issues into pull requests with an LLM command loop")]
#[command(version)]
#[command(
    long_about = "issue-forge reads open issues from the configured repositories, lets an LLM edit a fresh clone through a fixed set of commands, reviews the diff, runs quality checks and opens a pull request.\n\nSecrets come from OPENAI_API_KEY and GITHUB_API_KEY.\n\nExample usage:\n  issue-forge run --repo acme/widgets --dry-run"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// YAML settings file.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Merge approved pull requests and process open issues, one cycle.
    Run(RunArgs),

    /// Apply each prompt of an evaluation directory and check the result.
    #[command(alias = "eval")]
    Evals(EvalsArgs),

    /// Count agent and human commits in a local checkout.
    Report(ReportArgs),
}

/// Arguments for `issue-forge run`.
#[derive(Parser, Debug, Default)]
pub struct RunArgs {
    /// Do everything except merging, fetching and publishing.
    #[arg(long)]
    pub dry_run: bool,

    /// Only process the issue with this number.
    #[arg(long)]
    pub issue: Option<u64>,

    /// Repository as owner/name. Repeatable; replaces the configured list.
    #[arg(long = "repo")]
    pub repositories: Vec<String>,

    /// Number of issues processed concurrently.
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Model for the command loops.
    #[arg(short, long)]
    pub model: Option<String>,

    /// Memoize LLM completions on disk.
    #[arg(long)]
    pub use_cache: bool,
}

/// Arguments for `issue-forge evals`.
#[derive(Parser, Debug)]
pub struct EvalsArgs {
    /// Directory containing prompts.yaml.
    pub dir: PathBuf,

    /// Memoize LLM completions on disk.
    #[arg(long)]
    pub use_cache: bool,
}

/// Arguments for `issue-forge report`.
#[derive(Parser, Debug)]
pub struct ReportArgs {
    /// First day of the range (YYYY-MM-DD).
    #[arg(long)]
    pub since: String,

    /// Last day of the range (YYYY-MM-DD).
    #[arg(long)]
    pub until: Option<String>,

    /// Repository checkout to inspect.
    #[arg(long, default_value = ".")]
    pub repo_dir: PathBuf,
}

/// Parse CLI arguments and return the Cli struct.
///
/// This allows main.rs to access CLI arguments (like log_level) before running commands.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    let settings = load_settings(cli.config.as_deref())?;
    if let Err(e) = metrics::init_metrics() {
        warn!(error = %e, "Failed to register metrics");
    }

    match cli.command {
        Commands::Run(args) => run_command(settings, args).await,
        Commands::Evals(args) => evals_command(settings, args).await,
        Commands::Report(args) => report_command(settings, args).await,
    }
}

/// Settings from `path`, from the default file when present, or defaults.
pub fn load_settings(path: Option<&Path>) -> anyhow::Result<Settings> {
    match path {
        Some(path) => Settings::from_yaml_file(path)
            .with_context(|| format!("failed to load settings from {}", path.display())),
        None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
            Settings::from_yaml_file(Path::new(DEFAULT_CONFIG_FILE))
                .with_context(|| format!("failed to load settings from {}", DEFAULT_CONFIG_FILE))
        }
        None => Ok(Settings::default()),
    }
}

/// Apply `run` flags on top of loaded settings.
pub fn apply_run_overrides(mut settings: Settings, args: &RunArgs) -> Settings {
    if !args.repositories.is_empty() {
        settings.repositories = args.repositories.clone();
    }
    if let Some(workers) = args.workers {
        settings.workers = workers.max(1);
    }
    if let Some(model) = &args.model {
        settings.model = model.clone();
    }
    settings.use_cache |= args.use_cache;
    settings
}

fn build_gateway(settings: &Settings) -> anyhow::Result<Gateway> {
    let client = OpenAiClient::from_env(&settings.api_base)
        .context("failed to initialize LLM client, set OPENAI_API_KEY")?;
    let mut gateway = Gateway::from_settings(Arc::new(client), settings)?;
    if settings.use_cache {
        let cache = ResponseCache::persistent(&settings.cache_dir).with_context(|| {
            format!("failed to open cache at {}", settings.cache_dir.display())
        })?;
        info!(dir = %settings.cache_dir.display(), "Using persistent completion cache");
        gateway = gateway.with_cache(Arc::new(cache));
    }
    Ok(gateway)
}

async fn run_command(settings: Settings, args: RunArgs) -> anyhow::Result<()> {
    let settings = Arc::new(apply_run_overrides(settings, &args));
    if settings.repositories.is_empty() {
        anyhow::bail!("no repositories configured, pass --repo or set repositories in the config");
    }

    let gateway = Arc::new(build_gateway(&settings)?);
    let hosting = Arc::new(
        GitHubClient::from_env(&settings.github_api_base)
            .context("failed to initialize GitHub client, set GITHUB_API_KEY")?,
    );
    let vcs = Arc::new(
        Git::new()
            .with_token(std::env::var("GITHUB_API_KEY").ok())
            .with_identity("issue-forge", &settings.agent_email),
    );
    let store = Arc::new(FileStateStore::new(&settings.state_dir)?);

    let pipeline = IssuePipeline::new(settings.clone(), gateway, hosting, vcs, store)?
        .with_checks(default_checks(&settings))
        .with_formatter(Arc::new(BlackFormatter::default()))
        .with_dry_run(args.dry_run);

    info!(
        repositories = settings.repositories.len(),
        workers = settings.workers,
        dry_run = args.dry_run,
        "Starting cycle"
    );
    let scheduler = Scheduler::new(Arc::new(pipeline)).with_issue_filter(args.issue);
    let reports = scheduler.run().await;

    for report in &reports {
        println!("{}", render_report(report));
    }
    println!("{}", metrics_summary());

    let failed: usize = reports.iter().map(|r| r.failures.len()).sum();
    if failed > 0 && (args.issue.is_some() || args.dry_run) {
        anyhow::bail!("{} issue(s) failed", failed);
    }
    Ok(())
}

/// Metric samples recorded in this process, without help text or histogram buckets.
pub fn metrics_summary() -> String {
    let exported = metrics::export_metrics();
    let samples: Vec<&str> = exported
        .lines()
        .filter(|line| !line.starts_with('#') && !line.contains("_bucket{"))
        .collect();
    format!("== metrics ==\n{}", samples.join("\n"))
}

/// Human-readable summary of one repository cycle.
pub fn render_report(report: &ScheduleReport) -> String {
    let mut lines = vec![format!("== {} ==", report.repository)];
    for number in &report.merges.merged {
        lines.push(format!("  merged PR #{}", number));
    }
    for (number, reason) in &report.merges.skipped {
        lines.push(format!("  skipped PR #{}: {}", number, reason));
    }
    if report.stopped_after_merge {
        lines.push("  cycle ended after merging".to_string());
    }
    for number in &report.blocked {
        lines.push(format!("  #{} blocked by another open issue", number));
    }
    for (number, outcome) in &report.outcomes {
        lines.push(format!("  #{} {:?}", number, outcome));
    }
    for failure in &report.failures {
        lines.push(format!("  #{} failed: {}", failure.number, failure.error));
    }
    lines.join("\n")
}

async fn evals_command(mut settings: Settings, args: EvalsArgs) -> anyhow::Result<()> {
    settings.use_cache |= args.use_cache;
    let suite = load_suite(&args.dir)?;
    info!(dir = %args.dir.display(), cases = suite.len(), "Running evals");

    let gateway = build_gateway(&settings)?;
    let prompts = Prompts::new()?;
    let vcs = Git::new();
    let formatter = BlackFormatter::default();
    let ctx = CommandContext {
        gateway: &gateway,
        prompts: &prompts,
        vcs: &vcs,
        formatter: Some(&formatter),
        code_path: &settings.code_path,
        timeout: settings.command_timeout(),
    };
    let config = LoopConfig::from_settings(&settings);

    let results = run_suite(&suite, &ctx, &config, settings.command_timeout()).await;
    println!("{}", summarize(&results));

    let failed = results.iter().filter(|r| !r.success()).count();
    if failed > 0 {
        anyhow::bail!("{} eval(s) failed", failed);
    }
    Ok(())
}

async fn report_command(settings: Settings, args: ReportArgs) -> anyhow::Result<()> {
    let since = parse_date(&args.since).with_context(|| format!("invalid --since {}", args.since))?;
    let until = args
        .until
        .as_deref()
        .map(|u| parse_date(u).with_context(|| format!("invalid --until {}", u)))
        .transpose()?;

    let stats = commit_statistics(
        &Git::new(),
        &args.repo_dir,
        since,
        until,
        &settings.agent_email,
    )
    .await?;

    println!("{}", stats);
    Ok(())
}
