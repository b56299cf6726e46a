//! Evaluation suites: prompts applied to an empty file and checked with
//! Python assertions.
//!
//! A suite directory holds `prompts.yaml`:
//!
//! ```yaml
//! "create a function add_one that adds one to its input":
//!   file: helpers.py
//!   tests:
//!     - "add_one(3) == 4"
//!     - "add_one(-5) == -4"
//! ```

use anyhow::Context;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

use crate::command_loop::LoopConfig;
use crate::commands::namespace::path_to_namespace;
use crate::commands::CommandContext;
use crate::pipeline::{apply_and_verify, sync_to_disk};
use crate::session::FileMap;
use crate::shell::run_program;

const DEFAULT_FILE: &str = "main.py";

/// Expectations for one prompt.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EvalCase {
    /// Python expressions that must evaluate truthy.
    pub tests: Vec<String>,
    /// File the prompt is applied to.
    #[serde(default)]
    pub file: Option<String>,
}

impl EvalCase {
    pub fn file(&self) -> &str {
        self.file.as_deref().unwrap_or(DEFAULT_FILE)
    }
}

/// Prompt text to its expectations.
pub type EvalSuite = BTreeMap<String, EvalCase>;

/// Result of one prompt.
#[derive(Debug, Clone, Default)]
pub struct EvalResult {
    pub prompt: String,
    pub passed: Vec<String>,
    /// Failed expressions with their error output.
    pub failed: Vec<(String, String)>,
    /// Set when the prompt could not be applied at all.
    pub error: Option<String>,
}

impl EvalResult {
    pub fn success(&self) -> bool {
        self.error.is_none() && self.failed.is_empty()
    }
}

pub fn load_suite(dir: &Path) -> anyhow::Result<EvalSuite> {
    let path = dir.join("prompts.yaml");
    let text = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_yaml::from_str(&text).with_context(|| format!("invalid suite {}", path.display()))
}

/// Run every case of `suite` in its own temporary directory.
pub async fn run_suite(
    suite: &EvalSuite,
    ctx: &CommandContext<'_>,
    config: &LoopConfig,
    timeout: Duration,
) -> Vec<EvalResult> {
    let mut results = Vec::new();
    for (prompt, case) in suite {
        let result = match run_case(prompt, case, ctx, config, timeout).await {
            Ok(result) => result,
            Err(e) => EvalResult {
                prompt: prompt.clone(),
                error: Some(format!("{:#}", e)),
                ..Default::default()
            },
        };
        if result.success() {
            info!(prompt = %prompt, tests = result.passed.len(), "Eval passed");
        } else {
            warn!(prompt = %prompt, failed = result.failed.len(), error = ?result.error, "Eval failed");
        }
        results.push(result);
    }
    results
}

async fn run_case(
    prompt: &str,
    case: &EvalCase,
    ctx: &CommandContext<'_>,
    config: &LoopConfig,
    timeout: Duration,
) -> anyhow::Result<EvalResult> {
    let tmp = tempfile::tempdir()?;
    let file = case.file();
    let files: FileMap = [(file.to_string(), String::new())].into();
    sync_to_disk(tmp.path(), &FileMap::new(), &files).await?;

    let updated = apply_and_verify(prompt, &files, tmp.path(), ctx, config).await?;
    sync_to_disk(tmp.path(), &files, &updated).await?;

    let module = path_to_namespace(file, "");
    let mut result = EvalResult {
        prompt: prompt.to_string(),
        ..Default::default()
    };
    for test in &case.tests {
        match evaluate(tmp.path(), &module, test, timeout).await {
            Ok(()) => result.passed.push(test.clone()),
            Err(output) => result.failed.push((test.clone(), output)),
        }
    }
    Ok(result)
}

/// Assert `expression` with everything from `module` imported.
async fn evaluate(dir: &Path, module: &str, expression: &str, timeout: Duration) -> Result<(), String> {
    let script = format!("from {} import *\nassert ({})", module, expression);
    let args = vec!["-c".to_string(), script];
    match run_program("python3", &args, dir, None, timeout).await {
        Ok(output) if output.success() => Ok(()),
        Ok(output) => Err(output.combined()),
        Err(e) => Err(format!("{:?}", e)),
    }
}

/// One line per case plus a total.
pub fn summarize(results: &[EvalResult]) -> String {
    let mut lines: Vec<String> = results
        .iter()
        .map(|r| {
            let status = if r.success() { "PASS" } else { "FAIL" };
            format!(
                "[{}] {} ({}/{} tests)",
                status,
                r.prompt,
                r.passed.len(),
                r.passed.len() + r.failed.len()
            )
        })
        .collect();
    let passed = results.iter().filter(|r| r.success()).count();
    lines.push(format!("{}/{} evals passed", passed, results.len()));
    lines.join("\n")
}
