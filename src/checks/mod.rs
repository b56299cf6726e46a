//! Static-analysis, test-runner and formatter collaborators.
//!
//! Each check runs an external tool against a working copy and reports
//! `None` when clean or the tool's findings otherwise.

mod formatter;

pub use formatter::{BlackFormatter, Formatter};

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::Settings;
use crate::error::CheckError;
use crate::shell::{run_program, ProcessFailure};

/// A check run against a working copy.
#[async_trait]
pub trait QualityCheck: Send + Sync {
    fn name(&self) -> &str;

    /// `None` when clean, the findings otherwise.
    async fn run(&self, dir: &Path) -> Result<Option<String>, CheckError>;
}

/// A check implemented by an external program.
#[derive(Debug, Clone)]
pub struct ProcessCheck {
    name: String,
    program: String,
    args: Vec<String>,
    /// Exit codes other than zero that still mean "clean".
    clean_exit_codes: Vec<i32>,
    timeout: Duration,
}

impl ProcessCheck {
    pub fn new(name: impl Into<String>, program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args,
            clean_exit_codes: Vec::new(),
            timeout: Duration::from_secs(300),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_clean_exit_code(mut self, code: i32) -> Self {
        self.clean_exit_codes.push(code);
        self
    }

    /// Errors only; refactor, convention and (unless `warnings`) warning messages are disabled.
    pub fn pylint(code_path: &str, warnings: bool) -> Self {
        let disable = if warnings { "--disable=R,C" } else { "--disable=R,C,W" };
        Self::new(
            "pylint",
            "pylint",
            vec![disable.to_string(), code_path.to_string()],
        )
    }

    /// Exit code 5 means no tests were collected, which is not a failure.
    pub fn pytest(code_path: &str) -> Self {
        Self::new("pytest", "pytest", vec![code_path.to_string(), "-rf".to_string()])
            .with_clean_exit_code(5)
    }

}

#[async_trait]
impl QualityCheck for ProcessCheck {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, dir: &Path) -> Result<Option<String>, CheckError> {
        let output = run_program(&self.program, &self.args, dir, None, self.timeout)
            .await
            .map_err(|failure| match failure {
                ProcessFailure::Spawn(e) => CheckError::Unavailable {
                    tool: self.name.clone(),
                    reason: e.to_string(),
                },
                ProcessFailure::TimedOut => CheckError::Timeout {
                    tool: self.name.clone(),
                    seconds: self.timeout.as_secs(),
                },
            })?;

        if output.success() || self.clean_exit_codes.contains(&output.exit_code) {
            debug!(check = %self.name, "Check passed");
            return Ok(None);
        }

        debug!(check = %self.name, exit_code = output.exit_code, "Check reported findings");
        Ok(Some(output.combined()))
    }
}

/// Default checks for a Python project: pylint, then pytest.
pub fn default_checks(settings: &Settings) -> Vec<Arc<dyn QualityCheck>> {
    let timeout = settings.command_timeout();
    vec![
        Arc::new(ProcessCheck::pylint(&settings.code_path, false).with_timeout(timeout)),
        Arc::new(ProcessCheck::pytest(&settings.code_path).with_timeout(timeout)),
    ]
}

/// Run every check and join the findings.
///
/// A tool that is not installed is skipped with a warning; timeouts count as
/// findings so the fix loop sees them.
pub async fn run_checks(checks: &[Arc<dyn QualityCheck>], dir: &Path) -> Option<String> {
    let mut findings = Vec::new();

    for check in checks {
        match check.run(dir).await {
            Ok(None) => {}
            Ok(Some(output)) => findings.push(format!("### {} ###\n{}", check.name(), output)),
            Err(CheckError::Unavailable { tool, reason }) => {
                warn!(check = %tool, reason = %reason, "Skipping unavailable check");
            }
            Err(err) => findings.push(format!("### {} ###\n{}", check.name(), err)),
        }
    }

    if findings.is_empty() {
        None
    } else {
        Some(findings.join("\n"))
    }
}
