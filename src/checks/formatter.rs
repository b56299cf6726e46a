//! Source formatting applied to rewritten files.

use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;

use crate::error::CheckError;
use crate::shell::{run_program, ProcessFailure};

#[async_trait]
pub trait Formatter: Send + Sync {
    /// Whether this formatter handles `path`.
    fn applies_to(&self, path: &str) -> bool;

    async fn format(&self, source: &str) -> Result<String, CheckError>;
}

/// Formats Python through `black`, reading from stdin.
#[derive(Debug, Clone)]
pub struct BlackFormatter {
    timeout: Duration,
}

impl Default for BlackFormatter {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
        }
    }
}

#[async_trait]
impl Formatter for BlackFormatter {
    fn applies_to(&self, path: &str) -> bool {
        path.ends_with(".py")
    }

    async fn format(&self, source: &str) -> Result<String, CheckError> {
        let args = vec!["--quiet".to_string(), "-".to_string()];
        let output = run_program("black", &args, Path::new("."), Some(source), self.timeout)
            .await
            .map_err(|failure| match failure {
                ProcessFailure::Spawn(e) => CheckError::Unavailable {
                    tool: "black".to_string(),
                    reason: e.to_string(),
                },
                ProcessFailure::TimedOut => CheckError::Timeout {
                    tool: "black".to_string(),
                    seconds: self.timeout.as_secs(),
                },
            })?;

        if !output.success() {
            return Err(CheckError::Failed {
                tool: "black".to_string(),
                output: output.combined(),
            });
        }
        Ok(output.stdout)
    }
}
