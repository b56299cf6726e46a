//! Quality gate: external checks with bounded automatic fixes.

use std::sync::Arc;
use tracing::{info, warn};

use super::apply::apply_prompt;
use super::diff::sync_to_disk;
use super::workspace::Workspace;
use crate::checks::{run_checks, QualityCheck};
use crate::command_loop::LoopConfig;
use crate::commands::CommandContext;
use crate::error::PipelineError;
use crate::vcs::VersionControl;

/// Run `checks` and, while findings remain, ask the agent to fix them up to
/// `retries` times.
///
/// Exhausting the retries yields the soft [`PipelineError::Quality`].
pub async fn quality_gate(
    workspace: &Workspace,
    checks: &[Arc<dyn QualityCheck>],
    retries: usize,
    vcs: &dyn VersionControl,
    ctx: &CommandContext<'_>,
    config: &LoopConfig,
) -> Result<(), PipelineError> {
    let mut attempt = 0;
    loop {
        let Some(findings) = run_checks(checks, workspace.dir()).await else {
            info!(attempt, "Quality checks passed");
            return Ok(());
        };

        if attempt >= retries {
            return Err(PipelineError::Quality {
                attempts: attempt + 1,
                findings,
            });
        }
        attempt += 1;
        warn!(attempt, retries, "Quality checks failed, attempting a fix");

        let objective = ctx.prompts.quality_fix(&findings)?;
        let before = workspace.snapshot(vcs).await?;
        match apply_prompt(&objective, &before, workspace.dir(), ctx, config).await {
            Ok(after) => sync_to_disk(workspace.dir(), &before, &after).await?,
            Err(e) => {
                warn!(error = %e, "Fix attempt failed");
                return Err(PipelineError::Quality {
                    attempts: attempt,
                    findings,
                });
            }
        }
    }
}
