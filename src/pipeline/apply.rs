//! Applying an objective to a file mapping and verifying the result.

use std::path::Path;
use tracing::{debug, info};

use super::diff::{filter_changed, render_files};
use crate::command_loop::{run_command_loop, LoopConfig, LoopOutcome};
use crate::commands::{Command, CommandContext, CHECK_COMMANDS, GENERATE_COMMANDS};
use crate::error::PipelineError;
use crate::prompts::{CHECK_SYSTEM_PROMPT, COMMAND_SYSTEM_PROMPT};
use crate::session::{FileMap, SessionState};

/// Run a change-application session and return the resulting files.
///
/// A negative verdict from the session itself fails the attempt.
pub async fn apply_prompt(
    objective: &str,
    files: &FileMap,
    dir: &Path,
    ctx: &CommandContext<'_>,
    config: &LoopConfig,
) -> Result<FileMap, PipelineError> {
    let names: Vec<&str> = files.keys().map(String::as_str).collect();
    let prompt = ctx.prompts.generate(objective, &names)?;

    let mut state = SessionState::new(files.clone(), dir);
    let outcome = run_command_loop(
        &prompt,
        COMMAND_SYSTEM_PROMPT,
        GENERATE_COMMANDS,
        &mut state,
        ctx,
        config,
    )
    .await?;

    match outcome {
        LoopOutcome::Terminal(Command::Verdict {
            passed: false,
            reasoning,
        }) => Err(PipelineError::NegativeVerdict { reasoning }),
        LoopOutcome::Terminal(command) => {
            debug!(command = command.name(), "Change session finished");
            Ok(state.files)
        }
        LoopOutcome::Text(text) => {
            debug!(chars = text.len(), "Change session ended with text");
            Ok(state.files)
        }
    }
}

/// Ask a reviewer session whether the change between `old` and `new`
/// achieves `objective`. Returns the reviewer's reasoning on approval.
pub async fn verify_change(
    old: &FileMap,
    new: &FileMap,
    objective: &str,
    dir: &Path,
    ctx: &CommandContext<'_>,
    config: &LoopConfig,
) -> Result<String, PipelineError> {
    let (old_changed, new_changed) = filter_changed(old, new);
    if old_changed.is_empty() && new_changed.is_empty() {
        return Err(PipelineError::NegativeVerdict {
            reasoning: "No files were changed.".to_string(),
        });
    }

    let prompt = ctx.prompts.check(
        &render_files(&old_changed),
        &render_files(&new_changed),
        objective,
    )?;
    let mut state = SessionState::new(new.clone(), dir);
    let outcome = run_command_loop(
        &prompt,
        CHECK_SYSTEM_PROMPT,
        CHECK_COMMANDS,
        &mut state,
        ctx,
        config,
    )
    .await?;

    match outcome {
        LoopOutcome::Terminal(Command::Verdict {
            passed: true,
            reasoning,
        }) => {
            info!(files = new_changed.len() + old_changed.len(), "Change verified");
            Ok(reasoning)
        }
        LoopOutcome::Terminal(Command::Verdict { reasoning, .. }) | LoopOutcome::Text(reasoning) => {
            Err(PipelineError::NegativeVerdict { reasoning })
        }
        LoopOutcome::Terminal(other) => Err(PipelineError::NegativeVerdict {
            reasoning: format!("Review ended without a verdict: {}", other),
        }),
    }
}

/// Apply `objective` and verify the result in one step.
pub async fn apply_and_verify(
    objective: &str,
    files: &FileMap,
    dir: &Path,
    ctx: &CommandContext<'_>,
    config: &LoopConfig,
) -> Result<FileMap, PipelineError> {
    let new = apply_prompt(objective, files, dir, ctx, config).await?;
    verify_change(files, &new, objective, dir, ctx, config).await?;
    Ok(new)
}
