//! Commands that run outside the overlay: shell, pip and git.
//!
//! Each flushes the overlay to disk first, so the process sees the session's
//! edits. Terminal and Revert read the tree back afterwards; InstallPackage
//! only records the refreshed `requirements.txt` in the overlay.

use tracing::info;

use super::CommandContext;
use crate::error::CommandError;
use crate::session::SessionState;
use crate::shell::{execute_shell, run_program, ProcessFailure};

pub async fn terminal(
    state: &mut SessionState,
    ctx: &CommandContext<'_>,
    command: &str,
) -> Result<String, CommandError> {
    state.flush_to_disk().await?;
    info!(command = %command, "Running terminal command");
    let output = execute_shell(command, state.target_dir(), ctx.timeout).await;
    state.reload_from_disk().await?;

    Ok(format!("Exit code: {}\n{}", output.exit_code, output.combined()))
}

/// `pip install --upgrade` then refresh `requirements.txt` from `pip freeze`.
pub async fn install_packages(
    state: &mut SessionState,
    ctx: &CommandContext<'_>,
    names: &[String],
) -> Result<String, CommandError> {
    if names.is_empty() {
        return Err(CommandError::MalformedArguments {
            command: "InstallPackage".to_string(),
            reason: "no packages given".to_string(),
        });
    }
    state.flush_to_disk().await?;

    let mut args = vec!["install".to_string(), "--upgrade".to_string()];
    args.extend(names.iter().cloned());
    let install = run_pip(state, ctx, &args).await?;
    if !install.success() {
        return Err(CommandError::ExecutionFailed(format!(
            "pip install failed:\n{}",
            install.combined()
        )));
    }

    let freeze = run_pip(state, ctx, &["freeze".to_string()]).await?;
    if !freeze.success() {
        return Err(CommandError::ExecutionFailed(format!(
            "pip freeze failed:\n{}",
            freeze.combined()
        )));
    }
    state
        .files
        .insert("requirements.txt".to_string(), freeze.stdout);

    Ok(format!("Packages {} have been installed.", names.join(", ")))
}

async fn run_pip(
    state: &SessionState,
    ctx: &CommandContext<'_>,
    args: &[String],
) -> Result<crate::shell::ShellOutput, CommandError> {
    run_program("pip", args, state.target_dir(), None, ctx.timeout)
        .await
        .map_err(|failure| match failure {
            ProcessFailure::Spawn(e) => CommandError::ExecutionFailed(format!("pip: {}", e)),
            ProcessFailure::TimedOut => CommandError::ExecutionFailed(format!(
                "pip timed out after {}s",
                ctx.timeout.as_secs()
            )),
        })
}

pub async fn revert(
    state: &mut SessionState,
    ctx: &CommandContext<'_>,
    commit_hashes: &[String],
) -> Result<String, CommandError> {
    state.flush_to_disk().await?;
    ctx.vcs
        .revert_commits(state.target_dir(), commit_hashes)
        .await?;
    state.reload_from_disk().await?;
    Ok("Commits have been successfully reverted.".to_string())
}
