//! Child-process helpers shared by terminal commands and external checks.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Captured result of a finished process.
#[derive(Debug, Clone)]
pub struct ShellOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl ShellOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Stdout followed by stderr, skipping empty streams.
    pub fn combined(&self) -> String {
        match (self.stdout.trim().is_empty(), self.stderr.trim().is_empty()) {
            (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr.trim_end()),
            (false, true) => self.stdout.trim_end().to_string(),
            (true, false) => self.stderr.trim_end().to_string(),
            (true, true) => String::new(),
        }
    }
}

/// Why a process produced no exit status.
#[derive(Debug)]
pub enum ProcessFailure {
    /// The program could not be started.
    Spawn(std::io::Error),
    TimedOut,
}

/// Run `program args...` in `cwd`, optionally feeding `stdin`, bounded by `timeout`.
pub async fn run_program(
    program: &str,
    args: &[String],
    cwd: &Path,
    stdin: Option<&str>,
    timeout: Duration,
) -> Result<ShellOutput, ProcessFailure> {
    let mut command = Command::new(program);
    command
        .args(args)
        .current_dir(cwd)
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command.spawn().map_err(ProcessFailure::Spawn)?;

    if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
        pipe.write_all(input.as_bytes())
            .await
            .map_err(ProcessFailure::Spawn)?;
        drop(pipe);
    }

    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => Ok(ShellOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code().unwrap_or(-1),
        }),
        Ok(Err(e)) => Err(ProcessFailure::Spawn(e)),
        Err(_) => Err(ProcessFailure::TimedOut),
    }
}

/// Run a command line through `sh -c`. Failures are folded into the output.
pub async fn execute_shell(command: &str, cwd: &Path, timeout: Duration) -> ShellOutput {
    let args = vec!["-c".to_string(), command.to_string()];
    match run_program("sh", &args, cwd, None, timeout).await {
        Ok(output) => output,
        Err(ProcessFailure::Spawn(e)) => ShellOutput {
            stdout: String::new(),
            stderr: format!("Execution error: {}", e),
            exit_code: -1,
        },
        Err(ProcessFailure::TimedOut) => ShellOutput {
            stdout: String::new(),
            stderr: format!("Command timed out after {}s", timeout.as_secs()),
            exit_code: -1,
        },
    }
}
