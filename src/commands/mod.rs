//! Commands the model may call during a session.
//!
//! A [`Command`] is decoded from a [`StructuredCall`] against the kinds
//! offered for the current turn, then executed against a [`SessionState`].
//! Execution returns the text appended to the transcript; errors are
//! observations for the command loop, not fatal.

pub mod files;
pub mod namespace;
pub mod process;
mod registry;

pub use registry::{schemas, CommandKind, CHECK_COMMANDS, GENERATE_COMMANDS};

use std::time::Duration;
use tracing::debug;

use crate::checks::Formatter;
use crate::error::CommandError;
use crate::llm::{Gateway, StructuredCall};
use crate::prompts::Prompts;
use crate::session::SessionState;
use crate::vcs::VersionControl;

/// A decoded command with its arguments.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Think { thought: String },
    Verdict { reasoning: String, passed: bool },
    Files { filenames: Vec<String> },
    ReplaceFile { filename: String, instructions: String },
    Search { query: String },
    DeleteFile { filename: String },
    MoveFile { old: String, new: String },
    InstallPackage { names: Vec<String> },
    Terminal { command: String },
    Revert { commit_hashes: Vec<String> },
}

/// Collaborators available to executing commands.
pub struct CommandContext<'a> {
    pub gateway: &'a Gateway,
    pub prompts: &'a Prompts,
    pub vcs: &'a dyn VersionControl,
    pub formatter: Option<&'a dyn Formatter>,
    /// Source directory used to derive import namespaces.
    pub code_path: &'a str,
    /// Bound on spawned processes.
    pub timeout: Duration,
}

impl Command {
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::Think { .. } => CommandKind::Think,
            Command::Verdict { .. } => CommandKind::Verdict,
            Command::Files { .. } => CommandKind::Files,
            Command::ReplaceFile { .. } => CommandKind::ReplaceFile,
            Command::Search { .. } => CommandKind::Search,
            Command::DeleteFile { .. } => CommandKind::DeleteFile,
            Command::MoveFile { .. } => CommandKind::MoveFile,
            Command::InstallPackage { .. } => CommandKind::InstallPackage,
            Command::Terminal { .. } => CommandKind::Terminal,
            Command::Revert { .. } => CommandKind::Revert,
        }
    }

    pub fn name(&self) -> &'static str {
        self.kind().name()
    }

    pub fn is_terminal(&self) -> bool {
        self.kind().is_terminal()
    }

    /// Select the candidate named by `call` and decode its arguments.
    pub fn decode(call: &StructuredCall, candidates: &[CommandKind]) -> Result<Self, CommandError> {
        let kind = candidates
            .iter()
            .copied()
            .find(|k| k.name() == call.name)
            .ok_or_else(|| CommandError::UnrecognizedCommand(call.name.clone()))?;
        kind.decode(&call.arguments)
    }

    /// Apply the command to `state` and describe the outcome.
    pub async fn execute(
        &self,
        state: &mut SessionState,
        ctx: &CommandContext<'_>,
    ) -> Result<String, CommandError> {
        debug!(command = self.name(), "Executing command");
        let result = self.dispatch(state, ctx).await;
        crate::metrics::record_command(self.name(), result.is_ok());
        result
    }

    async fn dispatch(
        &self,
        state: &mut SessionState,
        ctx: &CommandContext<'_>,
    ) -> Result<String, CommandError> {
        match self {
            Command::Think { thought } => Ok(thought.clone()),
            Command::Verdict { reasoning, .. } => Ok(reasoning.clone()),
            Command::Files { filenames } => Ok(files::list_files(&state.files, filenames)),
            Command::ReplaceFile {
                filename,
                instructions,
            } => files::replace_file(state, ctx, filename, instructions).await,
            Command::Search { query } => {
                Ok(files::render_search(query, &files::search(&state.files, query)))
            }
            Command::DeleteFile { filename } => files::delete_file(&mut state.files, filename),
            Command::MoveFile { old, new } => {
                namespace::move_file(&mut state.files, old, new, ctx.code_path)
            }
            Command::InstallPackage { names } => process::install_packages(state, ctx, names).await,
            Command::Terminal { command } => process::terminal(state, ctx, command).await,
            Command::Revert { commit_hashes } => process::revert(state, ctx, commit_hashes).await,
        }
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Function Called: {}", self.name())?;
        match self {
            Command::Think { thought } => write!(f, " thought={}", thought),
            Command::Verdict { reasoning, passed } => {
                write!(f, " verdict={} reasoning={}", passed, reasoning)
            }
            Command::Files { filenames } => write!(f, " files=[{}]", filenames.join(", ")),
            Command::ReplaceFile {
                filename,
                instructions,
            } => write!(f, " filename={} instructions={}", filename, instructions),
            Command::Search { query } => write!(f, " search_string={}", query),
            Command::DeleteFile { filename } => write!(f, " filename={}", filename),
            Command::MoveFile { old, new } => {
                write!(f, " old_filename={} new_filename={}", old, new)
            }
            Command::InstallPackage { names } => write!(f, " packages=[{}]", names.join(", ")),
            Command::Terminal { command } => write!(f, " command_string={}", command),
            Command::Revert { commit_hashes } => {
                write!(f, " commit_hashes=[{}]", commit_hashes.join(", "))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(name: &str, arguments: &str) -> StructuredCall {
        StructuredCall {
            name: name.to_string(),
            arguments: arguments.to_string(),
        }
    }

    #[test]
    fn test_decode_selects_matching_candidate() {
        let command = Command::decode(
            &call("Search", r#"{"search_string":"needle"}"#),
            GENERATE_COMMANDS,
        )
        .unwrap();
        assert_eq!(
            command,
            Command::Search {
                query: "needle".to_string()
            }
        );
    }

    #[test]
    fn test_decode_rejects_kind_outside_candidates() {
        let err = Command::decode(&call("Terminal", r#"{"command_string":"ls"}"#), CHECK_COMMANDS)
            .unwrap_err();
        assert!(matches!(err, CommandError::UnrecognizedCommand(name) if name == "Terminal"));
    }

    #[test]
    fn test_decode_unknown_name() {
        let err = Command::decode(&call("Explode", "{}"), GENERATE_COMMANDS).unwrap_err();
        assert!(matches!(err, CommandError::UnrecognizedCommand(_)));
    }

    #[test]
    fn test_decode_invalid_json() {
        let err = Command::decode(&call("Think", "not json"), GENERATE_COMMANDS).unwrap_err();
        assert!(matches!(err, CommandError::MalformedArguments { .. }));
    }

    #[test]
    fn test_echo_format() {
        let command = Command::MoveFile {
            old: "src/a.py".to_string(),
            new: "src/b.py".to_string(),
        };
        assert_eq!(
            command.to_string(),
            "Function Called: MoveFile old_filename=src/a.py new_filename=src/b.py"
        );

        let files = Command::Files {
            filenames: vec!["a".to_string(), "b".to_string()],
        };
        assert_eq!(files.to_string(), "Function Called: Files files=[a, b]");
    }
}
