//! Static table of command kinds and their schemas.

use serde::Deserialize;
use serde_json::{json, Value};

use super::Command;
use crate::error::CommandError;
use crate::llm::ToolDefinition;

/// Every command the model can be offered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Think,
    Verdict,
    Files,
    ReplaceFile,
    Search,
    DeleteFile,
    MoveFile,
    InstallPackage,
    Terminal,
    Revert,
}

/// Commands offered to verification sessions.
pub const CHECK_COMMANDS: &[CommandKind] =
    &[CommandKind::Think, CommandKind::Verdict, CommandKind::Files];

/// Commands offered to change-application sessions.
pub const GENERATE_COMMANDS: &[CommandKind] = &[
    CommandKind::Think,
    CommandKind::Verdict,
    CommandKind::Files,
    CommandKind::ReplaceFile,
    CommandKind::Search,
    CommandKind::DeleteFile,
    CommandKind::MoveFile,
    CommandKind::InstallPackage,
    CommandKind::Terminal,
    CommandKind::Revert,
];

#[derive(Deserialize)]
struct ThinkArgs {
    thought: String,
}

#[derive(Deserialize)]
struct VerdictArgs {
    reasoning: String,
    verdict: bool,
}

#[derive(Deserialize)]
struct FilesArgs {
    files: Vec<String>,
}

#[derive(Deserialize)]
struct ReplaceFileArgs {
    filename: String,
    instructions: String,
}

#[derive(Deserialize)]
struct SearchArgs {
    search_string: String,
}

#[derive(Deserialize)]
struct DeleteFileArgs {
    filename: String,
}

#[derive(Deserialize)]
struct MoveFileArgs {
    old_filename: String,
    new_filename: String,
}

#[derive(Deserialize)]
struct InstallPackageArgs {
    packages: Vec<String>,
}

#[derive(Deserialize)]
struct TerminalArgs {
    command_string: String,
}

#[derive(Deserialize)]
struct RevertArgs {
    commit_hashes: Vec<String>,
}

impl CommandKind {
    /// Schema key advertised to the model.
    pub fn name(self) -> &'static str {
        match self {
            CommandKind::Think => "Think",
            CommandKind::Verdict => "Verdict",
            CommandKind::Files => "Files",
            CommandKind::ReplaceFile => "ReplaceFile",
            CommandKind::Search => "Search",
            CommandKind::DeleteFile => "DeleteFile",
            CommandKind::MoveFile => "MoveFile",
            CommandKind::InstallPackage => "InstallPackage",
            CommandKind::Terminal => "Terminal",
            CommandKind::Revert => "Revert",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            CommandKind::Think => "Describe what you plan to do in your next steps",
            CommandKind::Verdict => {
                "Finish the session with a verdict on whether the objective was achieved"
            }
            CommandKind::Files => "Show the contents of files, with line numbers",
            CommandKind::ReplaceFile => {
                "Modify a file according to instructions. Creates the file if it does not exist."
            }
            CommandKind::Search => "List the files whose contents contain a string",
            CommandKind::DeleteFile => "Delete a file",
            CommandKind::MoveFile => "Move a file and update imports that reference it",
            CommandKind::InstallPackage => "Install Python packages with pip",
            CommandKind::Terminal => "Execute a shell command in the repository root",
            CommandKind::Revert => "Revert a list of commits in the repository",
        }
    }

    /// Ends the command loop when chosen.
    pub fn is_terminal(self) -> bool {
        matches!(self, CommandKind::Verdict)
    }

    /// May be chosen twice in a row.
    pub fn is_repeatable(self) -> bool {
        matches!(self, CommandKind::Files | CommandKind::ReplaceFile)
    }

    /// JSON schema of the arguments object.
    pub fn parameters(self) -> Value {
        match self {
            CommandKind::Think => object(
                json!({
                    "thought": string("A description of what you plan to do in your next steps"),
                }),
                &["thought"],
            ),
            CommandKind::Verdict => object(
                json!({
                    "reasoning": string("Why the verdict was reached"),
                    "verdict": {
                        "type": "boolean",
                        "description": "Whether the change is judged successful",
                    },
                }),
                &["reasoning", "verdict"],
            ),
            CommandKind::Files => object(
                json!({ "files": string_array("Paths of the files to show") }),
                &["files"],
            ),
            CommandKind::ReplaceFile => object(
                json!({
                    "filename": string("Path of the file to modify"),
                    "instructions": string(
                        "Human readable description of how the file should change, without code"
                    ),
                }),
                &["filename", "instructions"],
            ),
            CommandKind::Search => object(
                json!({ "search_string": string("Text to look for, case-insensitive") }),
                &["search_string"],
            ),
            CommandKind::DeleteFile => object(
                json!({ "filename": string("Path of the file to delete") }),
                &["filename"],
            ),
            CommandKind::MoveFile => object(
                json!({
                    "old_filename": string("Current path of the file"),
                    "new_filename": string("New path of the file"),
                }),
                &["old_filename", "new_filename"],
            ),
            CommandKind::InstallPackage => object(
                json!({ "packages": string_array("Names of the packages to install") }),
                &["packages"],
            ),
            CommandKind::Terminal => object(
                json!({ "command_string": string("The shell command to execute") }),
                &["command_string"],
            ),
            CommandKind::Revert => object(
                json!({ "commit_hashes": string_array("Hashes of the commits to revert") }),
                &["commit_hashes"],
            ),
        }
    }

    pub fn schema(self) -> ToolDefinition {
        ToolDefinition::function(self.name(), self.description(), self.parameters())
    }

    /// Build a command of this kind from raw JSON arguments.
    pub fn decode(self, arguments: &str) -> Result<Command, CommandError> {
        let malformed = |e: serde_json::Error| CommandError::MalformedArguments {
            command: self.name().to_string(),
            reason: e.to_string(),
        };

        let command = match self {
            CommandKind::Think => {
                let a: ThinkArgs = serde_json::from_str(arguments).map_err(malformed)?;
                Command::Think { thought: a.thought }
            }
            CommandKind::Verdict => {
                let a: VerdictArgs = serde_json::from_str(arguments).map_err(malformed)?;
                Command::Verdict {
                    reasoning: a.reasoning,
                    passed: a.verdict,
                }
            }
            CommandKind::Files => {
                let a: FilesArgs = serde_json::from_str(arguments).map_err(malformed)?;
                Command::Files { filenames: a.files }
            }
            CommandKind::ReplaceFile => {
                let a: ReplaceFileArgs = serde_json::from_str(arguments).map_err(malformed)?;
                Command::ReplaceFile {
                    filename: a.filename,
                    instructions: a.instructions,
                }
            }
            CommandKind::Search => {
                let a: SearchArgs = serde_json::from_str(arguments).map_err(malformed)?;
                Command::Search {
                    query: a.search_string,
                }
            }
            CommandKind::DeleteFile => {
                let a: DeleteFileArgs = serde_json::from_str(arguments).map_err(malformed)?;
                Command::DeleteFile {
                    filename: a.filename,
                }
            }
            CommandKind::MoveFile => {
                let a: MoveFileArgs = serde_json::from_str(arguments).map_err(malformed)?;
                Command::MoveFile {
                    old: a.old_filename,
                    new: a.new_filename,
                }
            }
            CommandKind::InstallPackage => {
                let a: InstallPackageArgs = serde_json::from_str(arguments).map_err(malformed)?;
                Command::InstallPackage { names: a.packages }
            }
            CommandKind::Terminal => {
                let a: TerminalArgs = serde_json::from_str(arguments).map_err(malformed)?;
                Command::Terminal {
                    command: a.command_string,
                }
            }
            CommandKind::Revert => {
                let a: RevertArgs = serde_json::from_str(arguments).map_err(malformed)?;
                Command::Revert {
                    commit_hashes: a.commit_hashes,
                }
            }
        };
        Ok(command)
    }
}

impl std::fmt::Display for CommandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Tool definitions for a set of command kinds, in order.
pub fn schemas(kinds: &[CommandKind]) -> Vec<ToolDefinition> {
    kinds.iter().map(|k| k.schema()).collect()
}

fn object(properties: Value, required: &[&str]) -> Value {
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

fn string(description: &str) -> Value {
    json!({ "type": "string", "description": description })
}

fn string_array(description: &str) -> Value {
    json!({
        "type": "array",
        "items": { "type": "string" },
        "description": description,
    })
}
