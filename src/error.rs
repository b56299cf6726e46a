//! Error types for issue-forge operations.
//!
//! Each subsystem owns one error enum:
//! - LLM gateway and provider calls
//! - Command decoding and execution
//! - The command loop
//! - Version control, hosting service, and external checks
//! - The retry state store
//! - The per-issue pipeline

use thiserror::Error;

/// Errors that can occur during LLM operations.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Missing API key: OPENAI_API_KEY environment variable not set")]
    MissingApiKey,

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Failed to parse LLM response: {0}")]
    ParseError(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Invalid model: {0}")]
    InvalidModel(String),

    #[error("Input of {len} characters exceeds the maximum of {max}")]
    InputTooLarge { len: usize, max: usize },

    #[error("No structured call returned. Message received: {0}")]
    NoStructuredResponse(String),

    #[error("API error ({code}): {message}")]
    ApiError { code: u16, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl LlmError {
    /// Whether the error is a network or service-level failure worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            LlmError::RequestFailed(msg) => {
                let msg = msg.to_lowercase();
                msg.contains("timeout")
                    || msg.contains("timed out")
                    || msg.contains("connection")
                    || msg.contains("temporarily")
            }
            LlmError::RateLimited(_) => true,
            LlmError::ApiError { code, .. } => *code >= 500 || *code == 429,
            _ => false,
        }
    }
}

/// Errors raised while decoding or executing a command.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Malformed arguments for {command}: {reason}")]
    MalformedArguments { command: String, reason: String },

    #[error("Unrecognized command name: {0}")]
    UnrecognizedCommand(String),

    #[error("Cannot {action} file {path} as it does not exist.")]
    FileNotFound { action: &'static str, path: String },

    #[error("Command execution failed: {0}")]
    ExecutionFailed(String),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Version control error: {0}")]
    Vcs(#[from] VcsError),

    #[error("Prompt template error: {0}")]
    Template(#[from] tera::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that end a command loop without a terminal command.
#[derive(Debug, Error)]
pub enum LoopError {
    #[error("Command loop exceeded {iterations} iterations without a terminal command")]
    Overflow { iterations: usize },

    #[error("Command loop failed after {exceptions} consecutive errors: {last}")]
    Failed { exceptions: usize, last: String },
}

/// Errors from the version-control collaborator.
#[derive(Debug, Error)]
pub enum VcsError {
    #[error("git {command} failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the hosting-service collaborator.
#[derive(Debug, Error)]
pub enum HostingError {
    #[error("HTTP request failed: {0}")]
    HttpError(String),

    #[error("Rate limited, retry after {retry_after:?} seconds")]
    RateLimited { retry_after: Option<u64> },

    #[error("API error ({code}) during {operation}: {message}")]
    ApiError {
        operation: String,
        code: u16,
        message: String,
    },

    #[error("Failed to parse response: {0}")]
    ParseError(String),

    #[error("Pull request #{0} cannot be merged cleanly")]
    MergeConflict(u64),

    #[error("Missing API token: GITHUB_API_KEY environment variable not set")]
    MissingToken,
}

/// Errors from the persisted retry state store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to persist state file: {0}")]
    Persist(String),
}

/// Errors from static-analysis, test-runner and formatter processes.
#[derive(Debug, Error)]
pub enum CheckError {
    #[error("{tool} is not available: {reason}")]
    Unavailable { tool: String, reason: String },

    #[error("{tool} timed out after {seconds} seconds")]
    Timeout { tool: String, seconds: u64 },

    #[error("{tool} failed: {output}")]
    Failed { tool: String, output: String },
}

/// Errors raised by one attempt of the per-issue pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Verification rejected the change: {reasoning}")]
    NegativeVerdict { reasoning: String },

    #[error("Quality checks still failing after {attempts} attempts:\n{findings}")]
    Quality { attempts: usize, findings: String },

    #[error("Command loop error: {0}")]
    Loop(#[from] LoopError),

    #[error("Version control error: {0}")]
    Vcs(#[from] VcsError),

    #[error("Hosting service error: {0}")]
    Hosting(#[from] HostingError),

    #[error("State store error: {0}")]
    Store(#[from] StoreError),

    #[error("Prompt template error: {0}")]
    Template(#[from] tera::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Task aborted: {0}")]
    Aborted(String),
}

impl PipelineError {
    /// Soft failures still publish a change request, marked as a draft.
    pub fn is_soft(&self) -> bool {
        matches!(self, PipelineError::Quality { .. })
    }
}
