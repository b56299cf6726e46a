//! The command loop: alternate model calls and command execution until the
//! model picks a terminal command.
//!
//! Each iteration:
//! 1. Offers every candidate kind except the previous command's, unless that
//!    kind is repeatable
//! 2. Sends the objective, the transcript and any pending context
//! 3. Returns plain text immediately when text results are allowed
//! 4. Returns terminal commands without executing them
//! 5. Otherwise executes the command and records its echo and result
//!
//! Errors from steps 2-5 become observations in the transcript. The loop
//! fails after `max_exceptions` consecutive errors and overflows after
//! `max_iterations` iterations.

use tracing::{debug, info, warn};

use crate::commands::{schemas, Command, CommandContext, CommandKind};
use crate::config::Settings;
use crate::error::{CommandError, LoopError};
use crate::llm::{Completion, CompletionRequest};
use crate::session::SessionState;

/// Bounds and options of one loop run.
#[derive(Debug, Clone)]
pub struct LoopConfig {
    pub max_iterations: usize,
    pub max_exceptions: usize,
    /// Return plain-text answers instead of treating them as errors.
    pub allow_text: bool,
    /// Model override; the gateway default applies when absent.
    pub model: Option<String>,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: 15,
            max_exceptions: 5,
            allow_text: false,
            model: None,
        }
    }
}

impl LoopConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            max_iterations: settings.loop_max_iterations,
            max_exceptions: settings.loop_max_exceptions,
            allow_text: false,
            model: Some(settings.model.clone()),
        }
    }

    pub fn with_max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = max;
        self
    }

    pub fn with_max_exceptions(mut self, max: usize) -> Self {
        self.max_exceptions = max;
        self
    }

    pub fn allow_text(mut self) -> Self {
        self.allow_text = true;
        self
    }
}

/// How a loop run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum LoopOutcome {
    Terminal(Command),
    Text(String),
}

/// Kinds offered after `last` ran.
pub fn candidate_kinds(kinds: &[CommandKind], last: Option<CommandKind>) -> Vec<CommandKind> {
    kinds
        .iter()
        .copied()
        .filter(|kind| Some(*kind) != last || kind.is_repeatable())
        .collect()
}

/// Run the loop over `state` until a terminal command or a bound is hit.
pub async fn run_command_loop(
    objective: &str,
    system: &str,
    kinds: &[CommandKind],
    state: &mut SessionState,
    ctx: &CommandContext<'_>,
    config: &LoopConfig,
) -> Result<LoopOutcome, LoopError> {
    let mut exceptions = 0;

    for iteration in 1..=config.max_iterations {
        let candidates = candidate_kinds(kinds, state.last_command);
        debug!(iteration, candidates = candidates.len(), "Command loop iteration");

        match step(objective, system, &candidates, state, ctx, config).await {
            Ok(Some(outcome)) => return Ok(outcome),
            Ok(None) => exceptions = 0,
            Err(e) => {
                exceptions += 1;
                warn!(iteration, exceptions, error = %e, "Command loop error");
                state.record(&format!("Error: {}", e));
                if exceptions >= config.max_exceptions {
                    return Err(LoopError::Failed {
                        exceptions,
                        last: e.to_string(),
                    });
                }
            }
        }
    }

    Err(LoopError::Overflow {
        iterations: config.max_iterations,
    })
}

async fn step(
    objective: &str,
    system: &str,
    candidates: &[CommandKind],
    state: &mut SessionState,
    ctx: &CommandContext<'_>,
    config: &LoopConfig,
) -> Result<Option<LoopOutcome>, CommandError> {
    let mut request =
        CompletionRequest::new(build_prompt(objective, state), system).with_schemas(schemas(candidates));
    if let Some(model) = &config.model {
        request = request.with_model(model.clone());
    }
    if config.allow_text {
        request = request.allow_text();
    }

    let call = match ctx.gateway.complete(&request).await? {
        Completion::Text(text) => return Ok(Some(LoopOutcome::Text(text))),
        Completion::Call(call) => call,
    };

    let command = Command::decode(&call, candidates)?;
    if command.is_terminal() {
        info!(command = command.name(), "Command loop finished");
        return Ok(Some(LoopOutcome::Terminal(command)));
    }

    let output = command.execute(state, ctx).await?;
    info!(command = command.name(), "Command executed");
    state.record(&command.to_string());
    state.record(&output);
    if !state.context.is_empty() {
        let changed = state.render_context();
        state.record(&format!("Files changed on disk:\n{}", changed));
        state.context.clear();
    }
    state.last_command = Some(command.kind());

    Ok(None)
}

fn build_prompt(objective: &str, state: &SessionState) -> String {
    let mut prompt = format!("{}\n{}", objective, state.scratch);
    if !state.context.is_empty() {
        prompt.push_str("\n### CONTEXT ###\n");
        prompt.push_str(&state.render_context());
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{CHECK_COMMANDS, GENERATE_COMMANDS};
    use crate::error::LlmError;
    use crate::llm::{
        Choice, Gateway, GenerationRequest, GenerationResponse, LlmProvider, Message, Usage,
    };
    use crate::prompts::Prompts;
    use crate::session::FileMap;
    use crate::vcs::Git;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// Replays scripted replies in order and records the offered tool names.
    struct ScriptedProvider {
        replies: Mutex<VecDeque<Message>>,
        offered: Mutex<Vec<Vec<String>>>,
    }

    impl ScriptedProvider {
        fn new(replies: Vec<Message>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                offered: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError> {
            let names = request
                .tools
                .unwrap_or_default()
                .iter()
                .map(|t| t.name().to_string())
                .collect();
            self.offered.lock().unwrap().push(names);

            let message = self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Message::assistant_call("Think", r#"{"thought":"again"}"#));
            Ok(GenerationResponse {
                id: "scripted".to_string(),
                model: "gpt-4-1106-preview".to_string(),
                choices: vec![Choice {
                    index: 0,
                    message,
                    finish_reason: "tool_calls".to_string(),
                }],
                usage: Usage::default(),
            })
        }
    }

    async fn run(
        provider: Arc<ScriptedProvider>,
        kinds: &[CommandKind],
        files: FileMap,
        config: LoopConfig,
    ) -> (Result<LoopOutcome, LoopError>, SessionState) {
        let tmp = tempfile::tempdir().unwrap();
        let gateway = Gateway::new(provider);
        let prompts = Prompts::new().unwrap();
        let git = Git::new();
        let ctx = CommandContext {
            gateway: &gateway,
            prompts: &prompts,
            vcs: &git,
            formatter: None,
            code_path: "src",
            timeout: Duration::from_secs(10),
        };
        let mut state = SessionState::new(files, tmp.path());
        let result = run_command_loop("objective", "system", kinds, &mut state, &ctx, &config).await;
        (result, state)
    }

    #[test]
    fn test_candidates_exclude_previous_non_repeatable() {
        let after_think = candidate_kinds(CHECK_COMMANDS, Some(CommandKind::Think));
        assert_eq!(after_think, vec![CommandKind::Verdict, CommandKind::Files]);

        let after_files = candidate_kinds(CHECK_COMMANDS, Some(CommandKind::Files));
        assert_eq!(after_files, CHECK_COMMANDS.to_vec());
    }

    #[tokio::test]
    async fn test_loop_returns_terminal_verdict() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Message::assistant_call("Think", r#"{"thought":"read first"}"#),
            Message::assistant_call("Files", r#"{"files":["a.py"]}"#),
            Message::assistant_call("Verdict", r#"{"reasoning":"fine","verdict":true}"#),
        ]));
        let files: FileMap = [("a.py".to_string(), "x = 1".to_string())].into();

        let (result, state) = run(provider.clone(), CHECK_COMMANDS, files, LoopConfig::default()).await;
        assert_eq!(
            result.unwrap(),
            LoopOutcome::Terminal(Command::Verdict {
                reasoning: "fine".to_string(),
                passed: true
            })
        );
        assert!(state.scratch.contains("Function Called: Think thought=read first"));
        assert!(state.scratch.contains("a.py:\n1: x = 1"));

        let offered = provider.offered.lock().unwrap();
        assert!(!offered[1].contains(&"Think".to_string()));
    }

    #[tokio::test]
    async fn test_loop_overflows() {
        // Alternating non-terminal commands never end the loop.
        let replies = (0..10)
            .map(|i| {
                if i % 2 == 0 {
                    Message::assistant_call("Think", r#"{"thought":"hmm"}"#)
                } else {
                    Message::assistant_call("Search", r#"{"search_string":"x"}"#)
                }
            })
            .collect();
        let provider = Arc::new(ScriptedProvider::new(replies));

        let (result, _) = run(
            provider.clone(),
            GENERATE_COMMANDS,
            FileMap::new(),
            LoopConfig::default().with_max_iterations(4),
        )
        .await;
        assert!(matches!(result, Err(LoopError::Overflow { iterations: 4 })));
        assert_eq!(provider.offered.lock().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_loop_fails_after_consecutive_errors() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Message::assistant_call("Nope", "{}"),
            Message::assistant_call("DeleteFile", r#"{"filename":"missing.py"}"#),
            Message::assistant("no call at all"),
        ]));

        let (result, state) = run(
            provider,
            GENERATE_COMMANDS,
            FileMap::new(),
            LoopConfig::default().with_max_exceptions(3),
        )
        .await;
        match result {
            Err(LoopError::Failed { exceptions, last }) => {
                assert_eq!(exceptions, 3);
                assert!(last.contains("no call at all"));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(state.scratch.contains("Unrecognized command name: Nope"));
        assert!(state.scratch.contains("Cannot delete file missing.py"));
    }

    #[tokio::test]
    async fn test_text_outcome_when_allowed() {
        let provider = Arc::new(ScriptedProvider::new(vec![Message::assistant("done")]));
        let (result, _) = run(
            provider,
            CHECK_COMMANDS,
            FileMap::new(),
            LoopConfig::default().allow_text(),
        )
        .await;
        assert_eq!(result.unwrap(), LoopOutcome::Text("done".to_string()));
    }

    #[tokio::test]
    async fn test_repeated_non_repeatable_call_is_rejected() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Message::assistant_call("Think", r#"{"thought":"one"}"#),
            Message::assistant_call("Think", r#"{"thought":"two"}"#),
            Message::assistant_call("Verdict", r#"{"reasoning":"ok","verdict":false}"#),
        ]));
        let (result, state) = run(provider, CHECK_COMMANDS, FileMap::new(), LoopConfig::default()).await;
        assert!(matches!(
            result.unwrap(),
            LoopOutcome::Terminal(Command::Verdict { passed: false, .. })
        ));
        assert!(state.scratch.contains("Unrecognized command name: Think"));
        assert!(!state.scratch.contains("thought=two"));
    }
}
