//! Size-bounded, optionally structured access to the completion provider.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use super::cache::{ContentHash, SharedResponseCache};
use super::client::{GenerationRequest, LlmProvider, Message, ToolDefinition};
use crate::config::{Settings, DEFAULT_MAX_INPUT_CHARS};
use crate::error::LlmError;

/// Models the gateway accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Model {
    Gpt4,
    Gpt35,
}

impl Model {
    pub fn as_str(&self) -> &'static str {
        match self {
            Model::Gpt4 => "gpt-4-1106-preview",
            Model::Gpt35 => "gpt-3.5-turbo-1106",
        }
    }
}

impl FromStr for Model {
    type Err = LlmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gpt-4-1106-preview" | "gpt-4" => Ok(Model::Gpt4),
            "gpt-3.5-turbo-1106" | "gpt-3.5-turbo" => Ok(Model::Gpt35),
            other => Err(LlmError::InvalidModel(other.to_string())),
        }
    }
}

impl std::fmt::Display for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A function call chosen by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredCall {
    pub name: String,
    /// Raw JSON arguments as returned by the provider.
    pub arguments: String,
}

/// Result of a gateway call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Completion {
    Text(String),
    Call(StructuredCall),
}

/// Inputs of a single gateway call.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub prompt: String,
    pub system: String,
    pub schemas: Vec<ToolDefinition>,
    /// Model identifier; the gateway default is used when absent.
    pub model: Option<String>,
    /// With schemas present, fail unless the model calls one of them.
    pub require_call: bool,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>, system: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system: system.into(),
            schemas: Vec::new(),
            model: None,
            require_call: true,
        }
    }

    pub fn with_schemas(mut self, schemas: Vec<ToolDefinition>) -> Self {
        self.schemas = schemas;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Accept a plain text answer even when schemas are offered.
    pub fn allow_text(mut self) -> Self {
        self.require_call = false;
        self
    }
}

/// Gateway in front of an [`LlmProvider`].
pub struct Gateway {
    provider: Arc<dyn LlmProvider>,
    cache: Option<SharedResponseCache>,
    max_input_chars: usize,
    default_model: Model,
}

impl Gateway {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self {
            provider,
            cache: None,
            max_input_chars: DEFAULT_MAX_INPUT_CHARS,
            default_model: Model::Gpt4,
        }
    }

    /// Build a gateway from run settings.
    pub fn from_settings(
        provider: Arc<dyn LlmProvider>,
        settings: &Settings,
    ) -> Result<Self, LlmError> {
        Ok(Self::new(provider)
            .with_max_input_chars(settings.max_input_chars)
            .with_default_model(settings.model.parse()?))
    }

    pub fn with_cache(mut self, cache: SharedResponseCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_max_input_chars(mut self, max: usize) -> Self {
        self.max_input_chars = max;
        self
    }

    pub fn with_default_model(mut self, model: Model) -> Self {
        self.default_model = model;
        self
    }

    pub fn cache(&self) -> Option<&SharedResponseCache> {
        self.cache.as_ref()
    }

    /// Send one prompt and return either text or a structured call.
    pub async fn complete(&self, request: &CompletionRequest) -> Result<Completion, LlmError> {
        let len = request.prompt.chars().count();
        if len > self.max_input_chars {
            return Err(LlmError::InputTooLarge {
                len,
                max: self.max_input_chars,
            });
        }

        let model = match &request.model {
            Some(id) => id.parse::<Model>()?,
            None => self.default_model,
        };

        let key = ContentHash::for_completion(
            &request.prompt,
            &request.system,
            &request.schemas,
            model,
            request.require_call,
        );
        if let Some(hit) = self.cache.as_ref().and_then(|c| c.get(&key)) {
            debug!(key = %key, "Completion served from cache");
            return Ok(hit);
        }

        let mut generation = GenerationRequest::new(
            model.as_str(),
            vec![
                Message::system(request.system.clone()),
                Message::user(request.prompt.clone()),
            ],
        );
        if !request.schemas.is_empty() {
            generation = generation
                .with_tools(request.schemas.clone())
                .with_tool_choice("auto");
        }

        let started = Instant::now();
        let result = self.provider.generate(generation).await;
        let elapsed = started.elapsed();
        crate::metrics::record_llm_request(model.as_str(), result.is_ok(), elapsed);

        let response = result?;
        crate::metrics::record_llm_tokens(
            model.as_str(),
            response.usage.prompt_tokens,
            response.usage.completion_tokens,
        );
        info!(
            model = %model,
            duration_secs = format!("{:.1}", elapsed.as_secs_f64()),
            tokens_in = response.usage.prompt_tokens,
            tokens_out = response.usage.completion_tokens,
            "LLM call completed"
        );

        let completion = match response.first_tool_call() {
            Some(call) => Completion::Call(StructuredCall {
                name: call.function.name.clone(),
                arguments: call.function.arguments.clone(),
            }),
            None => {
                let content = response.first_content().unwrap_or_default().to_string();
                if !request.schemas.is_empty() && request.require_call {
                    return Err(LlmError::NoStructuredResponse(content));
                }
                Completion::Text(content)
            }
        };

        if let Some(cache) = &self.cache {
            cache.put(key, completion.clone());
        }

        Ok(completion)
    }

    /// Plain-text completion without schemas.
    pub async fn complete_text(&self, prompt: &str, system: &str) -> Result<String, LlmError> {
        match self
            .complete(&CompletionRequest::new(prompt, system))
            .await?
        {
            Completion::Text(text) => Ok(text),
            Completion::Call(call) => Err(LlmError::ParseError(format!(
                "expected text, model called {}",
                call.name
            ))),
        }
    }
}
