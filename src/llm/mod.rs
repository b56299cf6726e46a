//! LLM integration for issue-forge.
//!
//! [`OpenAiClient`] speaks the OpenAI-compatible chat API with function
//! calling. [`Gateway`] wraps any [`LlmProvider`] with an input size bound,
//! model validation and the structured-call contract, and can memoize
//! completions through a [`ResponseCache`].
//!
//! ```ignore
//! use issue_forge::llm::{CompletionRequest, Gateway, OpenAiClient};
//! use std::sync::Arc;
//!
//! let client = OpenAiClient::from_env("https://api.openai.com/v1")?;
//! let gateway = Gateway::new(Arc::new(client));
//! let text = gateway.complete_text("Say hi", "You are terse.").await?;
//! ```

pub mod cache;
pub mod client;
pub mod gateway;

pub use cache::{CacheStats, ContentHash, ResponseCache, SharedResponseCache};
pub use client::{
    Choice, FunctionCall, FunctionDefinition, GenerationRequest, GenerationResponse, LlmProvider,
    Message, OpenAiClient, ToolCall, ToolDefinition, Usage,
};
pub use gateway::{Completion, CompletionRequest, Gateway, Model, StructuredCall};
