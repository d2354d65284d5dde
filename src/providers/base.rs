use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{Message, OutputSchema, Tool};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: Option<i32>,
    pub output_tokens: Option<i32>,
    pub total_tokens: Option<i32>,
}

impl Usage {
    pub fn new(
        input_tokens: Option<i32>,
        output_tokens: Option<i32>,
        total_tokens: Option<i32>,
    ) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens,
        }
    }
}

/// Base trait for model providers (OpenAI, Groq, mocks).
///
/// The engine hands the system prompt separately from the stored history so
/// the history itself is never mutated to carry it, and binds the tool
/// descriptors on every call. Providers own any retry policy; the engine
/// treats a completion failure as fatal for the run.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Generate exactly one new assistant message from the conversation
    async fn complete(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[Tool],
    ) -> Result<(Message, Usage)>;

    /// Generate a value conforming to the given output schema. Optional
    /// capability; the default refuses.
    async fn complete_structured(
        &self,
        _system: &str,
        _messages: &[Message],
        schema: &OutputSchema,
    ) -> Result<Value> {
        Err(anyhow!(
            "this provider does not support structured output (schema '{}')",
            schema.name
        ))
    }
}
