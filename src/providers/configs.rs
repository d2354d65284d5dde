use anyhow::{Context, Result};
use std::env;

/// Unified enum wrapping the supported provider configurations. Groq speaks
/// the OpenAI chat-completions wire format, so it shares the config shape.
#[derive(Debug, Clone)]
pub enum ProviderConfig {
    OpenAi(OpenAiProviderConfig),
    Groq(OpenAiProviderConfig),
}

#[derive(Debug, Clone)]
pub struct OpenAiProviderConfig {
    pub host: String,
    pub api_key: String,
    pub model: String,
}

impl OpenAiProviderConfig {
    pub fn new<H, K, M>(host: H, api_key: K, model: M) -> Self
    where
        H: Into<String>,
        K: Into<String>,
        M: Into<String>,
    {
        Self {
            host: host.into(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    /// Config for api.openai.com with the key taken from OPENAI_API_KEY
    pub fn openai_from_env<M: Into<String>>(model: M) -> Result<Self> {
        let api_key =
            env::var("OPENAI_API_KEY").context("OPENAI_API_KEY environment variable not set")?;
        Ok(Self::new("https://api.openai.com", api_key, model))
    }

    /// Config for the Groq OpenAI-compatible endpoint, key from GROQ_API_KEY
    pub fn groq_from_env<M: Into<String>>(model: M) -> Result<Self> {
        let api_key =
            env::var("GROQ_API_KEY").context("GROQ_API_KEY environment variable not set")?;
        Ok(Self::new("https://api.groq.com/openai", api_key, model))
    }
}
