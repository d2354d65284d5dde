use anyhow::Result;
use std::sync::Arc;
use strum_macros::EnumIter;

use super::base::Provider;
use super::configs::{OpenAiProviderConfig, ProviderConfig};
use super::openai::OpenAiProvider;

#[derive(EnumIter, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderType {
    OpenAi,
    Groq,
}

impl ProviderType {
    /// Guess the provider from a model name, the way the model catalog of
    /// the CLI expects ("gpt-4o" -> OpenAI, "llama-3.1-8b-instant" -> Groq).
    pub fn for_model(model: &str) -> Option<ProviderType> {
        let model = model.to_ascii_lowercase();
        if model.starts_with("gpt-") || model.starts_with("o1") {
            Some(ProviderType::OpenAi)
        } else if model.starts_with("llama") || model.starts_with("mixtral") {
            Some(ProviderType::Groq)
        } else {
            None
        }
    }

    pub fn config_from_env(&self, model: &str) -> Result<ProviderConfig> {
        Ok(match self {
            ProviderType::OpenAi => {
                ProviderConfig::OpenAi(OpenAiProviderConfig::openai_from_env(model)?)
            }
            ProviderType::Groq => {
                ProviderConfig::Groq(OpenAiProviderConfig::groq_from_env(model)?)
            }
        })
    }
}

pub fn get_provider(config: ProviderConfig) -> Result<Arc<dyn Provider>> {
    match config {
        ProviderConfig::OpenAi(openai_config) | ProviderConfig::Groq(openai_config) => {
            Ok(Arc::new(OpenAiProvider::new(openai_config)?))
        }
    }
}
