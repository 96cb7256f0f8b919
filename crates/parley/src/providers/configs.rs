use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::anthropic::ANTHROPIC_HOST;
use super::factory::ProviderType;
use super::gemini::GEMINI_HOST;
use super::ollama::OLLAMA_HOST;
use super::openai::OPENAI_HOST;
use crate::errors::ConfigError;

/// Default `max_tokens` for Anthropic, which rejects requests without one
pub const ANTHROPIC_DEFAULT_MAX_TOKENS: u32 = 8192;

// Unified enum to wrap different provider configurations
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderConfig {
    OpenAi(OpenAiProviderConfig),
    Anthropic(AnthropicProviderConfig),
    Gemini(GeminiProviderConfig),
    Ollama(OllamaProviderConfig),
}

// Define specific config structs for each provider
#[derive(Debug, Clone, PartialEq)]
pub struct OpenAiProviderConfig {
    pub host: String,
    pub api_key: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnthropicProviderConfig {
    pub host: String,
    pub api_key: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeminiProviderConfig {
    pub host: String,
    pub api_key: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OllamaProviderConfig {
    pub host: String,
}

impl ProviderConfig {
    /// Build the config for `provider`, falling back to the vendor's public host.
    ///
    /// Hosted vendors need a non-blank API key; that is checked here so the
    /// problem surfaces before a conversation starts.
    pub fn new(
        provider: ProviderType,
        host: Option<String>,
        api_key: Option<String>,
    ) -> Result<Self, ConfigError> {
        let host = host.filter(|h| !h.trim().is_empty());
        let api_key = api_key.filter(|k| !k.trim().is_empty());
        let require_key = || {
            api_key.clone().ok_or_else(|| ConfigError::MissingCredential {
                provider: provider.to_string(),
            })
        };

        Ok(match provider {
            ProviderType::OpenAi => ProviderConfig::OpenAi(OpenAiProviderConfig {
                host: host.unwrap_or_else(|| OPENAI_HOST.to_string()),
                api_key: require_key()?,
            }),
            ProviderType::Anthropic => ProviderConfig::Anthropic(AnthropicProviderConfig {
                host: host.unwrap_or_else(|| ANTHROPIC_HOST.to_string()),
                api_key: require_key()?,
            }),
            ProviderType::Gemini => ProviderConfig::Gemini(GeminiProviderConfig {
                host: host.unwrap_or_else(|| GEMINI_HOST.to_string()),
                api_key: require_key()?,
            }),
            ProviderType::Ollama => ProviderConfig::Ollama(OllamaProviderConfig {
                host: host.unwrap_or_else(|| OLLAMA_HOST.to_string()),
            }),
        })
    }

    pub fn provider_type(&self) -> ProviderType {
        match self {
            ProviderConfig::OpenAi(_) => ProviderType::OpenAi,
            ProviderConfig::Anthropic(_) => ProviderType::Anthropic,
            ProviderConfig::Gemini(_) => ProviderType::Gemini,
            ProviderConfig::Ollama(_) => ProviderType::Ollama,
        }
    }
}

/// Per-request tuning shared by every adapter
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
    /// Longest silence tolerated between two reads of the response body
    #[serde(skip)]
    pub read_timeout: Option<Duration>,
}

impl RequestOptions {
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_output_tokens(mut self, max_output_tokens: u32) -> Self {
        self.max_output_tokens = Some(max_output_tokens);
        self
    }

    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = Some(read_timeout);
        self
    }

    /// Fill unset fields from `defaults`; fields set on `self` win
    pub fn merged_with(&self, defaults: &RequestOptions) -> RequestOptions {
        RequestOptions {
            temperature: self.temperature.or(defaults.temperature),
            max_output_tokens: self.max_output_tokens.or(defaults.max_output_tokens),
            read_timeout: self.read_timeout.or(defaults.read_timeout),
        }
    }

    /// Defaults a model needs to be called at all
    pub fn model_defaults(provider: ProviderType, _model: &str) -> RequestOptions {
        match provider {
            ProviderType::Anthropic => RequestOptions {
                max_output_tokens: Some(ANTHROPIC_DEFAULT_MAX_TOKENS),
                ..Default::default()
            },
            _ => RequestOptions::default(),
        }
    }

    /// Caller options merged with model defaults, minus what the model rejects
    pub fn resolve(&self, provider: ProviderType, model: &str) -> RequestOptions {
        let mut resolved = self.merged_with(&Self::model_defaults(provider, model));
        if provider == ProviderType::OpenAi && is_openai_reasoning_model(model) {
            resolved.temperature = None;
        }
        resolved
    }
}

/// OpenAI reasoning models only accept the default temperature
pub fn is_openai_reasoning_model(model: &str) -> bool {
    let model = model.to_ascii_lowercase();
    ["o1", "o3", "o4", "gpt-5"]
        .iter()
        .any(|prefix| model.starts_with(prefix))
}
