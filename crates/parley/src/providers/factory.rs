use super::{
    anthropic::AnthropicProvider, base::Provider, configs::ProviderConfig,
    gemini::GeminiProvider, ollama::OllamaProvider, openai::OpenAiProvider,
};
use crate::errors::ConfigError;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use strum_macros::{Display, EnumIter, EnumString};

#[derive(
    EnumIter, EnumString, Display, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    OpenAi,
    Anthropic,
    Ollama,
    Gemini,
}

impl ProviderType {
    /// Model used when a request names a provider but no model
    pub fn default_model(&self) -> &'static str {
        match self {
            ProviderType::OpenAi => "gpt-5",
            ProviderType::Anthropic => "claude-sonnet-4",
            ProviderType::Ollama => "deepseek-r1:14b",
            ProviderType::Gemini => "gemini-2.5-flash",
        }
    }

    /// Parse a provider name, ignoring case and surrounding whitespace
    pub fn parse(name: &str) -> Option<Self> {
        ProviderType::from_str(name.trim()).ok()
    }
}

pub fn get_provider(config: ProviderConfig) -> Result<Arc<dyn Provider>, ConfigError> {
    match config {
        ProviderConfig::OpenAi(openai_config) => Ok(Arc::new(OpenAiProvider::new(openai_config)?)),
        ProviderConfig::Anthropic(anthropic_config) => {
            Ok(Arc::new(AnthropicProvider::new(anthropic_config)?))
        }
        ProviderConfig::Gemini(gemini_config) => Ok(Arc::new(GeminiProvider::new(gemini_config)?)),
        ProviderConfig::Ollama(ollama_config) => Ok(Arc::new(OllamaProvider::new(ollama_config)?)),
    }
}

lazy_static! {
    static ref ANTHROPIC_DOTTED_VERSION: Regex =
        Regex::new(r"^(claude-(?:[a-z0-9-]*-)?\d+)\.(\d+)(.*)$").unwrap();
}

/// Rewrite a model name into the form its vendor expects.
///
/// Anthropic model ids use hyphens between version numbers, so
/// `claude-sonnet-4.5` becomes `claude-sonnet-4-5`. Other names pass through.
pub fn normalize_model_name(provider: ProviderType, model: &str) -> String {
    let model = model.trim();
    if provider != ProviderType::Anthropic {
        return model.to_string();
    }
    let lowered = model.to_ascii_lowercase();
    ANTHROPIC_DOTTED_VERSION
        .replace(&lowered, "$1-$2$3")
        .into_owned()
}

/// Per-request overrides as they arrive from a caller
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ModelOverrides {
    /// `provider:model`, or a bare model name
    #[serde(default)]
    pub model_id: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

/// The provider and model a run will actually use
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSelection {
    pub provider: ProviderType,
    pub model: String,
}

impl ModelSelection {
    /// Combine configured defaults with per-request overrides.
    ///
    /// An override that switches provider resets the model to that provider's
    /// default unless a model is also given. Unknown provider names are ignored.
    pub fn resolve(
        base_provider: ProviderType,
        base_model: Option<&str>,
        overrides: &ModelOverrides,
    ) -> Self {
        let mut provider_override = None;
        let mut model_override = None;

        if let Some(model_id) = non_blank(&overrides.model_id) {
            let (provider, model) = split_model_id(model_id);
            provider_override = provider;
            model_override = Some(model);
        }

        if let Some(provider) = non_blank(&overrides.provider).and_then(ProviderType::parse) {
            provider_override = Some(provider);
        }

        if let Some(model) = non_blank(&overrides.model) {
            let (provider, model) = split_model_id(model);
            if provider_override.is_none() {
                provider_override = provider;
            }
            model_override = Some(model);
        }

        let provider = provider_override.unwrap_or(base_provider);
        let model = match (model_override, provider_override) {
            (Some(model), _) => model,
            (None, Some(provider)) => provider.default_model().to_string(),
            (None, None) => base_model
                .map(str::trim)
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| provider.default_model())
                .to_string(),
        };

        ModelSelection {
            provider,
            model: normalize_model_name(provider, &model),
        }
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Split `provider:model`. Anything whose prefix is not a known provider is a
/// bare model name, which keeps Ollama tags like `llama3:8b` intact.
fn split_model_id(value: &str) -> (Option<ProviderType>, String) {
    if let Some((prefix, rest)) = value.split_once(':') {
        if let Some(provider) = ProviderType::parse(prefix) {
            let rest = rest.trim();
            if !rest.is_empty() {
                return (Some(provider), rest.to_string());
            }
        }
    }
    (None, value.to_string())
}
